// Pretzel - Battery-powered weather sensor node publishing over MQTT
//
// Copyright 2022-2023 The pretzel authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::sensor::core::{AirQuality, Humidity, I2cBus, SensorError, SensorErrorKind, TemperatureCelsius};
use std::thread;
use std::time::Duration;

pub(crate) const CCS811_ADDR: u8 = 0x5A;
pub(crate) const REG_STATUS: u8 = 0x00;
pub(crate) const REG_MEAS_MODE: u8 = 0x01;
pub(crate) const REG_ALG_RESULT: u8 = 0x02;
pub(crate) const REG_ENV_DATA: u8 = 0x05;
pub(crate) const REG_HW_ID: u8 = 0x20;
pub(crate) const BOOT_APP_START: u8 = 0xF4;

pub(crate) const HW_ID: u8 = 0x81;
pub(crate) const ALG_RESULT_SIZE: usize = 8;

pub(crate) const STATUS_FW_MODE: u8 = 0x80;
pub(crate) const STATUS_APP_VALID: u8 = 0x10;
pub(crate) const STATUS_DATA_READY: u8 = 0x08;
pub(crate) const STATUS_ERROR: u8 = 0x01;

// Constant power mode, one measurement per second
const MEAS_MODE_1SEC: u8 = 0x10;

/// Read equivalent CO2 and total VOC from a CCS811 sensor.
///
/// Every sample carries the sensor's own status byte; samples are only
/// reported when the status is OK (no error flag, new data ready), since a
/// freshly woken sensor spends its first seconds warming up.
#[derive(Debug)]
pub struct Ccs811 {
    address: u8,
}

impl Ccs811 {
    /// Probe the sensor, switch it from boot into application mode, and
    /// start periodic measurement.
    pub fn init(bus: &mut dyn I2cBus) -> Result<Self, SensorError> {
        Self::init_at(bus, CCS811_ADDR)
    }

    pub fn init_at(bus: &mut dyn I2cBus, address: u8) -> Result<Self, SensorError> {
        let mut id = [0u8; 1];
        bus.write_read(address, &[REG_HW_ID], &mut id)
            .map_err(|e| SensorError::bus("unable to probe air quality sensor", e))?;
        if id[0] != HW_ID {
            return Err(SensorError::KindMsgCode(
                SensorErrorKind::Identity,
                "unexpected air quality sensor hardware id",
                id[0],
            ));
        }

        let status = Self::status_at(bus, address)?;
        if status & STATUS_APP_VALID == 0 {
            return Err(SensorError::KindMsgCode(
                SensorErrorKind::Initialization,
                "air quality sensor has no valid application",
                status,
            ));
        }

        bus.write(address, &[BOOT_APP_START])
            .map_err(|e| SensorError::bus("unable to start air quality application", e))?;
        thread::sleep(Duration::from_millis(20));

        let status = Self::status_at(bus, address)?;
        if status & STATUS_FW_MODE == 0 {
            return Err(SensorError::KindMsgCode(
                SensorErrorKind::Initialization,
                "air quality sensor did not enter application mode",
                status,
            ));
        }

        bus.write(address, &[REG_MEAS_MODE, MEAS_MODE_1SEC])
            .map_err(|e| SensorError::bus("unable to set air quality measurement mode", e))?;

        tracing::debug!(message = "air quality sensor started", status = status);
        Ok(Ccs811 { address })
    }

    fn status_at(bus: &mut dyn I2cBus, address: u8) -> Result<u8, SensorError> {
        let mut status = [0u8; 1];
        bus.write_read(address, &[REG_STATUS], &mut status)
            .map_err(|e| SensorError::bus("unable to read air quality sensor status", e))?;
        Ok(status[0])
    }

    /// Feed the current temperature and humidity into the sensor's
    /// compensation algorithm.
    pub fn set_environment(
        &self,
        bus: &mut dyn I2cBus,
        temperature: TemperatureCelsius,
        humidity: Humidity,
    ) -> Result<(), SensorError> {
        // Both values are unsigned 16 bit fractions with 1/512 resolution;
        // temperature carries a +25c offset so the range starts at -25c.
        let humidity_raw = (f64::from(humidity).clamp(0.0, 100.0) * 512.0) as u16;
        let temperature_raw = ((f64::from(temperature) + 25.0).max(0.0) * 512.0) as u16;

        let [h_hi, h_lo] = humidity_raw.to_be_bytes();
        let [t_hi, t_lo] = temperature_raw.to_be_bytes();

        bus.write(self.address, &[REG_ENV_DATA, h_hi, h_lo, t_hi, t_lo])
            .map_err(|e| SensorError::bus("unable to set air quality environment data", e))
    }

    /// Read the latest algorithm results.
    pub fn read(&self, bus: &mut dyn I2cBus) -> Result<AirQuality, SensorError> {
        let mut data = [0u8; ALG_RESULT_SIZE];
        bus.write_read(self.address, &[REG_ALG_RESULT], &mut data)
            .map_err(|e| SensorError::bus("unable to read air quality sensor", e))?;

        let status = data[4];
        if status & STATUS_ERROR != 0 {
            return Err(SensorError::KindMsgCode(
                SensorErrorKind::Status,
                "air quality sensor reported an error",
                data[5],
            ));
        }
        if status & STATUS_DATA_READY == 0 {
            return Err(SensorError::KindMsg(
                SensorErrorKind::NotReady,
                "air quality sensor has no new sample",
            ));
        }

        let quality = AirQuality {
            eco2_ppm: u16::from_be_bytes([data[0], data[1]]),
            tvoc_ppb: u16::from_be_bytes([data[2], data[3]]),
        };

        tracing::debug!(
            message = "parsed air quality sensor data",
            eco2_ppm = quality.eco2_ppm,
            tvoc_ppb = quality.tvoc_ppb,
            status = status
        );

        Ok(quality)
    }
}
