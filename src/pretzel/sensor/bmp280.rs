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

use crate::sensor::core::{I2cBus, PressureHpa, SensorError, SensorErrorKind, TemperatureCelsius};
use std::thread;
use std::time::Duration;

pub(crate) const BMP280_ADDR: u8 = 0x76;
pub(crate) const REG_CHIP_ID: u8 = 0xD0;
pub(crate) const REG_CALIBRATION: u8 = 0x88;
pub(crate) const REG_CTRL_MEAS: u8 = 0xF4;
pub(crate) const REG_CONFIG: u8 = 0xF5;
pub(crate) const REG_DATA: u8 = 0xF7;

pub(crate) const CHIP_ID: u8 = 0x58;
pub(crate) const CALIBRATION_SIZE: usize = 24;

// Normal mode, temperature oversampling x2, pressure oversampling x16
const CTRL_MEAS_NORMAL: u8 = 0x57;
// Filter off, shortest standby
const CONFIG_DEFAULT: u8 = 0x00;

/// Factory calibration words, read once at startup and applied to every
/// raw sample. T1/P1 are unsigned, the rest signed, all little-endian.
#[derive(Debug, Clone, Copy)]
struct Calibration {
    dig_t1: u16,
    dig_t2: i16,
    dig_t3: i16,
    dig_p1: u16,
    dig_p2: i16,
    dig_p3: i16,
    dig_p4: i16,
    dig_p5: i16,
    dig_p6: i16,
    dig_p7: i16,
    dig_p8: i16,
    dig_p9: i16,
}

impl Calibration {
    fn from_bytes(bytes: &[u8; CALIBRATION_SIZE]) -> Self {
        let word = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);

        Calibration {
            dig_t1: word(0),
            dig_t2: word(2) as i16,
            dig_t3: word(4) as i16,
            dig_p1: word(6),
            dig_p2: word(8) as i16,
            dig_p3: word(10) as i16,
            dig_p4: word(12) as i16,
            dig_p5: word(14) as i16,
            dig_p6: word(16) as i16,
            dig_p7: word(18) as i16,
            dig_p8: word(20) as i16,
            dig_p9: word(22) as i16,
        }
    }
}

/// Read temperature and barometric pressure from a BMP280 sensor.
///
/// The driver holds no bus; callers pass the shared I2C bus into each
/// operation since the sensor shares it with the rest of the node.
#[derive(Debug)]
pub struct Bmp280 {
    address: u8,
    calibration: Calibration,
}

impl Bmp280 {
    /// Probe the sensor, read its factory calibration, and start continuous
    /// measurement.
    pub fn init(bus: &mut dyn I2cBus) -> Result<Self, SensorError> {
        Self::init_at(bus, BMP280_ADDR)
    }

    pub fn init_at(bus: &mut dyn I2cBus, address: u8) -> Result<Self, SensorError> {
        let mut id = [0u8; 1];
        bus.write_read(address, &[REG_CHIP_ID], &mut id)
            .map_err(|e| SensorError::bus("unable to probe pressure sensor", e))?;
        if id[0] != CHIP_ID {
            return Err(SensorError::KindMsgCode(
                SensorErrorKind::Identity,
                "unexpected pressure sensor chip id",
                id[0],
            ));
        }

        let mut calibration = [0u8; CALIBRATION_SIZE];
        bus.write_read(address, &[REG_CALIBRATION], &mut calibration)
            .map_err(|e| SensorError::bus("unable to read pressure sensor calibration", e))?;

        bus.write(address, &[REG_CONFIG, CONFIG_DEFAULT])
            .map_err(|e| SensorError::bus("unable to configure pressure sensor", e))?;
        bus.write(address, &[REG_CTRL_MEAS, CTRL_MEAS_NORMAL])
            .map_err(|e| SensorError::bus("unable to start pressure sensor", e))?;

        // Give the sensor time to finish its first conversion so the data
        // registers hold a real sample.
        thread::sleep(Duration::from_millis(100));

        let sensor = Bmp280 {
            address,
            calibration: Calibration::from_bytes(&calibration),
        };
        tracing::debug!(message = "pressure sensor started", calibration = ?sensor.calibration);
        Ok(sensor)
    }

    /// Read one temperature and pressure sample.
    pub fn read(&self, bus: &mut dyn I2cBus) -> Result<(TemperatureCelsius, PressureHpa), SensorError> {
        let mut data = [0u8; 6];
        bus.write_read(self.address, &[REG_DATA], &mut data)
            .map_err(|e| SensorError::bus("unable to read pressure sensor", e))?;

        // Both raw values are 20 bits spread over msb/lsb/xlsb registers
        let raw_pressure =
            (u32::from(data[0]) << 12) | (u32::from(data[1]) << 4) | (u32::from(data[2]) >> 4);
        let raw_temperature =
            (u32::from(data[3]) << 12) | (u32::from(data[4]) << 4) | (u32::from(data[5]) >> 4);

        let (temperature, t_fine) = self.compensate_temperature(raw_temperature);
        let pressure = self.compensate_pressure(raw_pressure, t_fine)?;

        tracing::debug!(
            message = "parsed pressure sensor data",
            raw_temperature = raw_temperature,
            raw_pressure = raw_pressure,
            temperature = %temperature,
            pressure = %pressure
        );

        Ok((temperature, pressure))
    }

    // Compensation formulas from the datasheet (double precision variant).
    // t_fine carries the temperature into the pressure compensation.
    fn compensate_temperature(&self, raw: u32) -> (TemperatureCelsius, f64) {
        let c = &self.calibration;
        let adc_t = raw as f64;

        let var1 = (adc_t / 16384.0 - f64::from(c.dig_t1) / 1024.0) * f64::from(c.dig_t2);
        let var2 = (adc_t / 131072.0 - f64::from(c.dig_t1) / 8192.0)
            * (adc_t / 131072.0 - f64::from(c.dig_t1) / 8192.0)
            * f64::from(c.dig_t3);
        let t_fine = var1 + var2;

        (TemperatureCelsius::from(t_fine / 5120.0), t_fine)
    }

    fn compensate_pressure(&self, raw: u32, t_fine: f64) -> Result<PressureHpa, SensorError> {
        let c = &self.calibration;
        let adc_p = raw as f64;

        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * f64::from(c.dig_p6) / 32768.0;
        var2 += var1 * f64::from(c.dig_p5) * 2.0;
        var2 = var2 / 4.0 + f64::from(c.dig_p4) * 65536.0;
        var1 = (f64::from(c.dig_p3) * var1 * var1 / 524288.0 + f64::from(c.dig_p2) * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * f64::from(c.dig_p1);

        if var1 == 0.0 {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Measurement,
                "pressure compensation out of range",
            ));
        }

        let mut pressure = 1048576.0 - adc_p;
        pressure = (pressure - var2 / 4096.0) * 6250.0 / var1;
        var1 = f64::from(c.dig_p9) * pressure * pressure / 2147483648.0;
        var2 = pressure * f64::from(c.dig_p8) / 32768.0;
        pressure += (var1 + var2 + f64::from(c.dig_p7)) / 16.0;

        // registers hold pascals, the node reports hectopascals
        Ok(PressureHpa::from(pressure / 100.0))
    }
}
