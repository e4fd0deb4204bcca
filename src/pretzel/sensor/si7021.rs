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

use crate::sensor::core::{Humidity, I2cBus, SensorError};
use std::thread;
use std::time::Duration;

pub(crate) const SI7021_ADDR: u8 = 0x40;
pub(crate) const CMD_MEASURE_RH_HOLD: u8 = 0xE5;
pub(crate) const CMD_RESET: u8 = 0xFE;

/// Read relative humidity from an SI7021 sensor.
pub struct Si7021 {
    address: u8,
}

impl Si7021 {
    /// Reset the sensor so it starts from its default resolution.
    pub fn init(bus: &mut dyn I2cBus) -> Result<Self, SensorError> {
        Self::init_at(bus, SI7021_ADDR)
    }

    pub fn init_at(bus: &mut dyn I2cBus, address: u8) -> Result<Self, SensorError> {
        bus.write(address, &[CMD_RESET])
            .map_err(|e| SensorError::bus("unable to reset humidity sensor", e))?;
        // the datasheet allows 15ms for the reset to complete
        thread::sleep(Duration::from_millis(50));

        tracing::debug!(message = "humidity sensor reset");
        Ok(Si7021 { address })
    }

    /// Measure relative humidity, holding the bus until the conversion is done.
    pub fn read_humidity(&self, bus: &mut dyn I2cBus) -> Result<Humidity, SensorError> {
        let mut data = [0u8; 2];
        bus.write_read(self.address, &[CMD_MEASURE_RH_HOLD], &mut data)
            .map_err(|e| SensorError::bus("unable to read humidity sensor", e))?;

        let code = u16::from_be_bytes(data);
        // conversion from the datasheet; codes can land slightly outside
        // 0-100 by design and are clamped
        let humidity = (125.0 * f64::from(code) / 65536.0 - 6.0).clamp(0.0, 100.0);

        tracing::debug!(
            message = "parsed humidity sensor data",
            raw_humidity = code,
            humidity = humidity
        );

        Ok(Humidity::from(humidity))
    }
}
