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

use crate::sensor::bmp280::Bmp280;
use crate::sensor::ccs811::Ccs811;
use crate::sensor::core::{
    AirQuality, EnvironmentSensors, Humidity, I2cBus, PressureHpa, SensorError, TemperatureCelsius,
};
use crate::sensor::si7021::Si7021;
use std::fmt::{self, Debug, Formatter};

/// The node's physical sensor set: BMP280, SI7021, and CCS811 sharing one
/// I2C bus.
///
/// Temperature and humidity readings are remembered and fed into the air
/// quality sensor's compensation algorithm before each air quality read, so
/// callers should read temperature and humidity first (the wake cycle does).
pub struct NodeSensors {
    bus: Box<dyn I2cBus + Send>,
    bmp280: Bmp280,
    si7021: Si7021,
    ccs811: Ccs811,
    last_temperature: Option<TemperatureCelsius>,
    last_humidity: Option<Humidity>,
}

impl NodeSensors {
    /// Initialize all three sensors on the given bus.
    pub fn init<B>(bus: B) -> Result<Self, SensorError>
    where
        B: I2cBus + Send + 'static,
    {
        let mut bus: Box<dyn I2cBus + Send> = Box::new(bus);

        let bmp280 = Bmp280::init(bus.as_mut())?;
        let si7021 = Si7021::init(bus.as_mut())?;
        let ccs811 = Ccs811::init(bus.as_mut())?;

        Ok(NodeSensors {
            bus,
            bmp280,
            si7021,
            ccs811,
            last_temperature: None,
            last_humidity: None,
        })
    }
}

impl EnvironmentSensors for NodeSensors {
    fn read_temperature(&mut self) -> Result<TemperatureCelsius, SensorError> {
        let (temperature, _) = self.bmp280.read(self.bus.as_mut())?;
        self.last_temperature = Some(temperature);
        Ok(temperature)
    }

    fn read_humidity(&mut self) -> Result<Humidity, SensorError> {
        let humidity = self.si7021.read_humidity(self.bus.as_mut())?;
        self.last_humidity = Some(humidity);
        Ok(humidity)
    }

    fn read_pressure(&mut self) -> Result<PressureHpa, SensorError> {
        let (_, pressure) = self.bmp280.read(self.bus.as_mut())?;
        Ok(pressure)
    }

    fn read_air_quality(&mut self) -> Result<AirQuality, SensorError> {
        if let (Some(temperature), Some(humidity)) = (self.last_temperature, self.last_humidity) {
            self.ccs811.set_environment(self.bus.as_mut(), temperature, humidity)?;
        }

        self.ccs811.read(self.bus.as_mut())
    }
}

impl Debug for NodeSensors {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSensors")
            .field("last_temperature", &self.last_temperature)
            .field("last_humidity", &self.last_humidity)
            .finish()
    }
}
