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

mod bmp280;
mod ccs811;
mod core;
mod si7021;
mod suite;

pub use crate::sensor::bmp280::Bmp280;
pub use crate::sensor::ccs811::Ccs811;
pub use crate::sensor::core::{
    open_bus, AirQuality, BusError, EnvironmentSensors, Humidity, I2cBus, PressureHpa, SensorError,
    SensorErrorKind, TemperatureCelsius,
};
pub use crate::sensor::si7021::Si7021;
pub use crate::sensor::suite::NodeSensors;
