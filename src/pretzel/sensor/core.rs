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

use std::error::Error;
use std::fmt::{self, Formatter};

use rppal::i2c::I2c;

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Relative humidity (from 0 to 100)
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f64);

impl From<Humidity> for f64 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f64> for Humidity {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Barometric pressure, in hectopascals
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct PressureHpa(f64);

impl From<PressureHpa> for f64 {
    fn from(v: PressureHpa) -> Self {
        v.0
    }
}

impl From<f64> for PressureHpa {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for PressureHpa {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}hPa", self.0)
    }
}

/// Air quality estimate: equivalent CO2 in ppm and total VOC in ppb
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AirQuality {
    pub eco2_ppm: u16,
    pub tvoc_ppb: u16,
}

/// Potential kinds of errors that can be encountered reading the sensors
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Initialization,
    Bus,
    Identity,
    NotReady,
    Status,
    Measurement,
}

/// Error initializing or reading one of the sensors
#[derive(Debug)]
pub enum SensorError {
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCode(SensorErrorKind, &'static str, u8),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCode(kind, _, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }

    pub(crate) fn bus(msg: &'static str, cause: BusError) -> Self {
        SensorError::KindMsgCause(SensorErrorKind::Bus, msg, cause)
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::KindMsg(_, msg) => msg.fmt(f),
            SensorError::KindMsgCode(_, msg, code) => write!(f, "{} (code {:#04x})", msg, code),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

pub type BusError = Box<dyn Error + Send + Sync>;

/// Abstraction around an `rppal::i2c::I2c` bus to allow for easier testing.
///
/// All three sensors sit on the same bus, so every operation is addressed.
pub trait I2cBus {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<(), BusError>;
    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<(), BusError>;
}

impl I2cBus for I2c {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<(), BusError> {
        self.set_slave_address(u16::from(addr)).map_err(|e| Box::new(e) as BusError)?;
        I2c::write(self, data).map_err(|e| Box::new(e) as BusError)?;
        Ok(())
    }

    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<(), BusError> {
        self.set_slave_address(u16::from(addr)).map_err(|e| Box::new(e) as BusError)?;
        I2c::write_read(self, data, buf).map_err(|e| Box::new(e) as BusError)?;
        Ok(())
    }
}

/// Open the given I2C bus of the local machine.
///
/// On a Raspberry PI the sensors are usually wired to bus 1 (pins 3 and 5).
pub fn open_bus(bus: u8) -> Result<I2c, SensorError> {
    I2c::with_bus(bus).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to open I2C bus",
            Box::new(e),
        )
    })
}

/// Sensor set read once per wake cycle.
///
/// Air quality is the only reading expected to fail in normal operation (the
/// sensor reports a status with each sample); the caller omits those values
/// from telemetry rather than publishing invalid data.
pub trait EnvironmentSensors {
    fn read_temperature(&mut self) -> Result<TemperatureCelsius, SensorError>;
    fn read_humidity(&mut self) -> Result<Humidity, SensorError>;
    fn read_pressure(&mut self) -> Result<PressureHpa, SensorError>;
    fn read_air_quality(&mut self) -> Result<AirQuality, SensorError>;
}
