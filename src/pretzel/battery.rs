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

use crate::sensor::{SensorError, SensorErrorKind};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// Volts per ADC count for the stock voltage divider feeding the ADC.
pub const DEFAULT_ADC_SCALE: f64 = 0.00486;

const MCP3008_CHANNELS: u8 = 8;
const MCP3008_CLOCK_HZ: u32 = 1_350_000;

/// Discharge curve of a single LiPo cell, from full (4.2V) down to cutoff.
/// Breakpoints are ordered from highest voltage to lowest.
const VOLTAGE_TO_PERCENT: [(f64, u8); 22] = [
    (4.2, 100),
    (4.15, 95),
    (4.11, 90),
    (4.08, 85),
    (4.02, 80),
    (3.98, 75),
    (3.95, 70),
    (3.91, 65),
    (3.87, 60),
    (3.85, 55),
    (3.84, 50),
    (3.82, 45),
    (3.80, 40),
    (3.79, 35),
    (3.77, 30),
    (3.75, 25),
    (3.73, 20),
    (3.71, 15),
    (3.69, 10),
    (3.61, 5),
    (3.27, 0),
    (0.0, 0),
];

/// Resolve a measured battery voltage to a charge percentage.
///
/// The table is scanned from the lowest breakpoint upward; the first
/// breakpoint at or above the measured voltage resolves to the percentage of
/// the row below it. A voltage exactly on a breakpoint therefore resolves to
/// the next lower percentage (3.98V is 70%, not 75%), and anything above the
/// top of the table reads as full.
pub fn battery_percent(volts: f64) -> u8 {
    for i in (0..VOLTAGE_TO_PERCENT.len() - 1).rev() {
        if VOLTAGE_TO_PERCENT[i].0 >= volts {
            return VOLTAGE_TO_PERCENT[i + 1].1;
        }
    }

    100
}

/// Abstraction around the ADC holding the battery voltage so the monitor can
/// be tested without SPI hardware.
pub trait AdcReader {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

/// One channel of an MCP3008 ADC on the first SPI bus.
#[derive(Debug)]
pub struct Mcp3008 {
    spi: Spi,
    channel: u8,
}

impl Mcp3008 {
    pub fn open(channel: u8) -> Result<Self, SensorError> {
        if channel >= MCP3008_CHANNELS {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Initialization,
                "ADC channel out of range",
            ));
        }

        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, MCP3008_CLOCK_HZ, Mode::Mode0).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Initialization,
                "unable to open SPI bus for ADC",
                Box::new(e),
            )
        })?;

        Ok(Mcp3008 { spi, channel })
    }
}

impl AdcReader for Mcp3008 {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        // start bit, single-ended read of the channel, one clocking byte
        let tx = [0x01, 0x80 | (self.channel << 4), 0x00];
        let mut rx = [0u8; 3];

        self.spi.transfer(&mut rx, &tx).map_err(|e| {
            SensorError::KindMsgCause(SensorErrorKind::Bus, "unable to read ADC", Box::new(e))
        })?;

        // 10 bit result straddles the last two bytes
        Ok((u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]))
    }
}

/// Battery state as published with each reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub volts: f64,
    pub percent: u8,
}

/// Convert raw ADC counts into a battery voltage and charge percentage.
pub struct BatteryMonitor {
    adc: Box<dyn AdcReader + Send>,
    scale: f64,
}

impl BatteryMonitor {
    pub fn new<A>(adc: A, scale: f64) -> Self
    where
        A: AdcReader + Send + 'static,
    {
        BatteryMonitor {
            adc: Box::new(adc),
            scale,
        }
    }

    pub fn read(&mut self) -> Result<BatteryReading, SensorError> {
        let raw = self.adc.read_raw()?;
        let volts = f64::from(raw) * self.scale;
        let reading = BatteryReading {
            volts,
            percent: battery_percent(volts),
        };

        tracing::debug!(
            message = "measured battery voltage",
            raw = raw,
            volts = volts,
            percent = reading.percent
        );

        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::{battery_percent, AdcReader, BatteryMonitor, Mcp3008};
    use crate::sensor::{SensorError, SensorErrorKind};

    struct FixedAdc(u16);

    impl AdcReader for FixedAdc {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_percent_above_table() {
        assert_eq!(100, battery_percent(4.3));
    }

    #[test]
    fn test_percent_exact_breakpoint_resolves_lower() {
        // a measurement exactly on a breakpoint reads as the next entry down
        assert_eq!(70, battery_percent(3.98));
        assert_eq!(95, battery_percent(4.2));
    }

    #[test]
    fn test_percent_between_breakpoints() {
        assert_eq!(10, battery_percent(3.70));
        assert_eq!(75, battery_percent(4.0));
    }

    #[test]
    fn test_percent_bottom_of_table() {
        assert_eq!(0, battery_percent(3.27));
        assert_eq!(0, battery_percent(2.5));
    }

    #[test]
    fn test_monitor_scales_raw_counts() {
        // 823 counts at the stock divider is very close to 4.0V
        let mut monitor = BatteryMonitor::new(FixedAdc(823), 0.00486);

        let reading = monitor.read().unwrap();

        assert!((reading.volts - 4.0).abs() < 0.005, "volts was {}", reading.volts);
        assert_eq!(75, reading.percent);
    }

    #[test]
    fn test_mcp3008_rejects_bad_channel() {
        let res = Mcp3008::open(8);

        assert!(res.is_err());
        assert_eq!(SensorErrorKind::Initialization, res.unwrap_err().kind());
    }
}
