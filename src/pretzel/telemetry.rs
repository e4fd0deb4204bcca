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

use crate::battery::BatteryReading;
use crate::sensor::{AirQuality, Humidity, PressureHpa, TemperatureCelsius};
use serde::Serialize;

/// One reading as published to the telemetry topic.
///
/// The field names and their order are the wire contract consumed by the
/// display side. `CO2` and `PPM` are left out entirely when the air quality
/// sensor did not deliver an OK sample.
#[derive(Debug, Serialize)]
pub struct TelemetryRecord {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Temp")]
    temperature: f64,
    #[serde(rename = "Hum")]
    humidity: f64,
    #[serde(rename = "Pres")]
    pressure: f64,
    #[serde(rename = "CO2", skip_serializing_if = "Option::is_none")]
    co2: Option<u16>,
    #[serde(rename = "PPM", skip_serializing_if = "Option::is_none")]
    ppm: Option<u16>,
    #[serde(rename = "Volt")]
    volt: f64,
    #[serde(rename = "BatPerc")]
    battery_percent: u8,
}

impl TelemetryRecord {
    pub fn new(
        name: &str,
        temperature: TemperatureCelsius,
        humidity: Humidity,
        pressure: PressureHpa,
        air: Option<AirQuality>,
        battery: BatteryReading,
    ) -> Self {
        TelemetryRecord {
            name: name.to_owned(),
            temperature: temperature.into(),
            humidity: humidity.into(),
            pressure: pressure.into(),
            co2: air.map(|a| a.eco2_ppm),
            ppm: air.map(|a| a.tvoc_ppb),
            volt: battery.volts,
            battery_percent: battery.percent,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::TelemetryRecord;
    use crate::battery::BatteryReading;
    use crate::sensor::{AirQuality, Humidity, PressureHpa, TemperatureCelsius};

    fn record(air: Option<AirQuality>) -> TelemetryRecord {
        TelemetryRecord::new(
            "node1",
            TemperatureCelsius::from(21.5),
            Humidity::from(48.0),
            PressureHpa::from(1013.25),
            air,
            BatteryReading {
                volts: 3.99,
                percent: 75,
            },
        )
    }

    #[test]
    fn test_record_with_air_quality() {
        let json = record(Some(AirQuality {
            eco2_ppm: 650,
            tvoc_ppb: 41,
        }))
        .to_json()
        .unwrap();

        let expected = concat!(
            "{\"Name\":\"node1\",\"Temp\":21.5,\"Hum\":48.0,\"Pres\":1013.25,",
            "\"CO2\":650,\"PPM\":41,\"Volt\":3.99,\"BatPerc\":75}"
        );
        assert_eq!(expected.as_bytes(), json.as_slice());
    }

    #[test]
    fn test_record_without_air_quality_omits_fields() {
        let json = record(None).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let object = value.as_object().unwrap();

        assert!(!object.contains_key("CO2"));
        assert!(!object.contains_key("PPM"));
        for key in ["Name", "Temp", "Hum", "Pres", "Volt", "BatPerc"] {
            assert!(object.contains_key(key), "missing {}", key);
        }
    }
}
