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

//! Read temperature, humidity, pressure, and air quality and publish the
//! readings over MQTT.
//!
//! ## Features
//!
//! Pretzel is the brain of a small battery-powered weather node. Once per wake
//! cycle it reads a BMP280 (temperature and pressure), an SI7021 (humidity),
//! and a CCS811 (eCO2 and TVOC), measures the battery voltage through an
//! MCP3008 ADC behind a voltage divider, and publishes a single JSON record
//! to `awtrixnode/weather/data` on the configured broker. It is best run on a
//! Raspberry PI (Zero, 3, or 4) with the sensors on the first I2C bus.
//!
//! The published record looks like this (`CO2` and `PPM` are omitted when the
//! air quality sensor does not report an OK status):
//!
//! ```text
//! {"Name":"node1","Temp":21.4,"Hum":48.2,"Pres":1013.2,"CO2":412,"PPM":9,"Volt":3.99,"BatPerc":75}
//! ```
//!
//! Node configuration (network identity, broker address, node name, icon,
//! sleep interval) is persisted as a small JSON file and survives power
//! cycles. The node also subscribes to `awtrixnode/weather/#`: a message on
//! the `newData` topic carries a partial configuration update that is merged
//! into the current configuration and written back to disk before the next
//! reading is published.
//!
//! ## Build
//!
//! `pretzel` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/). Since it's meant to be run on a
//! Raspberry PI, you will also likely need to cross-compile it. If you are on
//! Ubuntu GNU/Linux, you'll need the following packages installed for this.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! ```
//!
//! Next, make sure you have a Rust toolchain for ARMv7, assuming you are
//! using the `rustup` tool.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! ```
//!
//! Next, you'll need to build `pretzel` itself for ARMv7.
//!
//! ```text
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Install
//!
//! ### Wiring
//!
//! The BMP280 (address `0x76`), SI7021 (`0x40`), and CCS811 (`0x5a`) share
//! the first I2C bus. The battery voltage divider feeds channel 0 of an
//! MCP3008 on SPI0. In order to read and write the I2C and SPI devices,
//! `pretzel` must run as `root` or as a member of the relevant device groups.
//!
//! ### Run
//!
//! You can run `pretzel` as a Systemd service using the
//! [provided unit file](ext/pretzel.service). This unit file assumes that you
//! have copied the resulting `pretzel` binary to `/usr/local/bin/pretzel`.
//!
//! ```text
//! sudo cp target/armv7-unknown-linux-musleabihf/release/pretzel /usr/local/bin/pretzel
//! sudo cp ext/pretzel.service /etc/systemd/system/pretzel.service
//! sudo systemctl daemon-reload
//! sudo systemctl enable pretzel.service
//! sudo systemctl start pretzel.service
//! ```
//!
//! ### Remote configuration
//!
//! Publish a JSON object with any subset of the recognized fields to the
//! `newData` topic to update the node. Fields not present in the message keep
//! their current values.
//!
//! ```text
//! mosquitto_pub -h broker -p 7001 -t 'awtrixnode/weather/newData' -m '{"sleep": 600}'
//! ```
//!

pub mod battery;
pub mod config;
pub mod mqtt;
pub mod node;
pub mod sensor;
pub mod telemetry;
