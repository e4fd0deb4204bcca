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

use clap::Parser;
use pretzel::battery::{BatteryMonitor, Mcp3008, DEFAULT_ADC_SCALE};
use pretzel::config::{ConfigStore, FileStore};
use pretzel::mqtt::MqttTransport;
use pretzel::node::Node;
use pretzel::sensor::{open_bus, NodeSensors};
use std::path::PathBuf;
use std::time::Duration;
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_CONFIG_PATH: &str = "/var/lib/pretzel/config.json";
const DEFAULT_I2C_BUS: u8 = 1;
const DEFAULT_ADC_CHANNEL: u8 = 0;
const DEFAULT_SETTLE_SECS: u64 = 5;
const DEFAULT_LOG_LEVEL: Level = Level::INFO;

/// Publish weather readings from a battery-powered sensor node over MQTT
///
/// Read temperature and pressure from a BMP280, humidity from an SI7021, and
/// air quality from a CCS811, all connected to an I2C bus of a local machine,
/// usually a Raspberry PI. Battery voltage is measured through an MCP3008 ADC
/// behind a voltage divider. Once per wake cycle the readings are published
/// as a single JSON record to the configured broker, after a short window in
/// which remote configuration updates are accepted and persisted.
///
/// Node configuration (broker address, node name, icon, sleep interval) lives
/// in a small JSON file and is created with defaults on first start. It can
/// be changed remotely by publishing a partial update to the node's `newData`
/// topic.
#[derive(Debug, Parser)]
#[clap(name = "pretzel", version = clap::crate_version ! ())]
struct PretzelApplication {
    /// Path of the persisted node configuration
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,

    /// I2C bus the BMP280, SI7021, and CCS811 sensors are connected to
    #[arg(long, default_value_t = DEFAULT_I2C_BUS)]
    i2c_bus: u8,

    /// MCP3008 channel the battery voltage divider is connected to
    #[arg(long, default_value_t = DEFAULT_ADC_CHANNEL)]
    adc_channel: u8,

    /// Volts per ADC count of the battery voltage divider
    #[arg(long, default_value_t = DEFAULT_ADC_SCALE)]
    adc_scale: f64,

    /// Seconds to service the control channel before each reading
    #[arg(long, default_value_t = DEFAULT_SETTLE_SECS)]
    settle_secs: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = PretzelApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let mut store = ConfigStore::new(FileStore::new(&opts.config_path));
    let config = store.load().unwrap_or_else(|e| {
        tracing::error!(
            message = "failed to load node configuration",
            path = %opts.config_path.display(),
            error = %e
        );
        process::exit(1)
    });

    let bus = open_bus(opts.i2c_bus).unwrap_or_else(|e| {
        tracing::error!(message = "failed to open I2C bus", i2c_bus = opts.i2c_bus, error = %e);
        process::exit(1)
    });

    let sensors = NodeSensors::init(bus).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize sensors", error = %e);
        process::exit(1)
    });

    let adc = Mcp3008::open(opts.adc_channel).unwrap_or_else(|e| {
        tracing::error!(message = "failed to open ADC", adc_channel = opts.adc_channel, error = %e);
        process::exit(1)
    });
    let battery = BatteryMonitor::new(adc, opts.adc_scale);

    let transport = MqttTransport::new(
        config.server.clone(),
        Some((config.ssid.clone(), config.password.clone())),
    );

    tracing::info!(message = "starting node", nodename = %config.nodename, server = %config.server);
    let node = Node::new(
        config,
        store,
        transport,
        Box::new(sensors),
        battery,
        Duration::from_secs(opts.settle_secs),
    );

    // Run wake cycles until either SIGTERM or SIGINT stops the process
    tokio::select! {
        _ = node.run() => {}
        _ = sigterm() => {}
        _ = sigint() => {}
    }

    tracing::info!("node shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
