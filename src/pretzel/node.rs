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

use crate::battery::{BatteryMonitor, BatteryReading};
use crate::config::{reconcile, ConfigStore, NodeConfig};
use crate::mqtt::{final_segment, InboundMessage, Transport, CONTROL_SEGMENT, DATA_TOPIC, SUBSCRIBE_PATTERN};
use crate::sensor::{AirQuality, EnvironmentSensors, Humidity, PressureHpa, SensorError, TemperatureCelsius};
use crate::telemetry::TelemetryRecord;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task;
use tokio::time::{self, Instant};
use tracing::{Instrument, Level};

/// Everything measured during one wake cycle.
#[derive(Debug, Clone, Copy)]
struct Sample {
    temperature: TemperatureCelsius,
    humidity: Humidity,
    pressure: PressureHpa,
    air: Option<AirQuality>,
    battery: BatteryReading,
}

/// Read the full sensor set once.
///
/// Air quality is the only reading allowed to fail: the sensor reports a
/// status with every sample and a not-OK status just means those values are
/// left out of the reading. Any other failure aborts the sample so invalid
/// data is never published.
fn read_sample(
    sensors: &mut dyn EnvironmentSensors,
    battery: &mut BatteryMonitor,
) -> Result<Sample, SensorError> {
    let temperature = sensors.read_temperature()?;
    let humidity = sensors.read_humidity()?;
    let pressure = sensors.read_pressure()?;

    let air = match sensors.read_air_quality() {
        Ok(air) => Some(air),
        Err(e) => {
            tracing::warn!(message = "air quality not available, omitting from reading", error = %e);
            None
        }
    };

    let battery = battery.read()?;

    Ok(Sample {
        temperature,
        humidity,
        pressure,
        air,
        battery,
    })
}

/// The node itself: one configuration, one broker session, one sensor set.
///
/// [`Node::run`] cycles forever through (service control channel) -> (read
/// sensors, publish) -> (sleep for the configured interval). A configuration
/// update received while the control channel is serviced is merged and
/// persisted before that cycle's reading is published.
pub struct Node<T: Transport> {
    config: NodeConfig,
    store: ConfigStore,
    transport: T,
    sensors: Arc<Mutex<Box<dyn EnvironmentSensors + Send>>>,
    battery: Arc<Mutex<BatteryMonitor>>,
    settle: Duration,
    connected: bool,
}

impl<T> Node<T>
where
    T: Transport,
{
    pub fn new(
        config: NodeConfig,
        store: ConfigStore,
        transport: T,
        sensors: Box<dyn EnvironmentSensors + Send>,
        battery: BatteryMonitor,
        settle: Duration,
    ) -> Self {
        Node {
            config,
            store,
            transport,
            sensors: Arc::new(Mutex::new(sensors)),
            battery: Arc::new(Mutex::new(battery)),
            settle,
            connected: false,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Run wake cycles until the process is stopped.
    pub async fn run(mut self) {
        loop {
            let sleep = self.run_cycle().await;
            tracing::info!(message = "going to sleep", seconds = sleep.as_secs());
            time::sleep(sleep).await;
        }
    }

    /// Run a single wake cycle and return how long to sleep before the next.
    pub async fn run_cycle(&mut self) -> Duration {
        self.ensure_connected().await;
        self.settle_window().await;
        self.publish_telemetry().await;
        self.config.sleep_interval()
    }

    /// Establish the broker session if the previous attempt failed (or none
    /// was made yet). A node that cannot reach its broker still measures and
    /// sleeps; it just has nowhere to send the reading.
    async fn ensure_connected(&mut self) {
        if self.connected {
            return;
        }

        match self.transport.connect(&self.config.nodename).await {
            Ok(()) => {
                tracing::info!(message = "connected to server", server = %self.config.server);
                if let Err(e) = self.transport.subscribe(SUBSCRIBE_PATTERN).await {
                    tracing::warn!(message = "unable to subscribe to control topic", error = %e);
                }
                self.connected = true;
            }
            Err(e) => {
                tracing::warn!(message = "cannot connect to server", server = %self.config.server, error = %e);
            }
        }
    }

    /// Service the control channel until the settle window has elapsed,
    /// dispatching every message that arrives in the meantime.
    async fn settle_window(&mut self) {
        let deadline = Instant::now() + self.settle;
        while Instant::now() < deadline {
            if let Some(message) = self.transport.poll_once().await {
                self.dispatch(message);
            }
        }
    }

    fn dispatch(&mut self, message: InboundMessage) {
        if final_segment(&message.topic) == CONTROL_SEGMENT {
            reconcile(&mut self.config, &mut self.store, &message.payload);
        } else {
            tracing::trace!(message = "ignoring message", topic = %message.topic);
        }
    }

    async fn publish_telemetry(&mut self) {
        let sensors = Arc::clone(&self.sensors);
        let battery = Arc::clone(&self.battery);

        let res = task::spawn_blocking(move || {
            let mut sensors = sensors.lock().unwrap();
            let mut battery = battery.lock().unwrap();
            read_sample(sensors.as_mut(), &mut battery)
        })
        .instrument(tracing::span!(Level::DEBUG, "sensor_read"))
        .await;

        let sample = match res {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                tracing::error!(message = "unable to read sensors, skipping publish", error = %e);
                return;
            }
            Err(e) => {
                tracing::error!(message = "sensor read task failed", error = %e);
                return;
            }
        };

        let record = TelemetryRecord::new(
            &self.config.nodename,
            sample.temperature,
            sample.humidity,
            sample.pressure,
            sample.air,
            sample.battery,
        );

        let payload = match record.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(message = "unable to serialize reading", error = %e);
                return;
            }
        };

        tracing::info!(message = "sending reading to server", topic = DATA_TOPIC);
        if let Err(e) = self.transport.publish(DATA_TOPIC, &payload).await {
            tracing::warn!(message = "unable to publish reading", error = %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{read_sample, Node, Sample};
    use crate::battery::{AdcReader, BatteryMonitor};
    use crate::config::test::MemoryStore;
    use crate::config::{ConfigStore, NodeConfig};
    use crate::mqtt::{InboundMessage, Transport, TransportError, TransportErrorKind};
    use crate::sensor::{
        AirQuality, EnvironmentSensors, Humidity, PressureHpa, SensorError, SensorErrorKind,
        TemperatureCelsius,
    };
    use std::collections::VecDeque;
    use std::time::Duration;

    const SETTLE: Duration = Duration::from_millis(50);

    struct ScriptedTransport {
        connect_ok: bool,
        connected: bool,
        subscriptions: Vec<String>,
        inbound: VecDeque<InboundMessage>,
        published: Vec<(String, Vec<u8>)>,
    }

    impl ScriptedTransport {
        fn new(connect_ok: bool) -> Self {
            ScriptedTransport {
                connect_ok,
                connected: false,
                subscriptions: Vec::new(),
                inbound: VecDeque::new(),
                published: Vec::new(),
            }
        }

        fn queue(&mut self, topic: &str, payload: &[u8]) {
            self.inbound.push_back(InboundMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            });
        }
    }

    impl Transport for ScriptedTransport {
        async fn connect(&mut self, _identity: &str) -> Result<(), TransportError> {
            if self.connect_ok {
                self.connected = true;
                Ok(())
            } else {
                Err(TransportError::KindMsg(
                    TransportErrorKind::Connect,
                    "scripted connection failure",
                ))
            }
        }

        async fn subscribe(&mut self, pattern: &str) -> Result<(), TransportError> {
            self.subscriptions.push(pattern.to_owned());
            Ok(())
        }

        async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::KindMsg(
                    TransportErrorKind::Publish,
                    "not connected to broker",
                ));
            }

            self.published.push((topic.to_owned(), payload.to_vec()));
            Ok(())
        }

        async fn poll_once(&mut self) -> Option<InboundMessage> {
            match self.inbound.pop_front() {
                Some(message) => Some(message),
                None => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    None
                }
            }
        }
    }

    struct FakeSensors {
        air_ok: bool,
    }

    impl EnvironmentSensors for FakeSensors {
        fn read_temperature(&mut self) -> Result<TemperatureCelsius, SensorError> {
            Ok(TemperatureCelsius::from(21.5))
        }

        fn read_humidity(&mut self) -> Result<Humidity, SensorError> {
            Ok(Humidity::from(48.0))
        }

        fn read_pressure(&mut self) -> Result<PressureHpa, SensorError> {
            Ok(PressureHpa::from(1013.25))
        }

        fn read_air_quality(&mut self) -> Result<AirQuality, SensorError> {
            if self.air_ok {
                Ok(AirQuality {
                    eco2_ppm: 650,
                    tvoc_ppb: 41,
                })
            } else {
                Err(SensorError::KindMsg(
                    SensorErrorKind::Status,
                    "scripted air quality failure",
                ))
            }
        }
    }

    struct BrokenSensors;

    impl EnvironmentSensors for BrokenSensors {
        fn read_temperature(&mut self) -> Result<TemperatureCelsius, SensorError> {
            Err(SensorError::KindMsg(SensorErrorKind::Bus, "scripted bus failure"))
        }

        fn read_humidity(&mut self) -> Result<Humidity, SensorError> {
            Err(SensorError::KindMsg(SensorErrorKind::Bus, "scripted bus failure"))
        }

        fn read_pressure(&mut self) -> Result<PressureHpa, SensorError> {
            Err(SensorError::KindMsg(SensorErrorKind::Bus, "scripted bus failure"))
        }

        fn read_air_quality(&mut self) -> Result<AirQuality, SensorError> {
            Err(SensorError::KindMsg(SensorErrorKind::Bus, "scripted bus failure"))
        }
    }

    struct FixedAdc(u16);

    impl AdcReader for FixedAdc {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            Ok(self.0)
        }
    }

    fn battery() -> BatteryMonitor {
        // 823 counts at the stock divider is about 4.0V, 75%
        BatteryMonitor::new(FixedAdc(823), 0.00486)
    }

    fn node(
        transport: ScriptedTransport,
        sensors: Box<dyn EnvironmentSensors + Send>,
        medium: MemoryStore,
    ) -> Node<ScriptedTransport> {
        let mut store = ConfigStore::new(medium);
        let config = store.load().unwrap();
        Node::new(config, store, transport, sensors, battery(), SETTLE)
    }

    fn published_json(node: &Node<ScriptedTransport>) -> serde_json::Value {
        assert_eq!(1, node.transport.published.len());
        let (topic, payload) = &node.transport.published[0];
        assert_eq!("awtrixnode/weather/data", topic);
        serde_json::from_slice(payload).unwrap()
    }

    #[test]
    fn test_read_sample_air_quality_failure_is_not_fatal() {
        let mut sensors = FakeSensors { air_ok: false };
        let mut battery = battery();

        let sample: Sample = read_sample(&mut sensors, &mut battery).unwrap();

        assert!(sample.air.is_none());
        assert_eq!(75, sample.battery.percent);
    }

    #[test]
    fn test_read_sample_core_failure_is_fatal() {
        let mut sensors = BrokenSensors;
        let mut battery = battery();

        let res = read_sample(&mut sensors, &mut battery);

        assert!(res.is_err());
        assert_eq!(SensorErrorKind::Bus, res.unwrap_err().kind());
    }

    #[tokio::test]
    async fn test_cycle_publishes_reading() {
        let transport = ScriptedTransport::new(true);
        let mut node = node(transport, Box::new(FakeSensors { air_ok: true }), MemoryStore::new());

        let sleep = node.run_cycle().await;

        assert_eq!(Duration::from_secs(300), sleep);
        assert_eq!(vec!["awtrixnode/weather/#".to_owned()], node.transport.subscriptions);

        let value = published_json(&node);
        assert_eq!("node1", value["Name"]);
        assert_eq!(650, value["CO2"]);
        assert_eq!(41, value["PPM"]);
        assert_eq!(75, value["BatPerc"]);
    }

    #[tokio::test]
    async fn test_cycle_omits_air_quality_when_not_ok() {
        let transport = ScriptedTransport::new(true);
        let mut node = node(transport, Box::new(FakeSensors { air_ok: false }), MemoryStore::new());

        node.run_cycle().await;

        let value = published_json(&node);
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("CO2"));
        assert!(!object.contains_key("PPM"));
        for key in ["Name", "Temp", "Hum", "Pres", "Volt", "BatPerc"] {
            assert!(object.contains_key(key), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_update_during_settle_window_applies_before_publish() {
        let mut transport = ScriptedTransport::new(true);
        transport.queue(
            "awtrixnode/weather/newData",
            b"{\"sleep\": 600, \"nodename\": \"porch\"}",
        );
        let medium = MemoryStore::new();
        let mut node = node(transport, Box::new(FakeSensors { air_ok: true }), medium.clone());

        let sleep = node.run_cycle().await;

        // the updated interval takes effect for this cycle's sleep and the
        // published reading already carries the new name
        assert_eq!(Duration::from_secs(600), sleep);
        assert_eq!("porch", node.config().nodename);
        let value = published_json(&node);
        assert_eq!("porch", value["Name"]);

        // the update hit the persistent medium before the publish
        let stored: NodeConfig = serde_json::from_slice(&medium.blob().unwrap()).unwrap();
        assert_eq!(600, stored.sleep);
        assert_eq!("porch", stored.nodename);
    }

    #[tokio::test]
    async fn test_malformed_update_is_dropped() {
        let mut transport = ScriptedTransport::new(true);
        transport.queue("awtrixnode/weather/newData", b"not json");
        let medium = MemoryStore::new();
        let mut node = node(transport, Box::new(FakeSensors { air_ok: true }), medium.clone());
        let writes_before = medium.writes();

        node.run_cycle().await;

        assert_eq!(NodeConfig::default(), *node.config());
        assert_eq!(writes_before, medium.writes());
    }

    #[tokio::test]
    async fn test_messages_on_other_topics_are_ignored() {
        let mut transport = ScriptedTransport::new(true);
        transport.queue("awtrixnode/weather/data", b"{\"sleep\": 600}");
        let mut node = node(transport, Box::new(FakeSensors { air_ok: true }), MemoryStore::new());

        node.run_cycle().await;

        assert_eq!(300, node.config().sleep);
    }

    #[tokio::test]
    async fn test_connect_failure_still_completes_cycle() {
        let transport = ScriptedTransport::new(false);
        let mut node = node(transport, Box::new(FakeSensors { air_ok: true }), MemoryStore::new());

        let sleep = node.run_cycle().await;

        assert_eq!(Duration::from_secs(300), sleep);
        assert!(node.transport.published.is_empty());
        assert!(node.transport.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_sensor_failure_skips_publish() {
        let transport = ScriptedTransport::new(true);
        let mut node = node(transport, Box::new(BrokenSensors), MemoryStore::new());

        let sleep = node.run_cycle().await;

        assert_eq!(Duration::from_secs(300), sleep);
        assert!(node.transport.published.is_empty());
    }
}
