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

use crate::config::core::NodeConfig;
use crate::config::store::ConfigStore;
use serde::Deserialize;

/// Partial configuration update received on the control topic.
///
/// Each recognized field is optional: a field present in the payload
/// overwrites the current value, an absent field leaves it untouched.
/// Unrecognized fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigUpdate {
    pub ssid: Option<String>,
    pub password: Option<String>,
    pub server: Option<String>,
    pub nodename: Option<String>,
    pub icon: Option<u32>,
    pub sleep: Option<u64>,
}

impl ConfigUpdate {
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// True if no recognized field is present.
    pub fn is_empty(&self) -> bool {
        self.ssid.is_none()
            && self.password.is_none()
            && self.server.is_none()
            && self.nodename.is_none()
            && self.icon.is_none()
            && self.sleep.is_none()
    }
}

/// Merge a partial update into a base configuration.
///
/// Pure and idempotent: fields present in the update replace the base values,
/// everything else is carried over unchanged.
pub fn merge(base: &NodeConfig, update: &ConfigUpdate) -> NodeConfig {
    NodeConfig {
        ssid: update.ssid.clone().unwrap_or_else(|| base.ssid.clone()),
        password: update.password.clone().unwrap_or_else(|| base.password.clone()),
        server: update.server.clone().unwrap_or_else(|| base.server.clone()),
        nodename: update.nodename.clone().unwrap_or_else(|| base.nodename.clone()),
        icon: update.icon.unwrap_or(base.icon),
        sleep: update.sleep.unwrap_or(base.sleep),
    }
}

/// Apply a raw control-channel payload to the in-memory configuration and
/// persist the result.
///
/// The control channel is fire-and-forget, so nothing is returned to the
/// caller: an unparseable payload is dropped without mutating or persisting
/// anything, and a failed persistence write is logged. A payload that parses
/// but carries zero recognized fields still triggers a write.
pub fn reconcile(config: &mut NodeConfig, store: &mut ConfigStore, payload: &[u8]) {
    let update = match ConfigUpdate::from_slice(payload) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(message = "discarding unparseable configuration update", error = %e);
            return;
        }
    };

    if update.is_empty() {
        tracing::debug!(message = "configuration update carries no recognized fields");
    }

    *config = merge(config, &update);
    tracing::info!(
        message = "applied configuration update",
        nodename = %config.nodename,
        sleep = config.sleep
    );

    if let Err(e) = store.save(config) {
        tracing::error!(message = "unable to persist updated configuration", error = %e);
    }
}

#[cfg(test)]
mod tests {
    use super::{merge, reconcile, ConfigUpdate};
    use crate::config::core::NodeConfig;
    use crate::config::store::ConfigStore;
    use crate::config::test::MemoryStore;

    #[test]
    fn test_update_ignores_unrecognized_fields() {
        let update = ConfigUpdate::from_slice(b"{\"icon\": 7, \"brightness\": 80}").unwrap();

        assert_eq!(Some(7), update.icon);
        assert!(update.sleep.is_none());
    }

    #[test]
    fn test_update_empty_object() {
        let update = ConfigUpdate::from_slice(b"{}").unwrap();
        assert!(update.is_empty());
    }

    #[test]
    fn test_merge_changes_exactly_present_fields() {
        let base = NodeConfig::default();
        let update = ConfigUpdate {
            nodename: Some("garage".to_owned()),
            sleep: Some(900),
            ..ConfigUpdate::default()
        };

        let merged = merge(&base, &update);

        assert_eq!("garage", merged.nodename);
        assert_eq!(900, merged.sleep);
        assert_eq!(base.ssid, merged.ssid);
        assert_eq!(base.password, merged.password);
        assert_eq!(base.server, merged.server);
        assert_eq!(base.icon, merged.icon);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let base = NodeConfig::default();
        let update = ConfigUpdate {
            server: Some("10.0.0.2".to_owned()),
            icon: Some(4),
            ..ConfigUpdate::default()
        };

        let once = merge(&base, &update);
        let twice = merge(&once, &update);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_reconcile_sleep_update_end_to_end() {
        let medium = MemoryStore::new();
        let mut store = ConfigStore::new(medium.clone());
        let mut config = store.load().unwrap();
        assert_eq!(300, config.sleep);

        reconcile(&mut config, &mut store, b"{\"sleep\": 600}");

        assert_eq!(600, config.sleep);
        assert_eq!(NodeConfig::default().nodename, config.nodename);
        assert_eq!(NodeConfig::default().icon, config.icon);

        // a reload through a fresh store sees the updated record
        let mut fresh = ConfigStore::new(medium.clone());
        assert_eq!(config, fresh.load().unwrap());
    }

    #[test]
    fn test_reconcile_malformed_payload_is_dropped() {
        let medium = MemoryStore::new();
        let mut store = ConfigStore::new(medium.clone());
        let mut config = store.load().unwrap();
        let before_writes = medium.writes();

        reconcile(&mut config, &mut store, b"not json at all");

        assert_eq!(NodeConfig::default(), config);
        assert_eq!(before_writes, medium.writes());
    }

    #[test]
    fn test_reconcile_no_recognized_fields_still_writes_through() {
        let medium = MemoryStore::new();
        let mut store = ConfigStore::new(medium.clone());
        let mut config = store.load().unwrap();
        let before_writes = medium.writes();

        reconcile(&mut config, &mut store, b"{\"unknown\": true}");

        assert_eq!(NodeConfig::default(), config);
        assert_eq!(before_writes + 1, medium.writes());
    }

    #[test]
    fn test_reconcile_twice_matches_once() {
        let medium = MemoryStore::new();
        let mut store = ConfigStore::new(medium.clone());
        let mut config = store.load().unwrap();

        reconcile(&mut config, &mut store, b"{\"nodename\": \"attic\", \"icon\": 9}");
        let after_once = config.clone();
        reconcile(&mut config, &mut store, b"{\"nodename\": \"attic\", \"icon\": 9}");

        assert_eq!(after_once, config);
    }
}
