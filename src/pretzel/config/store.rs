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

use crate::config::core::{BlobStore, NodeConfig, StoreError, StoreErrorKind};

/// Durable storage for the node configuration.
///
/// The store is platform-independent; the flash/EEPROM/filesystem specifics
/// live behind the [`BlobStore`] it is constructed with.
pub struct ConfigStore {
    blob: Box<dyn BlobStore + Send>,
}

impl ConfigStore {
    pub fn new<S>(blob: S) -> Self
    where
        S: BlobStore + Send + 'static,
    {
        ConfigStore { blob: Box::new(blob) }
    }

    /// Load the persisted configuration record.
    ///
    /// An absent or unparseable record yields the compiled-in defaults, which
    /// are persisted immediately so that a valid record exists after the
    /// first boot. Only a failure of the medium itself is returned as an
    /// error; malformed stored data is treated the same as no stored data.
    pub fn load(&mut self) -> Result<NodeConfig, StoreError> {
        let config = match self.blob.read_blob()? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(config) => {
                    tracing::debug!(message = "loaded persisted configuration");
                    return Ok(config);
                }
                Err(e) => {
                    tracing::warn!(
                        message = "persisted configuration unreadable, restoring defaults",
                        error = %e
                    );
                    NodeConfig::default()
                }
            },
            None => {
                tracing::info!(message = "no persisted configuration, saving defaults");
                NodeConfig::default()
            }
        };

        self.save(&config)?;
        Ok(config)
    }

    /// Serialize the full record and overwrite whatever the medium holds.
    pub fn save(&mut self, config: &NodeConfig) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(config).map_err(|e| {
            StoreError::KindMsgCause(
                StoreErrorKind::Serialize,
                "unable to serialize configuration record",
                Box::new(e),
            )
        })?;

        self.blob.write_blob(&blob)
    }
}
