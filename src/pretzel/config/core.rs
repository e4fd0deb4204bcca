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

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Formatter};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SSID: &str = "iot";
const DEFAULT_PASSWORD: &str = "changeme";
const DEFAULT_SERVER: &str = "127.0.0.1";
const DEFAULT_NODENAME: &str = "node1";
const DEFAULT_ICON: u32 = 1;
const DEFAULT_SLEEP_SECS: u64 = 300;

/// Largest blob the persistent medium will accept. The original hardware kept
/// the record in a 512 byte EEPROM window; a full record is well under that.
pub(crate) const MAX_BLOB_BYTES: usize = 1024;

/// Persistent node configuration.
///
/// The field names are the wire contract: the same keys appear in the
/// persisted record and in partial updates received on the control topic.
/// Every field has a non-empty default compiled into the binary so a node
/// with no (or corrupt) persisted record always comes up fully configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network identity to join
    pub ssid: String,
    /// Shared secret for the network identity
    pub password: String,
    /// Hostname or address of the broker to publish readings to
    pub server: String,
    /// Display name of this node, also used as the session identity
    pub nodename: String,
    /// Icon shown next to this node's readings
    pub icon: u32,
    /// Seconds to sleep between readings
    pub sleep: u64,
}

impl NodeConfig {
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            ssid: DEFAULT_SSID.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            server: DEFAULT_SERVER.to_owned(),
            nodename: DEFAULT_NODENAME.to_owned(),
            icon: DEFAULT_ICON,
            sleep: DEFAULT_SLEEP_SECS,
        }
    }
}

/// Potential kinds of errors that can be encountered using the persistent medium
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum StoreErrorKind {
    Io,
    Serialize,
    TooLarge,
}

/// Error reading or writing the persistent configuration record
#[derive(Debug)]
pub enum StoreError {
    KindMsg(StoreErrorKind, &'static str),
    KindMsgCause(StoreErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::KindMsg(kind, _) => *kind,
            StoreError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::KindMsg(_, msg) => msg.fmt(f),
            StoreError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Abstraction over the persistent medium holding the serialized configuration
/// record. The store logic only needs "give me the stored bytes, if any" and
/// "replace the stored bytes", so each target platform implements just that.
pub trait BlobStore {
    /// Return the stored blob or `None` if nothing has ever been stored.
    fn read_blob(&mut self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored blob with the given bytes.
    fn write_blob(&mut self, blob: &[u8]) -> Result<(), StoreError>;
}

/// `BlobStore` keeping the record in a single file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the record, so a crash mid-write leaves either the old or the new
/// record fully readable.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        FileStore { path: path.into() }
    }
}

impl BlobStore for FileStore {
    fn read_blob(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::KindMsgCause(
                StoreErrorKind::Io,
                "unable to read configuration record",
                Box::new(e),
            )),
        }
    }

    fn write_blob(&mut self, blob: &[u8]) -> Result<(), StoreError> {
        if blob.len() > MAX_BLOB_BYTES {
            return Err(StoreError::KindMsg(
                StoreErrorKind::TooLarge,
                "configuration record exceeds medium capacity",
            ));
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::KindMsgCause(
                    StoreErrorKind::Io,
                    "unable to create configuration directory",
                    Box::new(e),
                )
            })?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");

        fs::write(&tmp, blob).map_err(|e| {
            StoreError::KindMsgCause(
                StoreErrorKind::Io,
                "unable to write configuration record",
                Box::new(e),
            )
        })?;

        fs::rename(&tmp, &self.path).map_err(|e| {
            StoreError::KindMsgCause(
                StoreErrorKind::Io,
                "unable to replace configuration record",
                Box::new(e),
            )
        })
    }
}
