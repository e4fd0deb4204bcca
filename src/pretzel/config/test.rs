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

#![cfg(test)]

use crate::config::core::{BlobStore, StoreError, StoreErrorKind};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MemoryInner {
    blob: Option<Vec<u8>>,
    writes: usize,
}

/// In-memory `BlobStore` with a cloneable handle so tests can inspect what a
/// `ConfigStore` persisted and how often it wrote.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        MemoryStore::default()
    }

    pub(crate) fn with_blob(blob: Vec<u8>) -> Self {
        let store = MemoryStore::default();
        store.inner.lock().unwrap().blob = Some(blob);
        store
    }

    pub(crate) fn blob(&self) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().blob.clone()
    }

    pub(crate) fn writes(&self) -> usize {
        self.inner.lock().unwrap().writes
    }
}

impl BlobStore for MemoryStore {
    fn read_blob(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().unwrap().blob.clone())
    }

    fn write_blob(&mut self, blob: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.blob = Some(blob.to_vec());
        inner.writes += 1;
        Ok(())
    }
}

/// `BlobStore` implementation whose medium is broken, for error-path tests.
#[derive(Debug)]
pub(crate) struct FailingStore;

impl BlobStore for FailingStore {
    fn read_blob(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::KindMsg(StoreErrorKind::Io, "medium unavailable"))
    }

    fn write_blob(&mut self, _blob: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::KindMsg(StoreErrorKind::Io, "medium unavailable"))
    }
}
