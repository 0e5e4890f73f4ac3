//! Persistent round storage.
//!
//! Implements:
//! - Fixed-width round file on a durable store
//! - Explicit reset to the start of an epoch
//! - Distinct errors for mount, read, write and decode failures
//!
//! The store never substitutes a default on failure. Callers fall back to
//! `RoundState::default()` themselves.

use crate::codec::{self, CodecError};
use crate::hal::DurableStore;
use crate::types::RoundState;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Path of the round file on the durable store
pub const ROUND_FILE: &str = "/rounds.txt";

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("could not mount durable store")]
    Mount,

    #[error("could not read {0}")]
    Read(String),

    #[error("could not write {0}")]
    Write(String),

    #[error("round file is malformed: {0}")]
    Malformed(#[from] CodecError),

    #[error("stored round {round} is outside epoch of {epoch_length}")]
    OutOfRange { round: u16, epoch_length: u16 },
}

/// Round state on top of a durable store
pub struct RoundStore<S> {
    store: S,
    path: String,
    epoch_length: u16,
    mounted: bool,
}

impl<S: DurableStore> RoundStore<S> {
    pub fn new(store: S, epoch_length: u16) -> Self {
        Self {
            store,
            path: ROUND_FILE.to_string(),
            epoch_length,
            mounted: false,
        }
    }

    /// Underlying store
    pub fn inner(&self) -> &S {
        &self.store
    }

    fn ensure_mounted(&mut self) -> Result<(), StorageError> {
        if !self.mounted {
            if !self.store.mount() {
                warn!("Store: Could not mount durable store");
                return Err(StorageError::Mount);
            }
            self.mounted = true;
        }
        Ok(())
    }

    /// Read the persisted round state
    pub fn load(&mut self) -> Result<RoundState, StorageError> {
        self.ensure_mounted()?;

        let bytes = self
            .store
            .read(&self.path)
            .ok_or_else(|| StorageError::Read(self.path.clone()))?;
        let state = codec::decode_round_state(&bytes)?;

        if state.round >= self.epoch_length {
            return Err(StorageError::OutOfRange {
                round: state.round,
                epoch_length: self.epoch_length,
            });
        }

        debug!("Store: Loaded {}", state);
        Ok(state)
    }

    /// Persist round state for the next boot
    pub fn save(&mut self, state: &RoundState) -> Result<(), StorageError> {
        self.ensure_mounted()?;

        let bytes = codec::encode_round_state(state);
        if !self.store.write(&self.path, &bytes) {
            warn!("Store: Could not write {}", self.path);
            return Err(StorageError::Write(self.path.clone()));
        }

        debug!("Store: Saved {}", state);
        Ok(())
    }

    /// Force the start of an epoch: `(0, true)`
    pub fn reset(&mut self) -> Result<(), StorageError> {
        info!("Store: Resetting round state");
        self.save(&RoundState::default())
    }
}

/// Durable store backed by a host directory.
///
/// Store paths are taken relative to `root`. Writes go to a temp file that
/// is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl DurableStore for FileStore {
    fn mount(&mut self) -> bool {
        match fs::create_dir_all(&self.root) {
            Ok(()) => true,
            Err(e) => {
                warn!("Store: Failed to create {:?}: {}", self.root, e);
                false
            }
        }
    }

    fn read(&mut self, path: &str) -> Option<Vec<u8>> {
        let full = self.resolve(path);
        match fs::read(&full) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("Store: Failed to read {:?}: {}", full, e);
                None
            }
        }
    }

    fn write(&mut self, path: &str, bytes: &[u8]) -> bool {
        let full = self.resolve(path);
        let mut temp = full.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let result = fs::write(&temp, bytes).and_then(|_| fs::rename(&temp, &full));
        if let Err(e) = result {
            warn!("Store: Failed to write {:?}: {}", full, e);
            return false;
        }
        true
    }
}

/// In-memory store for testing, with failure injection
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: HashMap<String, Vec<u8>>,
    pub fail_mount: bool,
    pub fail_read: bool,
    pub fail_write: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw contents of `path`
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Place raw bytes at `path`
    pub fn put(&mut self, path: &str, bytes: &[u8]) {
        self.files.insert(path.to_string(), bytes.to_vec());
    }
}

impl DurableStore for MemoryStore {
    fn mount(&mut self) -> bool {
        !self.fail_mount
    }

    fn read(&mut self, path: &str) -> Option<Vec<u8>> {
        if self.fail_read {
            return None;
        }
        self.files.get(path).cloned()
    }

    fn write(&mut self, path: &str, bytes: &[u8]) -> bool {
        if self.fail_write {
            return false;
        }
        self.files.insert(path.to_string(), bytes.to_vec());
        true
    }
}
