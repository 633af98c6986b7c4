use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use rig_bus::{publish_storage_change, Bus, ContextId, StorageChange};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{CameraLayout, CameraRotations, PersistedState, PortConfigs};

pub const KEY_PORT_CONFIGS: &str = "portConfigs";
pub const KEY_CAMERA_POSITIONS: &str = "cameraPositions";
pub const KEY_CAMERA_ROTATIONS: &str = "cameraRotations";

pub const PERSISTED_KEYS: [&str; 3] = [KEY_PORT_CONFIGS, KEY_CAMERA_POSITIONS, KEY_CAMERA_ROTATIONS];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage key '{0}' is not a plain identifier")]
    InvalidKey(String),
    #[error("storage i/o failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("stored '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable key/value storage shared by every context of one console.
///
/// Values are whole JSON documents; a write replaces the previous value
/// entirely and a reader sees either the old or the new document.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Process-local storage for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: parking_lot::RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key inside a state directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl FileBackend {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{key}.{}.{seq}.tmp", std::process::id()));
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(err));
        }
        Ok(())
    }
}

/// Typed access to the persisted collections for one context. Every write
/// is announced on the bus with this context as origin.
#[derive(Clone)]
pub struct DurableStorage {
    backend: Arc<dyn StorageBackend>,
    bus: Arc<dyn Bus>,
    origin: ContextId,
}

impl DurableStorage {
    pub fn new(backend: Arc<dyn StorageBackend>, bus: Arc<dyn Bus>) -> Self {
        Self {
            backend,
            bus,
            origin: ContextId::new(),
        }
    }

    pub fn origin(&self) -> ContextId {
        self.origin
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.backend.read(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    /// Replaces the whole collection stored under `key` and notifies other
    /// contexts. A failed notification is logged; the write itself stands.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.backend.write(key, &encoded)?;
        counter!("rig_store_writes_total", 1, "key" => key.to_string());

        let change = StorageChange {
            key: key.to_string(),
            origin: self.origin,
        };
        match publish_storage_change(self.bus.as_ref(), &change) {
            Ok(delivered) => {
                debug!(target = "rig.store", key, delivered, "storage change published")
            }
            Err(err) => warn!(
                target = "rig.store",
                key,
                error = %err,
                "failed to publish storage change"
            ),
        }
        Ok(())
    }

    /// Reads the given keys. Unknown keys are ignored; unreadable values are
    /// logged and reported as absent.
    pub fn read_state(&self, keys: &[&str]) -> PersistedState {
        let mut state = PersistedState::default();
        for key in keys {
            match *key {
                KEY_PORT_CONFIGS => state.ports = self.read_logged::<PortConfigs>(key),
                KEY_CAMERA_POSITIONS => state.layout = self.read_logged::<CameraLayout>(key),
                KEY_CAMERA_ROTATIONS => {
                    state.rotations = self.read_logged::<CameraRotations>(key)
                }
                other => debug!(target = "rig.store", key = other, "ignoring unknown key"),
            }
        }
        state
    }

    pub fn read_all(&self) -> PersistedState {
        self.read_state(&PERSISTED_KEYS)
    }

    fn read_logged<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.read(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(target = "rig.store", key, error = %err, "unreadable persisted state");
                None
            }
        }
    }
}
