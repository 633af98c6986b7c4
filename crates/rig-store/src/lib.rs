//! Console state shared between contexts.
//!
//! Each context owns a [`ConsoleStore`]. Port configs, the camera layout and
//! camera rotations are durable: every change is written to the shared
//! [`StorageBackend`] as a whole collection and announced on the bus so other
//! contexts can fold it in through [`ConsoleStore::apply_persisted`].

mod model;
mod storage;
mod store;

pub use model::{
    CameraLayout, CameraRotations, CameraSlot, ConsoleSnapshot, PersistedState, PortConfig,
    PortConfigs, DEFAULT_BAUD_RATE,
};
pub use storage::{
    DurableStorage, FileBackend, MemoryBackend, StorageBackend, StorageError,
    KEY_CAMERA_POSITIONS, KEY_CAMERA_ROTATIONS, KEY_PORT_CONFIGS, PERSISTED_KEYS,
};
pub use store::{ConsoleStore, StoreError};
