use std::sync::Arc;

use rig_bus::{Bus, ContextId};
use rig_core::{
    CameraId, CameraLink, DisplayPosition, ModelError, PortNumber, Rotation, ServerStatus,
    SessionMessage, TestReport,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::model::{ConsoleSnapshot, PersistedState, PortConfig};
use crate::storage::{
    DurableStorage, StorageError, KEY_CAMERA_POSITIONS, KEY_CAMERA_ROTATIONS, KEY_PORT_CONFIGS,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("{0}")]
    Invalid(String),
}

/// Console state of one context.
///
/// Durable collections are mutated and written back as a whole while the
/// write lock is held, so a reader of durable storage never sees a state
/// that this context did not also hold. Subscribers are only woken when a
/// value actually changes.
pub struct ConsoleStore {
    storage: DurableStorage,
    write_lock: parking_lot::Mutex<()>,
    state: watch::Sender<ConsoleSnapshot>,
}

impl ConsoleStore {
    /// Loads persisted collections, falling back to defaults for anything
    /// missing or unreadable.
    pub fn load(storage: DurableStorage) -> Self {
        let persisted = storage.read_all();
        let mut snapshot = ConsoleSnapshot::default();
        for (key, present) in [
            (KEY_PORT_CONFIGS, persisted.ports.is_some()),
            (KEY_CAMERA_POSITIONS, persisted.layout.is_some()),
            (KEY_CAMERA_ROTATIONS, persisted.rotations.is_some()),
        ] {
            if !present {
                debug!(target = "rig.store", key, "using default collection");
            }
        }
        merge_persisted(&mut snapshot, persisted);
        info!(target = "rig.store", context = %storage.origin(), "console store loaded");
        let (state, _) = watch::channel(snapshot);
        Self {
            storage,
            write_lock: parking_lot::Mutex::new(()),
            state,
        }
    }

    pub fn context(&self) -> ContextId {
        self.storage.origin()
    }

    /// Bus on which this context announces its durable writes.
    pub fn bus(&self) -> &Arc<dyn Bus> {
        self.storage.bus()
    }

    pub fn snapshot(&self) -> ConsoleSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsoleSnapshot> {
        self.state.subscribe()
    }

    pub fn port(&self, port: PortNumber) -> PortConfig {
        self.state.borrow().ports.get(port).clone()
    }

    pub fn select_device(
        &self,
        port: PortNumber,
        device_path: &str,
    ) -> Result<PortConfig, StoreError> {
        let device_path = device_path.trim().to_string();
        self.update_port(port, |config| {
            if config.selected_device_path != device_path {
                config.selected_device_path = device_path;
                config.connected = false;
            }
            Ok(())
        })
    }

    pub fn set_baud_rate(&self, port: PortNumber, baud_rate: u32) -> Result<PortConfig, StoreError> {
        if baud_rate == 0 {
            return Err(StoreError::Invalid("baud rate must be positive".into()));
        }
        self.update_port(port, |config| {
            config.baud_rate = baud_rate;
            Ok(())
        })
    }

    pub fn set_connected(&self, port: PortNumber, connected: bool) -> Result<PortConfig, StoreError> {
        self.update_port(port, |config| {
            config.connected = connected;
            Ok(())
        })
    }

    /// Applies `mutate` to one port and persists all four configs.
    pub fn update_port<F>(&self, port: PortNumber, mutate: F) -> Result<PortConfig, StoreError>
    where
        F: FnOnce(&mut PortConfig) -> Result<(), StoreError>,
    {
        let _guard = self.write_lock.lock();
        let mut ports = self.state.borrow().ports.clone();
        mutate(ports.get_mut(port))?;
        self.storage.write(KEY_PORT_CONFIGS, &ports)?;
        let updated = ports.get(port).clone();
        self.replace_field(|snapshot| &mut snapshot.ports, ports);
        Ok(updated)
    }

    /// Exchanges the cameras shown at `a` and `b`. Swapping a position with
    /// itself changes nothing but is still written back.
    pub fn swap(&self, a: DisplayPosition, b: DisplayPosition) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut layout = self.state.borrow().layout;
        layout.swap(a, b);
        self.storage.write(KEY_CAMERA_POSITIONS, &layout)?;
        debug!(target = "rig.store", %a, %b, "cameras swapped");
        self.replace_field(|snapshot| &mut snapshot.layout, layout);
        Ok(())
    }

    /// Turns one camera a quarter turn clockwise and returns its new rotation.
    pub fn rotate(&self, camera: CameraId) -> Result<Rotation, StoreError> {
        let _guard = self.write_lock.lock();
        let mut rotations = self.state.borrow().rotations;
        let rotation = rotations.advance(camera);
        self.storage.write(KEY_CAMERA_ROTATIONS, &rotations)?;
        self.replace_field(|snapshot| &mut snapshot.rotations, rotations);
        Ok(rotation)
    }

    /// Reports are replaced wholesale, never merged.
    pub fn set_report(&self, report: TestReport) -> bool {
        self.replace_field(|snapshot| &mut snapshot.report, Some(report))
    }

    pub fn set_message(&self, message: SessionMessage) -> bool {
        self.replace_field(|snapshot| &mut snapshot.message, Some(message))
    }

    pub fn set_server_status(&self, status: ServerStatus) -> bool {
        self.replace_field(|snapshot| &mut snapshot.server_status, status)
    }

    pub fn set_camera_link(&self, camera: CameraId, link: CameraLink) -> bool {
        self.replace_field(|snapshot| &mut snapshot.camera_links[camera.index()], link)
    }

    /// Folds collections read from durable storage into this context.
    /// Applying the same state twice is a no-op; returns whether anything
    /// changed.
    pub fn apply_persisted(&self, persisted: PersistedState) -> bool {
        let _guard = self.write_lock.lock();
        let changed = self
            .state
            .send_if_modified(|snapshot| merge_persisted(snapshot, persisted));
        if changed {
            debug!(target = "rig.store", context = %self.context(), "applied persisted state");
        }
        changed
    }

    /// Re-reads `keys` from durable storage and applies them.
    pub fn reload(&self, keys: &[&str]) -> bool {
        let persisted = self.storage.read_state(keys);
        self.apply_persisted(persisted)
    }

    pub fn reload_all(&self) -> bool {
        let persisted = self.storage.read_all();
        self.apply_persisted(persisted)
    }

    fn replace_field<T, F>(&self, field: F, value: T) -> bool
    where
        T: PartialEq,
        F: FnOnce(&mut ConsoleSnapshot) -> &mut T,
    {
        self.state
            .send_if_modified(|snapshot| replace_if_changed(field(snapshot), value))
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn merge_persisted(snapshot: &mut ConsoleSnapshot, persisted: PersistedState) -> bool {
    let mut changed = false;
    if let Some(ports) = persisted.ports {
        changed |= replace_if_changed(&mut snapshot.ports, ports);
    }
    if let Some(layout) = persisted.layout {
        changed |= replace_if_changed(&mut snapshot.layout, layout);
    }
    if let Some(rotations) = persisted.rotations {
        changed |= replace_if_changed(&mut snapshot.rotations, rotations);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CameraLayout, CameraRotations, PortConfigs, DEFAULT_BAUD_RATE};
    use crate::storage::{MemoryBackend, StorageBackend};
    use rig_bus::{decode_storage_change, LocalBus, TOPIC_STORAGE_CHANGE};

    #[derive(Default)]
    struct RecordingBackend {
        inner: MemoryBackend,
        writes: parking_lot::Mutex<Vec<(String, String)>>,
    }

    impl StorageBackend for RecordingBackend {
        fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.read(key)
        }

        fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.writes.lock().push((key.to_string(), value.to_string()));
            self.inner.write(key, value)
        }
    }

    fn store_over(backend: Arc<dyn StorageBackend>) -> ConsoleStore {
        ConsoleStore::load(DurableStorage::new(backend, Arc::new(LocalBus::new())))
    }

    fn pos(n: i64) -> DisplayPosition {
        DisplayPosition::new(n).unwrap()
    }

    fn cam(n: i64) -> CameraId {
        CameraId::new(n).unwrap()
    }

    fn port(n: i64) -> PortNumber {
        PortNumber::new(n).unwrap()
    }

    fn is_permutation(layout: &CameraLayout) -> bool {
        let mut cameras: Vec<u8> = layout.cameras().iter().map(|c| c.get()).collect();
        cameras.sort_unstable();
        cameras == vec![0, 1, 2, 3]
    }

    #[test]
    fn loads_defaults_from_empty_or_corrupt_storage() {
        let backend = MemoryBackend::new();
        backend.write(KEY_CAMERA_POSITIONS, "{\"1\": 2, \"2\": 2, \"3\": 0, \"4\": 1}").unwrap();
        let store = store_over(backend);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.layout, CameraLayout::identity());
        assert_eq!(snapshot.rotations, CameraRotations::default());
        assert_eq!(snapshot.server_status, ServerStatus::Unknown);
        for config in snapshot.ports.iter() {
            assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
            assert!(!config.connected);
            assert!(config.selected_device_path.is_empty());
        }
    }

    #[test]
    fn swapping_twice_restores_every_layout() {
        let store = store_over(MemoryBackend::new());
        for a in DisplayPosition::all() {
            for b in DisplayPosition::all() {
                let before = store.snapshot().layout;
                store.swap(a, b).unwrap();
                store.swap(a, b).unwrap();
                assert_eq!(store.snapshot().layout, before, "swap({a},{b}) twice");
            }
        }
    }

    #[test]
    fn any_swap_sequence_keeps_a_permutation_on_disk() {
        let backend = MemoryBackend::new();
        let store = store_over(backend.clone());
        let sequence = [(1, 2), (3, 4), (2, 3), (1, 4), (4, 4), (2, 1), (3, 1)];
        for (a, b) in sequence {
            store.swap(pos(a), pos(b)).unwrap();
            assert!(is_permutation(&store.snapshot().layout));
            let raw = backend.read(KEY_CAMERA_POSITIONS).unwrap().unwrap();
            let persisted: CameraLayout = serde_json::from_str(&raw).unwrap();
            assert_eq!(persisted, store.snapshot().layout);
        }
    }

    #[test]
    fn rotation_follows_the_camera_across_swaps() {
        let store = store_over(MemoryBackend::new());
        let camera = store.snapshot().layout.camera_at(pos(1));
        assert_eq!(store.rotate(camera).unwrap(), Rotation::Deg90);

        store.swap(pos(1), pos(3)).unwrap();
        let snapshot = store.snapshot();
        let slots = snapshot.slots();
        assert_eq!(slots[2].camera_id, camera);
        assert_eq!(slots[2].rotation, Rotation::Deg90);
        assert_eq!(slots[0].rotation, Rotation::Deg0);
    }

    #[test]
    fn port_change_writes_all_four_configs() {
        let backend = Arc::new(RecordingBackend::default());
        let store = store_over(backend.clone());

        store.set_baud_rate(port(3), 9600).unwrap();

        let writes = backend.writes.lock().clone();
        assert_eq!(writes.len(), 1);
        let (key, value) = &writes[0];
        assert_eq!(key, KEY_PORT_CONFIGS);
        let written: PortConfigs = serde_json::from_str(value).unwrap();
        let raw: serde_json::Value = serde_json::from_str(value).unwrap();
        assert_eq!(raw.as_array().map(Vec::len), Some(4));
        assert_eq!(written.get(port(3)).baud_rate, 9600);
        assert_eq!(written.get(port(1)).baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn self_swap_persists_without_notifying() {
        let backend = Arc::new(RecordingBackend::default());
        let store = store_over(backend.clone());
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.swap(pos(2), pos(2)).unwrap();

        assert_eq!(backend.writes.lock().len(), 1);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn selecting_a_new_device_drops_the_connection_flag() {
        let store = store_over(MemoryBackend::new());
        store.select_device(port(1), "/dev/ttyUSB0").unwrap();
        store.set_connected(port(1), true).unwrap();

        store.select_device(port(1), "/dev/ttyUSB0").unwrap();
        assert!(store.port(port(1)).connected);

        let config = store.select_device(port(1), " /dev/ttyUSB1 ").unwrap();
        assert_eq!(config.selected_device_path, "/dev/ttyUSB1");
        assert!(!config.connected);
        assert!(store.set_baud_rate(port(1), 0).is_err());
    }

    #[test]
    fn reducer_is_idempotent() {
        let store = store_over(MemoryBackend::new());
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        let mut layout = CameraLayout::identity();
        layout.swap(pos(1), pos(2));
        let persisted = PersistedState {
            layout: Some(layout),
            ..PersistedState::default()
        };

        assert!(store.apply_persisted(persisted.clone()));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!store.apply_persisted(persisted));
        assert!(!rx.has_changed().unwrap());
        assert!(!store.apply_persisted(PersistedState::default()));
    }

    #[test]
    fn ephemeral_values_notify_only_on_change() {
        let store = store_over(MemoryBackend::new());
        assert!(store.set_server_status(ServerStatus::Online));
        assert!(!store.set_server_status(ServerStatus::Online));
        assert!(store.set_message(SessionMessage::info("ready")));
        assert!(store.set_message(SessionMessage::error("lost port 2")));
        assert_eq!(
            store.snapshot().message,
            Some(SessionMessage::error("lost port 2"))
        );
        let link = CameraLink {
            connected: true,
            has_frame: false,
        };
        assert!(store.set_camera_link(cam(2), link));
        assert_eq!(store.snapshot().camera_link(cam(2)), link);
    }

    #[test]
    fn durable_writes_are_announced_on_the_store_bus() {
        let store = store_over(MemoryBackend::new());
        let mut changes = store.bus().subscribe(TOPIC_STORAGE_CHANGE);

        store.rotate(cam(1)).unwrap();

        let change = decode_storage_change(&changes.try_recv().unwrap()).unwrap();
        assert_eq!(change.key, KEY_CAMERA_ROTATIONS);
        assert_eq!(change.origin, store.context());
    }
}
