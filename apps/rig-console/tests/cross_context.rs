mod common;

use std::sync::Arc;
use std::time::Duration;

use common::open_store;
use rig_bus::{publish_storage_change, Bus, BusMessage, BusResult, LocalBus, StorageChange};
use rig_console::sync::{bus_observer, reread_loop};
use rig_console::TeardownGuard;
use rig_core::{CameraId, DisplayPosition, PortNumber, Rotation};
use rig_store::{
    CameraLayout, FileBackend, MemoryBackend, StorageBackend, KEY_CAMERA_POSITIONS,
};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

/// A bus that delivers nothing, as between contexts in separate processes.
struct SilentBus;

impl Bus for SilentBus {
    fn subscribe(&self, _topic: &str) -> broadcast::Receiver<BusMessage> {
        broadcast::channel(1).1
    }

    fn publish(&self, _topic: &str, _payload: bytes::Bytes) -> BusResult<usize> {
        Ok(0)
    }
}

fn pos(n: i64) -> DisplayPosition {
    DisplayPosition::new(n).unwrap()
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn swap_reaches_another_context_over_the_bus() {
    let storage: Arc<dyn StorageBackend> = MemoryBackend::new();
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let first = open_store(storage.clone(), bus.clone());
    let second = open_store(storage, bus);
    let mut updates = second.subscribe();
    let _observer = bus_observer(second.clone(), TeardownGuard::new());

    first.swap(pos(1), pos(3)).unwrap();

    timeout(Duration::from_secs(1), updates.changed())
        .await
        .expect("notified in time")
        .unwrap();
    assert_eq!(second.snapshot().layout, first.snapshot().layout);
    assert_eq!(
        second.snapshot().layout.camera_at(pos(1)),
        CameraId::new(2).unwrap()
    );
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn a_context_ignores_its_own_notices() {
    let storage: Arc<dyn StorageBackend> = MemoryBackend::new();
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let store = open_store(storage.clone(), bus.clone());
    let mut updates = store.subscribe();
    let _observer = bus_observer(store.clone(), TeardownGuard::new());

    // Someone rewrites storage behind the store's back.
    let mut layout = CameraLayout::identity();
    layout.swap(pos(2), pos(4));
    storage
        .write(KEY_CAMERA_POSITIONS, &serde_json::to_string(&layout).unwrap())
        .unwrap();

    let own = StorageChange {
        key: KEY_CAMERA_POSITIONS.into(),
        origin: store.context(),
    };
    publish_storage_change(bus.as_ref(), &own).unwrap();
    sleep(Duration::from_millis(200)).await;
    assert!(!updates.has_changed().unwrap());
    assert_eq!(store.snapshot().layout, CameraLayout::identity());

    let foreign = StorageChange {
        key: KEY_CAMERA_POSITIONS.into(),
        origin: rig_bus::ContextId::new(),
    };
    publish_storage_change(bus.as_ref(), &foreign).unwrap();
    timeout(Duration::from_secs(1), updates.changed())
        .await
        .expect("foreign change applied")
        .unwrap();
    assert_eq!(store.snapshot().layout, layout);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn reread_converges_without_a_bus() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn StorageBackend> = Arc::new(FileBackend::open(dir.path()).unwrap());
    let first = open_store(storage.clone(), Arc::new(SilentBus));
    let second = open_store(storage, Arc::new(SilentBus));
    let _reread = reread_loop(second.clone(), TeardownGuard::new(), Duration::from_secs(1));

    first.swap(pos(1), pos(2)).unwrap();
    first.rotate(CameraId::new(0).unwrap()).unwrap();
    first
        .select_device(PortNumber::new(4).unwrap(), "/dev/ttyUSB3")
        .unwrap();

    sleep(Duration::from_millis(1_500)).await;
    let seen = second.snapshot();
    assert_eq!(seen.layout, first.snapshot().layout);
    assert_eq!(seen.rotations.get(CameraId::new(0).unwrap()), Rotation::Deg90);
    assert_eq!(
        seen.ports.get(PortNumber::new(4).unwrap()).selected_device_path,
        "/dev/ttyUSB3"
    );
    // Rotation stays with camera 0, now shown at position 2.
    assert_eq!(seen.slots()[1].rotation, Rotation::Deg90);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn lagging_observer_falls_back_to_a_full_reread() {
    let storage: Arc<dyn StorageBackend> = MemoryBackend::new();
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::with_capacity(1));
    let first = open_store(storage.clone(), bus.clone());
    let second = open_store(storage, bus);
    let _observer = bus_observer(second.clone(), TeardownGuard::new());

    // No await in between, so the observer falls behind.
    first.swap(pos(1), pos(2)).unwrap();
    first.rotate(CameraId::new(3).unwrap()).unwrap();
    first.swap(pos(3), pos(4)).unwrap();
    first.rotate(CameraId::new(3).unwrap()).unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(second.snapshot().layout, first.snapshot().layout);
    assert_eq!(second.snapshot().rotations, first.snapshot().rotations);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn observers_stop_applying_after_teardown() {
    let storage: Arc<dyn StorageBackend> = MemoryBackend::new();
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let first = open_store(storage.clone(), bus.clone());
    let second = open_store(storage, bus);
    let guard = TeardownGuard::new();
    let _observer = bus_observer(second.clone(), guard.clone());
    let _reread = reread_loop(second.clone(), guard.clone(), Duration::from_secs(1));

    guard.tear_down();
    first.swap(pos(1), pos(4)).unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(second.snapshot().layout, CameraLayout::identity());
}
