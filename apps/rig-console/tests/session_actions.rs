mod common;

use std::sync::Arc;

use common::{open_session, ScriptedBackend};
use rig_bus::LocalBus;
use rig_client::{HttpReply, RigError, StatusCode};
use rig_console::{ConsoleSession, SessionError};
use rig_core::{CameraId, MessageKind, PortNumber};
use rig_store::MemoryBackend;
use serde_json::json;

fn port(n: i64) -> PortNumber {
    PortNumber::new(n).unwrap()
}

fn session_with(backend: Arc<ScriptedBackend>, capture_dir: &std::path::Path) -> ConsoleSession {
    open_session(backend, MemoryBackend::new(), Arc::new(LocalBus::new()), capture_dir)
}

fn last_message(session: &ConsoleSession) -> (MessageKind, String) {
    let message = session.snapshot().message.expect("session message");
    (message.kind, message.text)
}

#[test_timeout::tokio_timeout_test(10)]
async fn connect_marks_the_port_connected() {
    let backend = ScriptedBackend::new();
    backend.reply_json("connect_port/2", json!({"status": "success"}));
    let session = session_with(backend.clone(), &std::env::temp_dir());

    session.select_device(port(2), "/dev/ttyUSB1").unwrap();
    session.set_baud_rate(port(2), 9600).unwrap();
    let config = session.connect_port(port(2)).await.unwrap();

    assert!(config.connected);
    assert!(session.store().port(port(2)).connected);
    let (kind, text) = last_message(&session);
    assert_eq!(kind, MessageKind::Success);
    assert!(text.contains("/dev/ttyUSB1"), "{text}");

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    let (path, body) = &requests[0];
    assert_eq!(path, "connect_port/2");
    assert_eq!(
        body.as_ref().unwrap(),
        &json!({"port": "/dev/ttyUSB1", "baudrate": 9600})
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn busy_port_stays_disconnected() {
    let backend = ScriptedBackend::new();
    backend.reply(
        "connect_port/1",
        HttpReply::json(
            StatusCode::CONFLICT,
            &json!({"status": "error", "message": "COM1 is in use"}),
        ),
    );
    let session = session_with(backend, &std::env::temp_dir());
    session.select_device(port(1), "COM1").unwrap();

    let err = session.connect_port(port(1)).await.unwrap_err();

    assert!(matches!(err, SessionError::Client(RigError::DeviceBusy(_))));
    assert!(!session.store().port(port(1)).connected);
    let (kind, _) = last_message(&session);
    assert_eq!(kind, MessageKind::Error);
}

#[test_timeout::tokio_timeout_test(10)]
async fn connect_without_a_device_never_reaches_the_backend() {
    let backend = ScriptedBackend::new();
    let session = session_with(backend.clone(), &std::env::temp_dir());

    let err = session.connect_port(port(3)).await.unwrap_err();

    assert!(matches!(err, SessionError::NoDeviceSelected(p) if p == port(3)));
    assert_eq!(backend.calls(), 0);
    assert_eq!(last_message(&session).0, MessageKind::Error);
}

#[test_timeout::tokio_timeout_test(10)]
async fn rejected_command_surfaces_an_error_message() {
    let backend = ScriptedBackend::new();
    backend.reply_json(
        "send_command/1",
        json!({"status": "error", "message": "port not open"}),
    );
    let session = session_with(backend, &std::env::temp_dir());

    assert!(session.start_test(port(1)).await.is_err());
    let (kind, text) = last_message(&session);
    assert_eq!(kind, MessageKind::Error);
    assert!(text.contains("port not open"), "{text}");
}

#[test_timeout::tokio_timeout_test(10)]
async fn captured_frame_lands_in_the_capture_dir() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new();
    backend.reply(
        "capture_frame/1",
        HttpReply::new(StatusCode::OK, vec![0xff, 0xd8, 0xff, 0xd9]),
    );
    let captures = dir.path().join("captures");
    let session = session_with(backend, &captures);

    let path = session.capture_frame(CameraId::new(1).unwrap()).await.unwrap();

    assert_eq!(path.parent(), Some(captures.as_path()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("camera_1_") && name.ends_with(".jpg"), "{name}");
    assert_eq!(std::fs::read(&path).unwrap(), vec![0xff, 0xd8, 0xff, 0xd9]);
    assert_eq!(last_message(&session).0, MessageKind::Success);
}

#[test_timeout::tokio_timeout_test(10)]
async fn empty_frame_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new();
    backend.reply("capture_frame/0", HttpReply::new(StatusCode::OK, Vec::new()));
    let session = session_with(backend, dir.path());

    assert!(session.capture_frame(CameraId::new(0).unwrap()).await.is_err());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
