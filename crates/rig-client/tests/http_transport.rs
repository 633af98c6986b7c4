use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rig_client::{PollOutcome, RigClient, RigConfig, RigError};
use rig_core::{CameraId, PortNumber};
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn spawn_backend(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind backend stub");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("127.0.0.1:{}", addr.port())
}

fn stub_router(commands: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/status", get(|| async { StatusCode::OK }))
        .route(
            "/send_command/:port",
            post(move |Path(port): Path<u8>, Json(body): Json<Value>| {
                let commands = commands.clone();
                async move {
                    commands.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "status": "success",
                        "message": format!("port {port} <- {}", body["command"].as_str().unwrap_or("")),
                    }))
                }
            }),
        )
        .route(
            "/connect_port/:port",
            post(|Path(port): Path<u8>| async move {
                if port == 2 {
                    (
                        StatusCode::CONFLICT,
                        Json(json!({"status": "error", "message": "COM2 busy"})),
                    )
                } else {
                    (StatusCode::OK, Json(json!({"status": "success"})))
                }
            }),
        )
        .route(
            "/camera_status/:id",
            get(|Path(id): Path<u8>| async move {
                Json(json!({"connected": id != 3, "has_frame": id == 0}))
            }),
        )
        .route(
            "/capture_frame/:id",
            get(|| async { vec![0xffu8, 0xd8, 0xff, 0xe0] }),
        )
        .route(
            "/get_test_report",
            get(|| async {
                Json(json!({
                    "status": "success",
                    "relatorio": {
                        "resumo": {"aprovados": 1, "reprovados": 0, "total": 1},
                        "controles": {"1": [{"botao": "ON/OFF", "aprovado": true}]}
                    }
                }))
            }),
        )
}

#[test_timeout::tokio_timeout_test(20)]
async fn talks_to_a_live_backend() {
    let commands = Arc::new(AtomicUsize::new(0));
    let addr = spawn_backend(stub_router(commands.clone())).await;
    let client = RigClient::new(RigConfig::new(&addr).unwrap()).expect("client");

    assert!(client.poll_status().await.is_fresh());

    let ack = client
        .send_command(PortNumber::new(1).unwrap(), "G28")
        .await
        .expect("command ok");
    assert_eq!(ack.message.as_deref(), Some("port 1 <- G28"));
    assert_eq!(commands.load(Ordering::SeqCst), 1);

    client
        .connect_port(PortNumber::new(1).unwrap(), "/dev/ttyUSB0", Some(115_200))
        .await
        .expect("connect ok");
    let err = client
        .connect_port(PortNumber::new(2).unwrap(), "/dev/ttyUSB1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RigError::DeviceBusy(_)));

    let link = client
        .camera_status(CameraId::new(0).unwrap())
        .await
        .expect("camera status");
    assert!(link.connected && link.has_frame);

    let frame = client
        .capture_frame(CameraId::new(1).unwrap())
        .await
        .expect("frame");
    assert_eq!(frame.len(), 4);

    let report = client.poll_report().await.fresh().expect("report");
    assert!(report.control_passed(1));
}

#[test_timeout::tokio_timeout_test(20)]
async fn unreachable_backend_degrades_polls_and_fails_commands() {
    // Bind then drop so the port is very likely closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = RigConfig::new(format!("127.0.0.1:{}", addr.port()))
        .unwrap()
        .with_connect_timeout(Duration::from_millis(500))
        .with_request_timeout(Duration::from_secs(1));
    let client = RigClient::new(config).expect("client");

    assert!(matches!(client.poll_status().await, PollOutcome::Unreachable(_)));
    assert!(matches!(client.poll_report().await, PollOutcome::Unreachable(_)));

    let err = client
        .send_command(PortNumber::new(1).unwrap(), "START")
        .await
        .unwrap_err();
    assert!(err.is_communication());
}
