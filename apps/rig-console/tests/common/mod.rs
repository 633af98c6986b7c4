#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig_bus::Bus;
use rig_client::{HttpReply, RigClient, RigConfig, RigError, RigTransport, StatusCode};
use rig_console::ConsoleSession;
use rig_store::{ConsoleStore, DurableStorage, StorageBackend};
use serde_json::{json, Value};
use url::Url;

/// In-process stand-in for the rig backend. Answers from a path-keyed
/// table, counts every request, and can be taken offline or slowed down.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: parking_lot::Mutex<HashMap<String, HttpReply>>,
    requests: parking_lot::Mutex<Vec<(String, Option<Value>)>>,
    calls: AtomicUsize,
    offline: AtomicBool,
    delay: parking_lot::Mutex<Option<Duration>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A backend that answers every poll successfully.
    pub fn healthy() -> Arc<Self> {
        let backend = Self::new();
        backend.reply_json("status", json!({"status": "ok"}));
        backend.reply_json(
            "get_test_report",
            json!({"status": "success", "relatorio": {
                "resumo": {"aprovados": 2, "reprovados": 0, "total": 2},
                "controles": {"1": [{"botao": "POWER", "aprovado": true}]}
            }}),
        );
        backend.reply_json("get_pneumatic_message", json!({"status": "success", "ready": true}));
        for camera in 0..4 {
            backend.reply_json(
                &format!("camera_status/{camera}"),
                json!({"connected": true, "has_frame": camera != 3}),
            );
        }
        backend
    }

    pub fn reply(&self, path: &str, reply: HttpReply) {
        self.replies.lock().insert(path.to_string(), reply);
    }

    pub fn reply_json(&self, path: &str, body: Value) {
        self.reply(path, HttpReply::json(StatusCode::OK, &body));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, Option<Value>)> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|(p, _)| p == path).count()
    }

    async fn answer(&self, url: Url, body: Option<Value>) -> Result<HttpReply, RigError> {
        let path = url.path().trim_start_matches('/').to_string();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push((path.clone(), body));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RigError::Rejected("connection refused".into()));
        }
        Ok(self
            .replies
            .lock()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| HttpReply::new(StatusCode::NOT_FOUND, "")))
    }
}

#[async_trait]
impl RigTransport for ScriptedBackend {
    async fn get(&self, url: Url) -> Result<HttpReply, RigError> {
        self.answer(url, None).await
    }

    async fn post_json(&self, url: Url, body: Option<Value>) -> Result<HttpReply, RigError> {
        self.answer(url, body).await
    }
}

pub fn client_for(backend: Arc<ScriptedBackend>) -> RigClient {
    RigClient::with_transport(RigConfig::new("localhost:8000").unwrap(), backend)
}

pub fn open_store(storage: Arc<dyn StorageBackend>, bus: Arc<dyn Bus>) -> Arc<ConsoleStore> {
    Arc::new(ConsoleStore::load(DurableStorage::new(storage, bus)))
}

pub fn open_session(
    backend: Arc<ScriptedBackend>,
    storage: Arc<dyn StorageBackend>,
    bus: Arc<dyn Bus>,
    capture_dir: &Path,
) -> ConsoleSession {
    ConsoleSession::new(client_for(backend), open_store(storage, bus), capture_dir)
}
