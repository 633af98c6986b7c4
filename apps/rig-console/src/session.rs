use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rig_client::{CommandAck, ProductionCounters, RigClient, RigError, SerialPortInfo};
use rig_core::{CameraId, DisplayPosition, PortNumber, Rotation, SessionMessage};
use rig_store::{ConsoleSnapshot, ConsoleStore, PortConfig, StoreError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::scheduler::{PollCadence, PollScheduler};
use crate::sync::{bus_observer, reread_loop};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] RigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no serial device selected for port {0}")]
    NoDeviceSelected(PortNumber),
    #[error("failed to save capture to {path}: {source}")]
    Capture {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One console context: a store, the client that feeds it, and the loops
/// that keep it fresh while the context is open.
pub struct ConsoleSession {
    client: RigClient,
    store: Arc<ConsoleStore>,
    capture_dir: PathBuf,
    scheduler: Option<PollScheduler>,
}

impl ConsoleSession {
    pub fn new(
        client: RigClient,
        store: Arc<ConsoleStore>,
        capture_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            store,
            capture_dir: capture_dir.into(),
            scheduler: None,
        }
    }

    pub fn client(&self) -> &RigClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<ConsoleStore> {
        &self.store
    }

    pub fn snapshot(&self) -> ConsoleSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsoleSnapshot> {
        self.store.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Starts the backend polls and both cross-context observers. Calling it
    /// again restarts everything with the new cadence.
    pub fn start_polling(&mut self, cadence: PollCadence) {
        self.stop_polling();
        let mut scheduler = PollScheduler::start(self.client.clone(), self.store.clone(), cadence);
        scheduler.push(bus_observer(self.store.clone(), scheduler.guard()));
        scheduler.push(reread_loop(self.store.clone(), scheduler.guard(), cadence.sync));
        info!(
            target = "rig.session",
            context = %self.store.context(),
            loops = ?scheduler.loop_names(),
            "polling started"
        );
        self.scheduler = Some(scheduler);
    }

    /// Deterministic teardown: after this returns nothing from a poll tick
    /// reaches the store.
    pub fn stop_polling(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.teardown();
            info!(target = "rig.session", context = %self.store.context(), "polling stopped");
        }
    }

    pub fn select_device(
        &self,
        port: PortNumber,
        device_path: &str,
    ) -> Result<PortConfig, SessionError> {
        let result = self
            .store
            .select_device(port, device_path)
            .map_err(SessionError::from);
        self.report(result, |config| {
            format!("Port {port} will use {}", config.selected_device_path)
        })
    }

    pub fn set_baud_rate(
        &self,
        port: PortNumber,
        baud_rate: u32,
    ) -> Result<PortConfig, SessionError> {
        let result = self
            .store
            .set_baud_rate(port, baud_rate)
            .map_err(SessionError::from);
        self.report(result, |config| {
            format!("Port {port} baud rate set to {}", config.baud_rate)
        })
    }

    /// Connects the device selected for `port`. The port is marked
    /// disconnected before the attempt and connected only once the backend
    /// acknowledges it.
    pub async fn connect_port(&self, port: PortNumber) -> Result<PortConfig, SessionError> {
        let result = self.try_connect(port).await;
        self.report(result, |config| {
            format!("Port {port} connected to {}", config.selected_device_path)
        })
    }

    async fn try_connect(&self, port: PortNumber) -> Result<PortConfig, SessionError> {
        let config = self.store.port(port);
        if !config.has_device() {
            return Err(SessionError::NoDeviceSelected(port));
        }
        self.store.set_connected(port, false)?;
        self.client
            .connect_port(port, &config.selected_device_path, Some(config.baud_rate))
            .await?;
        Ok(self.store.set_connected(port, true)?)
    }

    pub async fn disconnect_port(&self, port: PortNumber) -> Result<PortConfig, SessionError> {
        let result = async {
            self.client.disconnect_port(port).await?;
            Ok::<_, SessionError>(self.store.set_connected(port, false)?)
        }
        .await;
        self.report(result, |_| format!("Port {port} disconnected"))
    }

    pub async fn send_command(
        &self,
        port: PortNumber,
        command: &str,
    ) -> Result<CommandAck, SessionError> {
        let result = self
            .client
            .send_command(port, command)
            .await
            .map_err(SessionError::from);
        self.report(result, |ack| {
            ack_text(ack, format!("Sent '{}' to port {port}", command.trim()))
        })
    }

    pub async fn start_test(&self, port: PortNumber) -> Result<CommandAck, SessionError> {
        let result = self.client.start_test(port).await.map_err(SessionError::from);
        self.report(result, |ack| ack_text(ack, format!("Test started on port {port}")))
    }

    pub async fn start_calibration(&self, port: PortNumber) -> Result<CommandAck, SessionError> {
        let result = self
            .client
            .start_calibration(port)
            .await
            .map_err(SessionError::from);
        self.report(result, |ack| {
            ack_text(ack, format!("Calibration started on port {port}"))
        })
    }

    pub fn swap_cameras(
        &self,
        a: DisplayPosition,
        b: DisplayPosition,
    ) -> Result<(), SessionError> {
        let result = self.store.swap(a, b).map_err(SessionError::from);
        self.report(result, |_| format!("Swapped cameras at positions {a} and {b}"))
    }

    pub fn rotate_camera(&self, camera: CameraId) -> Result<Rotation, SessionError> {
        let result = self.store.rotate(camera).map_err(SessionError::from);
        self.report(result, |rotation| format!("Camera {camera} rotated to {rotation}"))
    }

    /// Grabs one frame and writes it as `camera_<id>_<timestamp>.jpg` under
    /// the capture directory. Returns the written path.
    pub async fn capture_frame(&self, camera: CameraId) -> Result<PathBuf, SessionError> {
        let result = async {
            let frame = self.client.capture_frame(camera).await?;
            let path = capture_path(&self.capture_dir, camera);
            write_capture(&path, &frame).await?;
            Ok::<_, SessionError>(path)
        }
        .await;
        self.report(result, |path| {
            format!("Saved frame from camera {camera} to {}", path.display())
        })
    }

    pub async fn refresh_ports(&self) -> Result<Vec<SerialPortInfo>, SessionError> {
        let result = self.client.list_ports().await.map_err(SessionError::from);
        self.report(result, |ports| format!("Found {} serial port(s)", ports.len()))
    }

    pub async fn start_process(&self, side: u8) -> Result<CommandAck, SessionError> {
        let result = self.client.start_process(side).await.map_err(SessionError::from);
        self.report(result, |ack| {
            ack_text(ack, format!("Process started on side {side}"))
        })
    }

    pub async fn stop_process(&self) -> Result<CommandAck, SessionError> {
        let result = self.client.stop_process().await.map_err(SessionError::from);
        self.report(result, |ack| ack_text(ack, "Process stopped"))
    }

    pub async fn emergency_stop(&self) -> Result<CommandAck, SessionError> {
        let result = self.client.emergency_stop().await.map_err(SessionError::from);
        self.report(result, |ack| ack_text(ack, "Emergency stop engaged"))
    }

    pub async fn home_camera(&self) -> Result<CommandAck, SessionError> {
        let result = self.client.home_camera().await.map_err(SessionError::from);
        self.report(result, |ack| ack_text(ack, "Camera axis homed"))
    }

    pub async fn reset_board(&self, board: u8) -> Result<CommandAck, SessionError> {
        let result = self.client.reset_board(board).await.map_err(SessionError::from);
        self.report(result, |ack| ack_text(ack, format!("Board {board} reset")))
    }

    pub async fn production_counters(&self) -> Result<ProductionCounters, SessionError> {
        let result = self
            .client
            .production_counters()
            .await
            .map_err(SessionError::from);
        self.report(result, |counters| {
            format!("Approved {}, rejected {}", counters.approved, counters.rejected)
        })
    }

    /// Every user action ends with exactly one session message.
    fn report<T>(
        &self,
        result: Result<T, SessionError>,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T, SessionError> {
        match &result {
            Ok(value) => {
                self.store.set_message(SessionMessage::success(describe(value)));
            }
            Err(err) => {
                warn!(target = "rig.session", error = %err, "action failed");
                self.store.set_message(SessionMessage::error(err.to_string()));
            }
        }
        result
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

fn ack_text(ack: &CommandAck, fallback: impl Display) -> String {
    match ack.message.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => fallback.to_string(),
    }
}

fn capture_path(dir: &Path, camera: CameraId) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
    dir.join(format!("camera_{camera}_{stamp}.jpg"))
}

async fn write_capture(path: &Path, frame: &[u8]) -> Result<(), SessionError> {
    let capture_err = |source| SessionError::Capture {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(capture_err)?;
    }
    tokio::fs::write(path, frame).await.map_err(capture_err)
}
