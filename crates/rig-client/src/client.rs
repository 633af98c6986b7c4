use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use rig_core::{CameraId, CameraLink, PortNumber, TestReport};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::error::is_busy_message;
use crate::transport::{HttpReply, ReqwestTransport, RigTransport};
use crate::wire::{
    CommandAck, PneumaticEnvelope, PneumaticMessage, PollOutcome, PortsEnvelope,
    ProductionCounters, ProductionEnvelope, ReportEnvelope, SerialPortInfo, StatusEnvelope,
};
use crate::{RigConfig, RigError};

pub const START_COMMAND: &str = "START";
pub const CALIBRATION_COMMAND: &str = "START_CALIBRATION";

const MAX_ERROR_BODY: usize = 256;

/// One call per intent against the rig backend. Cheap to clone.
#[derive(Clone)]
pub struct RigClient {
    config: Arc<RigConfig>,
    transport: Arc<dyn RigTransport>,
}

impl RigClient {
    pub fn new(config: RigConfig) -> Result<Self, RigError> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self {
            config: Arc::new(config),
            transport,
        })
    }

    /// Builds a client over any transport; used by tests and by embedders that
    /// already own an HTTP stack.
    pub fn with_transport(config: RigConfig, transport: Arc<dyn RigTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub async fn send_command(
        &self,
        port: PortNumber,
        command: &str,
    ) -> Result<CommandAck, RigError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(RigError::Validation("command text is empty".into()));
        }
        let url = self.config.endpoint(&format!("send_command/{port}"))?;
        debug!(target = "rig.client", %port, command, "sending command");
        let reply = self
            .transport
            .post_json(url, Some(json!({ "command": command })))
            .await?;
        expect_success(&reply)
    }

    pub async fn start_test(&self, port: PortNumber) -> Result<CommandAck, RigError> {
        self.send_command(port, START_COMMAND).await
    }

    pub async fn start_calibration(&self, port: PortNumber) -> Result<CommandAck, RigError> {
        self.send_command(port, CALIBRATION_COMMAND).await
    }

    /// Opening an already-open port is allowed; the backend re-confirms it.
    pub async fn connect_port(
        &self,
        port: PortNumber,
        device_path: &str,
        baud_rate: Option<u32>,
    ) -> Result<CommandAck, RigError> {
        let device_path = device_path.trim();
        if device_path.is_empty() {
            return Err(RigError::Validation(format!(
                "no serial device selected for port {port}"
            )));
        }
        let mut body = json!({ "port": device_path });
        if let Some(baud) = baud_rate {
            body["baudrate"] = json!(baud);
        }
        let url = self.config.endpoint(&format!("connect_port/{port}"))?;
        debug!(target = "rig.client", %port, device_path, ?baud_rate, "connecting port");
        let reply = self.transport.post_json(url, Some(body)).await?;
        expect_success(&reply)
    }

    pub async fn disconnect_port(&self, port: PortNumber) -> Result<CommandAck, RigError> {
        let url = self.config.endpoint(&format!("disconnect_port/{port}"))?;
        debug!(target = "rig.client", %port, "disconnecting port");
        let reply = self.transport.get(url).await?;
        expect_success(&reply)
    }

    pub async fn list_ports(&self) -> Result<Vec<SerialPortInfo>, RigError> {
        let url = self.config.endpoint("get_serial_ports")?;
        let reply = self.transport.get(url).await?;
        let envelope: PortsEnvelope = decode_checked(&reply)?;
        check_status(envelope.status.as_deref(), envelope.message)?;
        Ok(envelope.ports)
    }

    pub async fn camera_status(&self, camera: CameraId) -> Result<CameraLink, RigError> {
        let url = self.config.endpoint(&format!("camera_status/{camera}"))?;
        let reply = self.transport.get(url).await?;
        decode_checked(&reply)
    }

    /// Fetches one still frame. Persisting it is the caller's job.
    pub async fn capture_frame(&self, camera: CameraId) -> Result<Bytes, RigError> {
        let url = self.config.endpoint(&format!("capture_frame/{camera}"))?;
        debug!(target = "rig.client", %camera, "capturing frame");
        let reply = self.transport.get(url).await?;
        ensure_2xx(&reply)?;
        if reply.body.is_empty() {
            return Err(RigError::InvalidResponse(format!(
                "camera {camera} returned an empty frame"
            )));
        }
        Ok(reply.body)
    }

    /// MJPEG stream location for viewers that render the live feed.
    pub fn stream_url(&self, camera: CameraId) -> Result<Url, RigError> {
        self.config.endpoint(&format!("stream/{camera}"))
    }

    pub async fn poll_status(&self) -> PollOutcome<()> {
        let url = match self.config.endpoint("status") {
            Ok(url) => url,
            Err(err) => return PollOutcome::Degraded(err.to_string()),
        };
        match self.transport.get(url).await {
            Ok(reply) if reply.status.is_success() => PollOutcome::Fresh(()),
            Ok(reply) => {
                PollOutcome::Unreachable(format!("status probe returned {}", reply.status))
            }
            Err(err) => PollOutcome::Unreachable(err.to_string()),
        }
    }

    pub async fn poll_report(&self) -> PollOutcome<TestReport> {
        let result = async {
            let url = self.config.endpoint("get_test_report")?;
            let reply = self.transport.get(url).await?;
            let envelope: ReportEnvelope = decode_checked(&reply)?;
            check_status(envelope.status.as_deref(), envelope.message)?;
            envelope
                .report
                .ok_or_else(|| RigError::InvalidResponse("report payload missing".into()))
        }
        .await;
        degrade("report", result)
    }

    pub async fn poll_pneumatic_message(&self) -> PollOutcome<PneumaticMessage> {
        let result = async {
            let url = self.config.endpoint("get_pneumatic_message")?;
            let reply = self.transport.get(url).await?;
            let envelope: PneumaticEnvelope = decode_checked(&reply)?;
            check_status(envelope.status.as_deref(), envelope.message.message.clone())?;
            Ok::<_, RigError>(envelope.message)
        }
        .await;
        degrade("pneumatic", result)
    }

    /// Starts the automated sequence for one side (cradle) of the rig.
    pub async fn start_process(&self, side: u8) -> Result<CommandAck, RigError> {
        if !(1..=2).contains(&side) {
            return Err(RigError::Validation(format!("rig side {side} must be 1 or 2")));
        }
        self.post_action(&format!("iniciar-processo/{side}")).await
    }

    pub async fn stop_process(&self) -> Result<CommandAck, RigError> {
        self.post_action("parar-processo").await
    }

    pub async fn emergency_stop(&self) -> Result<CommandAck, RigError> {
        warn!(target = "rig.client", "emergency stop requested");
        self.post_action("emergencia").await
    }

    pub async fn home_camera(&self) -> Result<CommandAck, RigError> {
        self.post_action("home-camera").await
    }

    pub async fn reset_board(&self, board: u8) -> Result<CommandAck, RigError> {
        if !(1..=2).contains(&board) {
            return Err(RigError::Validation(format!("board {board} must be 1 or 2")));
        }
        self.post_action(&format!("reset-placa/{board}")).await
    }

    pub async fn production_counters(&self) -> Result<ProductionCounters, RigError> {
        let url = self.config.endpoint("dados-producao")?;
        let reply = self.transport.get(url).await?;
        let envelope: ProductionEnvelope = decode_checked(&reply)?;
        Ok(ProductionCounters {
            approved: parse_counter("approved", &envelope.approved)?,
            rejected: parse_counter("rejected", &envelope.rejected)?,
        })
    }

    /// Sequence endpoints answer `{"message": ...}`; any 2xx is success.
    async fn post_action(&self, path: &str) -> Result<CommandAck, RigError> {
        let url = self.config.endpoint(path)?;
        debug!(target = "rig.client", path, "posting action");
        let reply = self.transport.post_json(url, None).await?;
        ensure_2xx(&reply)?;
        if reply.body.is_empty() {
            return Ok(CommandAck::default());
        }
        serde_json::from_slice(&reply.body)
            .map_err(|err| RigError::InvalidResponse(format!("{path}: {err}")))
    }
}

fn ensure_2xx(reply: &HttpReply) -> Result<(), RigError> {
    if reply.status == StatusCode::CONFLICT {
        let message = serde_json::from_slice::<StatusEnvelope>(&reply.body)
            .ok()
            .and_then(|envelope| envelope.message)
            .unwrap_or_else(|| "port already in use".to_string());
        return Err(RigError::DeviceBusy(message));
    }
    if !reply.status.is_success() {
        let body = reply.body_text().chars().take(MAX_ERROR_BODY).collect();
        return Err(RigError::HttpStatus {
            status: reply.status,
            body,
        });
    }
    Ok(())
}

fn decode_checked<T: DeserializeOwned>(reply: &HttpReply) -> Result<T, RigError> {
    ensure_2xx(reply)?;
    serde_json::from_slice(&reply.body).map_err(|err| RigError::InvalidResponse(err.to_string()))
}

/// A missing status is accepted for reads; an explicit non-success is not.
fn check_status(status: Option<&str>, message: Option<String>) -> Result<(), RigError> {
    match status {
        None | Some("success") | Some("ok") => Ok(()),
        Some(_) => Err(classify_rejection(message)),
    }
}

/// Commands only succeed when the backend echoes `status = success`.
fn expect_success(reply: &HttpReply) -> Result<CommandAck, RigError> {
    let envelope: StatusEnvelope = decode_checked(reply)?;
    match envelope.status.as_deref() {
        Some("success") => Ok(CommandAck {
            message: envelope.message,
        }),
        Some(_) => Err(classify_rejection(envelope.message)),
        None => Err(RigError::Rejected(
            envelope
                .message
                .unwrap_or_else(|| "backend did not confirm the command".into()),
        )),
    }
}

fn classify_rejection(message: Option<String>) -> RigError {
    let message = message.unwrap_or_else(|| "backend reported an error".into());
    if is_busy_message(&message) {
        RigError::DeviceBusy(message)
    } else {
        RigError::Rejected(message)
    }
}

fn degrade<T>(poll: &'static str, result: Result<T, RigError>) -> PollOutcome<T> {
    match result {
        Ok(value) => PollOutcome::Fresh(value),
        Err(err) if err.is_unreachable() => {
            debug!(target = "rig.client", poll, error = %err, "backend unreachable");
            PollOutcome::Unreachable(err.to_string())
        }
        Err(err) => {
            debug!(target = "rig.client", poll, error = %err, "poll degraded");
            PollOutcome::Degraded(err.to_string())
        }
    }
}

fn parse_counter(field: &str, raw: &str) -> Result<u64, RigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<u64>().map_err(|_| {
        RigError::InvalidResponse(format!("{field} counter '{raw}' is not a number"))
    })
}
