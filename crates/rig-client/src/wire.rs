use rig_core::TestReport;
use serde::{Deserialize, Serialize};

/// Acknowledgement of a command-style call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub device: String,
    #[serde(default)]
    pub description: String,
}

/// Latest pneumatic-trigger message; the backend sends `START` when the
/// operator fires the physical trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PneumaticMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ready: bool,
}

impl PneumaticMessage {
    pub fn is_start(&self) -> bool {
        self.message
            .as_deref()
            .map(|text| text.trim().eq_ignore_ascii_case("START"))
            .unwrap_or(false)
    }
}

/// Day counters kept by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProductionCounters {
    pub approved: u64,
    pub rejected: u64,
}

/// Result of a read that must never fail loudly. Anything but `Fresh` keeps
/// whatever the caller already had.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Fresh(T),
    /// The backend answered, but with nothing usable.
    Degraded(String),
    /// No 2xx answer came back at all.
    Unreachable(String),
}

impl<T> PollOutcome<T> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, PollOutcome::Fresh(_))
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, PollOutcome::Unreachable(_))
    }

    pub fn fresh(self) -> Option<T> {
        match self {
            PollOutcome::Fresh(value) => Some(value),
            PollOutcome::Degraded(_) | PollOutcome::Unreachable(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PollOutcome::Fresh(_) => None,
            PollOutcome::Degraded(reason) | PollOutcome::Unreachable(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortsEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ports: Vec<SerialPortInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "relatorio", default)]
    pub report: Option<TestReport>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PneumaticEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub message: PneumaticMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProductionEnvelope {
    #[serde(rename = "txt_aprovado_display1", default)]
    pub approved: String,
    #[serde(rename = "txt_reprovado_display2", default)]
    pub rejected: String,
}
