use reqwest::StatusCode;
use rig_core::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse classification the console surfaces to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Communication,
    DeviceBusy,
    Validation,
    Configuration,
}

impl RigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RigError::InvalidConfig(_) => ErrorKind::Configuration,
            RigError::Network(_)
            | RigError::HttpStatus { .. }
            | RigError::Rejected(_)
            | RigError::InvalidResponse(_) => ErrorKind::Communication,
            RigError::DeviceBusy(_) => ErrorKind::DeviceBusy,
            RigError::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn is_communication(&self) -> bool {
        self.kind() == ErrorKind::Communication
    }

    /// The request never got a 2xx answer from the backend.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RigError::Network(_) | RigError::HttpStatus { .. })
    }
}

impl From<ModelError> for RigError {
    fn from(err: ModelError) -> Self {
        RigError::Validation(err.to_string())
    }
}

/// Backend wording for "port already open elsewhere", in either language the
/// rig firmware and backend use.
pub(crate) fn is_busy_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["busy", "in use", "already open", "em uso", "ocupad"]
        .iter()
        .any(|needle| lower.contains(needle))
}
