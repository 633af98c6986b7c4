//! Asynchronous client for the rig backend.
//!
//! Every operator or scheduler intent becomes exactly one HTTP call. Commands
//! return a typed result or a [`RigError`]; the `poll_*` reads never fail and
//! instead report [`PollOutcome::Degraded`] or [`PollOutcome::Unreachable`]
//! so polling loops can keep stale data. Nothing is retried here: recovery is always an explicit user action.

mod client;
mod config;
mod error;
mod transport;
mod wire;

pub use client::{RigClient, CALIBRATION_COMMAND, START_COMMAND};
pub use config::{RigConfig, DEFAULT_BASE_URL};
pub use error::{ErrorKind, RigError};
pub use reqwest::StatusCode;
pub use transport::{HttpReply, ReqwestTransport, RigTransport};
pub use wire::{CommandAck, PneumaticMessage, PollOutcome, ProductionCounters, SerialPortInfo};
