//! Identifiers and data model shared by the rig console crates.

mod ids;
mod message;
mod report;

pub use ids::{
    CameraId, DisplayPosition, ModelError, PortNumber, Rotation, CAMERA_COUNT, PORT_COUNT,
};
pub use message::{CameraLink, MessageKind, ServerStatus, SessionMessage};
pub use report::{ButtonResult, ControlIndex, ReportSummary, TestReport};
