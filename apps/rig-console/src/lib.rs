//! Session and synchronization core of the rig operator console.
//!
//! A [`session::ConsoleSession`] is one console context. It polls the rig
//! backend through a [`rig_client::RigClient`], keeps a
//! [`rig_store::ConsoleStore`] current, and folds in durable changes made
//! by other contexts sharing the same storage.

pub mod cli;
pub mod config;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod telemetry;

pub use config::Config;
pub use scheduler::{PollCadence, PollHandle, PollScheduler, TeardownGuard};
pub use session::{ConsoleSession, SessionError};
