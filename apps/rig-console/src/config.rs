use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rig_client::DEFAULT_BASE_URL;

use crate::scheduler::PollCadence;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub state_dir: PathBuf,
    pub capture_dir: PathBuf,
    pub request_timeout: Duration,
    pub cadence: PollCadence,
    /// When set, a Prometheus scrape endpoint is served on this address.
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cadence = PollCadence {
            status: millis_var("RIG_POLL_STATUS_MS").unwrap_or(defaults.cadence.status),
            camera: millis_var("RIG_POLL_CAMERA_MS").unwrap_or(defaults.cadence.camera),
            report: millis_var("RIG_POLL_REPORT_MS").unwrap_or(defaults.cadence.report),
            pneumatic: millis_var("RIG_POLL_PNEUMATIC_MS").unwrap_or(defaults.cadence.pneumatic),
            sync: millis_var("RIG_POLL_SYNC_MS").unwrap_or(defaults.cadence.sync),
        };
        let state_dir = env::var("RIG_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);
        // Captures land next to the persisted state unless told otherwise.
        let capture_dir = env::var("RIG_CAPTURE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| state_dir.join("captures"));
        let request_timeout =
            millis_var("RIG_REQUEST_TIMEOUT_MS").unwrap_or(defaults.request_timeout);

        Self {
            backend_url: env::var("RIG_BACKEND_URL").unwrap_or(defaults.backend_url),
            state_dir,
            capture_dir,
            request_timeout,
            cadence,
            metrics_addr: env::var("RIG_METRICS_ADDR")
                .ok()
                .and_then(|addr| addr.parse().ok()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = PathBuf::from("rig-state");
        Self {
            backend_url: DEFAULT_BASE_URL.to_string(),
            capture_dir: state_dir.join("captures"),
            state_dir,
            request_timeout: Duration::from_secs(8),
            cadence: PollCadence::default(),
            metrics_addr: None,
        }
    }
}

/// Positive millisecond counts only; anything else falls back to the default.
fn millis_var(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
