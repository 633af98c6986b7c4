use std::time::Duration;

use url::Url;

use crate::RigError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Where the backend lives and how long to wait for it. Passed explicitly to
/// [`crate::RigClient`]; nothing about the backend is global.
#[derive(Clone, Debug)]
pub struct RigConfig {
    base_url: Url,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RigConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, RigError> {
        let mut base = base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(RigError::InvalidConfig(
                "backend base url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            let inferred_scheme = infer_scheme(&base);
            base = format!("{inferred_scheme}{base}");
        }
        // Url::join drops the last segment unless the path ends in '/'.
        if !base.ends_with('/') {
            base.push('/');
        }
        let parsed = Url::parse(&base)
            .map_err(|err| RigError::InvalidConfig(format!("invalid backend url: {err}")))?;
        Ok(Self {
            base_url: parsed,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(8),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, RigError> {
        self.base_url.join(path).map_err(|err| {
            RigError::InvalidConfig(format!("unable to build endpoint for {path}: {err}"))
        })
    }
}

/// Rig backends normally sit on the bench LAN, so private and loopback hosts
/// default to plain http.
fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower.starts_with("0.0.0.0")
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
        || host_lower
            .strip_prefix("172.")
            .and_then(|rest| rest.split('.').next())
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| (16..32).contains(&octet))
            .unwrap_or(false)
        || !host_lower.contains('.')
    {
        "http://"
    } else {
        "https://"
    }
}
