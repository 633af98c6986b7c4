use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use crate::{RigConfig, RigError};

/// Raw reply from the backend, before envelope interpretation.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpReply {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The HTTP seam under [`crate::RigClient`]. Non-2xx replies are returned as
/// replies, not errors; only transport failures are errors here.
#[async_trait]
pub trait RigTransport: Send + Sync {
    async fn get(&self, url: Url) -> Result<HttpReply, RigError>;

    async fn post_json(&self, url: Url, body: Option<Value>) -> Result<HttpReply, RigError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &RigConfig) -> Result<Self, RigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    async fn into_reply(response: reqwest::Response) -> Result<HttpReply, RigError> {
        let status = response.status();
        let body = response.bytes().await?;
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl RigTransport for ReqwestTransport {
    async fn get(&self, url: Url) -> Result<HttpReply, RigError> {
        let response = self.client.get(url).send().await?;
        Self::into_reply(response).await
    }

    async fn post_json(&self, url: Url, body: Option<Value>) -> Result<HttpReply, RigError> {
        let mut builder = self.client.post(url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;
        Self::into_reply(response).await
    }
}
