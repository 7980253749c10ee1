use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP seam for the gateway.
pub trait HttpTransport {
    fn post_json(&self, url: &str, bearer: &str, payload: &Value) -> Result<HttpReply>;
}

/// User-facing notice raised when an endpoint reports an error.
pub trait AlertSink {
    fn alert(&self, message: &str);
}

/// Alert sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlert;

impl AlertSink for LogAlert {
    fn alert(&self, message: &str) {
        tracing::warn!(alert = message, "remote endpoint reported an error");
    }
}

pub struct ReqwestTransport {
    http: HttpClient,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(&self, url: &str, bearer: &str, payload: &Value) -> Result<HttpReply> {
        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .json(payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({url})"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("OpenAI response body read failed ({url})"))?;
        Ok(HttpReply { status, body })
    }
}
