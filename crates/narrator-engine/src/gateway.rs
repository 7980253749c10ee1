use std::env;

use narrator_contracts::credentials::is_valid_credential;
use narrator_contracts::session::png_data_uri;
use serde_json::{json, Map, Value};

use crate::error::GatewayError;
use crate::transport::{AlertSink, HttpReply, HttpTransport, LogAlert, ReqwestTransport};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
pub const DEFAULT_IMAGE_SIZE: &str = "512x512";
pub const CONTINUITY_INSTRUCTION: &str =
    "Maintain consistent style, using the attached reference frames for continuity.";

const NO_OUTPUT_TEXT: &str = "No output text returned from OpenAI.";
const NO_OUTPUT_IMAGE: &str = "No output image returned from OpenAI.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub image_size: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Defaults with `OPENAI_API_BASE` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = non_empty_env("OPENAI_API_BASE") {
            config.api_base = base;
        }
        config.normalized()
    }

    pub fn normalized(mut self) -> Self {
        self.api_base = self.api_base.trim().trim_end_matches('/').to_string();
        if self.api_base.is_empty() {
            self.api_base = DEFAULT_API_BASE.to_string();
        }
        self
    }

    pub fn text_endpoint(&self) -> String {
        format!("{}/responses", self.api_base)
    }

    pub fn image_endpoint(&self) -> String {
        format!("{}/responses", self.api_base)
    }
}

/// Sampling defaults for the text endpoint; caller params are merged over them.
pub fn default_text_params(model: &str) -> Map<String, Value> {
    map_object(json!({
        "model": model,
        "temperature": 0.8,
        "max_output_tokens": 512,
        "top_p": 1,
        "frequency_penalty": 0.25,
        "presence_penalty": 0.25,
    }))
}

/// Text and image endpoints behind one bearer credential.
pub struct Gateway {
    config: GatewayConfig,
    transport: Box<dyn HttpTransport>,
    alert: Box<dyn AlertSink>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        transport: Box<dyn HttpTransport>,
        alert: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            transport,
            alert,
        }
    }

    /// Gateway over the blocking reqwest client.
    pub fn openai(config: GatewayConfig, alert: Option<Box<dyn AlertSink>>) -> Self {
        Self::new(
            config,
            Box::new(ReqwestTransport::new()),
            alert.unwrap_or_else(|| Box::new(LogAlert)),
        )
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn set_text_model(&mut self, model: &str) {
        self.config.text_model = model.trim().to_string();
    }

    pub fn set_image_model(&mut self, model: &str) {
        self.config.image_model = model.trim().to_string();
    }

    pub fn generate_text(
        &self,
        credential: &str,
        params: Map<String, Value>,
    ) -> Result<String, GatewayError> {
        let bearer = require_credential(credential)?;
        let mut payload = default_text_params(&self.config.text_model);
        for (key, value) in params {
            payload.insert(key, value);
        }

        let endpoint = self.config.text_endpoint();
        tracing::debug!(%endpoint, model = ?payload.get("model"), "requesting narration");
        let response = self.post(&endpoint, bearer, &Value::Object(payload))?;
        extract_output_text(&response)
            .map(str::to_string)
            .ok_or(GatewayError::MalformedResponse(NO_OUTPUT_TEXT))
    }

    /// Requests one scene image and returns its base64 PNG payload.
    /// `references` are prior scenes, newest first.
    pub fn generate_image(
        &self,
        credential: &str,
        prompt: &str,
        references: &[String],
    ) -> Result<String, GatewayError> {
        let bearer = require_credential(credential)?;
        let payload = self.image_payload(prompt, references);

        let endpoint = self.config.image_endpoint();
        tracing::debug!(
            %endpoint,
            model = %self.config.image_model,
            references = references.len(),
            "requesting scene image"
        );
        let response = self.post(&endpoint, bearer, &payload)?;
        extract_output_image(&response)
            .map(str::to_string)
            .ok_or(GatewayError::MalformedResponse(NO_OUTPUT_IMAGE))
    }

    fn image_payload(&self, prompt: &str, references: &[String]) -> Value {
        let trimmed = prompt.trim();
        let text = if references.is_empty() {
            trimmed.to_string()
        } else {
            format!("{trimmed}\n{CONTINUITY_INSTRUCTION}")
        };
        let mut content = vec![json!({ "type": "input_text", "text": text })];
        content.extend(references.iter().map(|b64| {
            json!({
                "type": "input_image",
                "image_url": png_data_uri(b64),
            })
        }));
        json!({
            "model": self.config.image_model,
            "input": [{ "role": "user", "content": content }],
            "size": self.config.image_size,
        })
    }

    fn post(&self, endpoint: &str, bearer: &str, payload: &Value) -> Result<Value, GatewayError> {
        let reply = self
            .transport
            .post_json(endpoint, bearer, payload)
            .map_err(|err| GatewayError::Transport {
                endpoint: endpoint.to_string(),
                message: error_chain_text(&err, 512),
            })?;
        self.response_json_or_error(endpoint, reply)
    }

    fn response_json_or_error(
        &self,
        endpoint: &str,
        reply: HttpReply,
    ) -> Result<Value, GatewayError> {
        let parsed: Option<Value> = serde_json::from_str(&reply.body).ok();
        if let Some(message) = parsed.as_ref().and_then(remote_error_message) {
            self.alert.alert(&format!("{message} (openai.com)"));
            return Err(GatewayError::RemoteApi { message });
        }
        if !reply.is_success() {
            return Err(GatewayError::Transport {
                endpoint: endpoint.to_string(),
                message: format!("({}): {}", reply.status, truncate_text(&reply.body, 512)),
            });
        }
        parsed.ok_or_else(|| GatewayError::Transport {
            endpoint: endpoint.to_string(),
            message: "returned invalid JSON payload".to_string(),
        })
    }
}

fn require_credential(credential: &str) -> Result<&str, GatewayError> {
    if is_valid_credential(credential) {
        Ok(credential)
    } else {
        Err(GatewayError::MissingCredential)
    }
}

fn remote_error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error").filter(|value| !value.is_null())?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Some(message)
}

fn output_content(payload: &Value) -> impl Iterator<Item = &Value> {
    payload
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .flat_map(|item| {
            item.get("content")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
        })
}

fn extract_output_text(payload: &Value) -> Option<&str> {
    output_content(payload)
        .find(|item| item.get("type").and_then(Value::as_str) == Some("output_text"))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

fn extract_output_image(payload: &Value) -> Option<&str> {
    output_content(payload)
        .find(|item| {
            matches!(
                item.get("type").and_then(Value::as_str),
                Some("output_image") | Some("image")
            )
        })
        .and_then(|item| item.get("b64_json"))
        .and_then(Value::as_str)
        .filter(|b64| !b64.is_empty())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(|last| last == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
