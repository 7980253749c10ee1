//! Test doubles for the gateway and orchestrator seams.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use narrator_contracts::session::{LogEntry, SceneImage};
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::orchestrator::SceneSink;
use crate::transport::{AlertSink, HttpReply, HttpTransport};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub url: String,
    pub bearer: String,
    pub payload: Value,
}

/// Replays queued replies in order and records every request.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Rc<RefCell<VecDeque<Result<HttpReply, String>>>>,
    calls: Rc<RefCell<Vec<RecordedCall>>>,
}

impl ScriptedTransport {
    pub fn push(&self, reply: HttpReply) {
        self.replies.borrow_mut().push_back(Ok(reply));
    }

    pub fn push_failure(&self, message: &str) {
        self.replies.borrow_mut().push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }
}

impl HttpTransport for ScriptedTransport {
    fn post_json(&self, url: &str, bearer: &str, payload: &Value) -> Result<HttpReply> {
        self.calls.borrow_mut().push(RecordedCall {
            url: url.to_string(),
            bearer: bearer.to_string(),
            payload: payload.clone(),
        });
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted reply left")),
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingAlert {
    messages: Rc<RefCell<Vec<String>>>,
}

impl RecordingAlert {
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl AlertSink for RecordingAlert {
    fn alert(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkLog {
    pub accepted: Vec<String>,
    pub replies: Vec<String>,
    pub images: Vec<SceneImage>,
    pub image_errors: Vec<String>,
    pub log: Vec<LogEntry>,
    pub clears: usize,
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Rc<RefCell<SinkLog>>,
}

impl RecordingSink {
    pub fn snapshot(&self) -> SinkLog {
        self.state.borrow().clone()
    }
}

impl SceneSink for RecordingSink {
    fn action_accepted(&mut self, action: &str) {
        self.state.borrow_mut().accepted.push(action.to_string());
    }

    fn show_reply(&mut self, reply: &str) {
        self.state.borrow_mut().replies.push(reply.to_string());
    }

    fn show_image(&mut self, image: &SceneImage) {
        self.state.borrow_mut().images.push(image.clone());
    }

    fn image_failed(&mut self, error: &GatewayError) {
        self.state.borrow_mut().image_errors.push(error.to_string());
    }

    fn log_cleared(&mut self) {
        let mut state = self.state.borrow_mut();
        state.clears += 1;
        state.log.clear();
    }

    fn log_appended(&mut self, entry: &LogEntry) {
        self.state.borrow_mut().log.push(entry.clone());
    }
}

pub fn text_reply(text: &str) -> HttpReply {
    HttpReply::ok(
        json!({
            "output": [{
                "type": "message",
                "content": [{ "type": "output_text", "text": text }]
            }]
        })
        .to_string(),
    )
}

pub fn image_reply(kind: &str, b64: &str) -> HttpReply {
    HttpReply::ok(
        json!({
            "output": [{
                "type": "message",
                "content": [{ "type": kind, "b64_json": b64 }]
            }]
        })
        .to_string(),
    )
}

/// Reference images attached to a recorded image request, in order.
pub fn attached_references(call: &RecordedCall) -> Vec<String> {
    call.payload["input"][0]["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|part| part["type"] == json!("input_image"))
        .filter_map(|part| part["image_url"].as_str())
        .map(|url| url.trim_start_matches("data:image/png;base64,").to_string())
        .collect()
}
