use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::session::LogEntry;

pub type EventPayload = Map<String, Value>;

/// Milestones of a play session, as written to the event log.
#[derive(Debug, Clone)]
pub enum SessionEvent<'a> {
    SessionStarted {
        text_model: &'a str,
        image_model: &'a str,
    },
    ScenarioStarted {
        scenario: &'a str,
    },
    TurnCompleted {
        entry: &'a LogEntry,
        caption: &'a str,
        references: usize,
    },
    TurnFailed {
        action: &'a str,
        error: &'a str,
    },
    ImageFailed {
        caption: &'a str,
        error: &'a str,
    },
}

impl SessionEvent<'_> {
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "session_started",
            SessionEvent::ScenarioStarted { .. } => "scenario_started",
            SessionEvent::TurnCompleted { .. } => "turn_completed",
            SessionEvent::TurnFailed { .. } => "turn_failed",
            SessionEvent::ImageFailed { .. } => "image_failed",
        }
    }

    /// Scene payloads are summarized; base64 bodies never reach the log.
    pub fn payload(&self) -> EventPayload {
        let value = match self {
            SessionEvent::SessionStarted {
                text_model,
                image_model,
            } => json!({
                "text_model": text_model,
                "image_model": image_model,
            }),
            SessionEvent::ScenarioStarted { scenario } => json!({ "scenario": scenario }),
            SessionEvent::TurnCompleted {
                entry,
                caption,
                references,
            } => json!({
                "action": entry.action,
                "reply": entry.reply,
                "caption": caption,
                "has_image": entry.image.is_some(),
                "references": references,
                "recorded_at": entry.recorded_at,
            }),
            SessionEvent::TurnFailed { action, error } => json!({
                "action": action,
                "error": error,
            }),
            SessionEvent::ImageFailed { caption, error } => json!({
                "caption": caption,
                "error": error,
            }),
        };
        value.as_object().cloned().unwrap_or_default()
    }
}

/// Append-only writer for a session's `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    pub fn record(&self, event: &SessionEvent<'_>) -> anyhow::Result<Value> {
        self.emit(event.event_type(), event.payload())
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
