use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::scenarios::ScenarioSpec;

pub const MAX_REFERENCE_IMAGES: usize = 3;
pub const OPENING_SCENE_IMAGE: &str = "opening-scene.png";
pub const OPENING_ACTION_LABEL: &str = "Game start";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingInput,
    ProcessingTurn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneImage {
    Url(String),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub action: Option<String>,
    pub reply: String,
    pub image: Option<SceneImage>,
    pub recorded_at: String,
}

impl LogEntry {
    pub fn new(action: Option<String>, reply: String, image: Option<SceneImage>) -> Self {
        Self {
            action,
            reply,
            image,
            recorded_at: now_utc_iso(),
        }
    }

    pub fn display_text(&self) -> String {
        let action = self.action.as_deref().unwrap_or(OPENING_ACTION_LABEL);
        format!("Your play: {action}\n\nGame: {}", self.reply)
    }
}

/// Most recent scene images, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceFrames {
    frames: Vec<String>,
}

impl ReferenceFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, b64: impl Into<String>) {
        self.frames.insert(0, b64.into());
        self.frames.truncate(MAX_REFERENCE_IMAGES);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn as_slice(&self) -> &[String] {
        self.frames.as_slice()
    }
}

/// Everything one game carries between turns.
///
/// The session is owned by the caller and handed to the orchestrator for
/// each turn, so there is no hidden state between calls.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub id: String,
    pub scenario: String,
    pub transcript: String,
    pub displayed_reply: String,
    pub log: Vec<LogEntry>,
    pub references: ReferenceFrames,
    pub state: TurnState,
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GameSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scenario: String::new(),
            transcript: String::new(),
            displayed_reply: String::new(),
            log: Vec::new(),
            references: ReferenceFrames::new(),
            state: TurnState::AwaitingInput,
        }
    }

    /// Session already reset to `scenario`'s opening.
    pub fn from_scenario(scenario: &ScenarioSpec) -> Self {
        let mut session = Self::new();
        session.reset(scenario);
        session
    }

    /// Clears transcript, log and reference frames, and records the opening
    /// entry with the static placeholder scene.
    pub fn reset(&mut self, scenario: &ScenarioSpec) -> &LogEntry {
        self.scenario = scenario.name.clone();
        self.transcript = scenario.opening.clone();
        self.displayed_reply.clear();
        self.log.clear();
        self.references.clear();
        self.state = TurnState::AwaitingInput;
        self.push_log(LogEntry::new(
            None,
            scenario.opening.clone(),
            Some(SceneImage::Url(OPENING_SCENE_IMAGE.to_string())),
        ))
    }

    /// Folds the reply on screen into the transcript, then appends the
    /// player's action with the play/game delimiters.
    pub fn append_action(&mut self, action: &str) {
        self.transcript.push_str(&self.displayed_reply);
        self.transcript.push_str(&format!("\n\n Your play: {action}\n Game: "));
    }

    pub fn push_log(&mut self, entry: LogEntry) -> &LogEntry {
        self.log.push(entry);
        &self.log[self.log.len() - 1]
    }

    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.log.last()
    }
}

pub fn png_data_uri(b64: &str) -> String {
    format!("data:image/png;base64,{b64}")
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
