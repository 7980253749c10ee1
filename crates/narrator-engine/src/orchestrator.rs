use anyhow::{Context, Result};
use narrator_contracts::caption::extract_caption;
use narrator_contracts::credentials::CredentialStore;
use narrator_contracts::events::{EventWriter, SessionEvent};
use narrator_contracts::scenarios::ScenarioSpec;
use narrator_contracts::session::{GameSession, LogEntry, SceneImage, TurnState};
use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::gateway::Gateway;

pub const GAME_PREAMBLE: &str = "You are a text-based adventure game, similar to Zork.  You describe where I am and what is around me. After that, present me short numbered list of choices for what I may do next.  Then I make a choice, and you respond by telling me what happens next, and then prompt me to make my next decision, and so on.";

/// Where a turn is shown to the player.
pub trait SceneSink {
    /// The action left the input field and is being played.
    fn action_accepted(&mut self, _action: &str) {}
    fn show_reply(&mut self, reply: &str);
    fn show_image(&mut self, image: &SceneImage);
    fn image_failed(&mut self, error: &GatewayError);
    fn log_cleared(&mut self) {}
    fn log_appended(&mut self, entry: &LogEntry);
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    pub caption: String,
    pub image: Option<String>,
    pub image_error: Option<String>,
}

pub struct TurnOrchestrator {
    gateway: Gateway,
    credentials: CredentialStore,
    sink: Box<dyn SceneSink>,
    events: Option<EventWriter>,
}

impl TurnOrchestrator {
    pub fn new(gateway: Gateway, credentials: CredentialStore, sink: Box<dyn SceneSink>) -> Self {
        Self {
            gateway,
            credentials,
            sink,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut Gateway {
        &mut self.gateway
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn credentials_mut(&mut self) -> &mut CredentialStore {
        &mut self.credentials
    }

    pub fn record(&self, event: SessionEvent<'_>) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.record(&event) {
            tracing::warn!(event = event.event_type(), error = %err, "failed to record session event");
        }
    }

    /// Resets `session` to the scenario's opening and shows the opening entry.
    pub fn start_scenario(&mut self, session: &mut GameSession, scenario: &ScenarioSpec) {
        self.sink.log_cleared();
        let opening = session.reset(scenario).clone();
        self.sink.log_appended(&opening);
        tracing::info!(scenario = %scenario.name, "scenario started");
        self.record(SessionEvent::ScenarioStarted {
            scenario: &scenario.name,
        });
    }

    /// Plays one action: narration first, then the scene image.
    ///
    /// A failed narration aborts the turn and leaves the transcript as it
    /// was. A failed image keeps the narration on screen, is reported through
    /// the sink, and the turn is logged without a picture.
    pub fn play_turn(&mut self, session: &mut GameSession, action: &str) -> Result<TurnOutcome> {
        session.state = TurnState::ProcessingTurn;
        let result = self.run_turn(session, action);
        session.state = TurnState::AwaitingInput;
        if let Err(err) = &result {
            let error = format!("{err:#}");
            tracing::warn!(%error, "turn aborted");
            self.record(SessionEvent::TurnFailed {
                action,
                error: &error,
            });
        }
        result
    }

    fn run_turn(&mut self, session: &mut GameSession, action: &str) -> Result<TurnOutcome> {
        let transcript_before = session.transcript.clone();
        session.append_action(action);
        self.sink.action_accepted(action);

        let mut params = Map::new();
        params.insert(
            "input".to_string(),
            Value::String(format!("{GAME_PREAMBLE}{}", session.transcript)),
        );
        let reply = match self.gateway.generate_text(self.credentials.get(), params) {
            Ok(reply) => reply.trim_start().to_string(),
            Err(err) => {
                session.transcript = transcript_before;
                return Err(err).context("narration request failed");
            }
        };
        session.displayed_reply = reply.clone();
        self.sink.show_reply(&reply);

        let caption = extract_caption(&reply);
        let references = session.references.as_slice().to_vec();
        let scene = self
            .gateway
            .generate_image(self.credentials.get(), &caption, &references);
        let (image, image_error) = match scene {
            Ok(b64) => {
                session.references.push(b64.clone());
                self.sink.show_image(&SceneImage::Base64(b64.clone()));
                (Some(b64), None)
            }
            Err(err) => {
                tracing::warn!(error = %err, %caption, "scene image failed");
                self.sink.image_failed(&err);
                let error = err.to_string();
                self.record(SessionEvent::ImageFailed {
                    caption: &caption,
                    error: &error,
                });
                (None, Some(error))
            }
        };

        let entry = session
            .push_log(LogEntry::new(
                Some(action.to_string()),
                reply.clone(),
                image.clone().map(SceneImage::Base64),
            ))
            .clone();
        self.sink.log_appended(&entry);
        self.record(SessionEvent::TurnCompleted {
            entry: &entry,
            caption: &caption,
            references: references.len(),
        });

        Ok(TurnOutcome {
            reply,
            caption,
            image,
            image_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use narrator_contracts::credentials::{CredentialStore, MemoryCookieJar};
    use narrator_contracts::events::EventWriter;
    use narrator_contracts::scenarios::ScenarioSpec;
    use narrator_contracts::session::{GameSession, SceneImage, TurnState, OPENING_SCENE_IMAGE};
    use serde_json::{json, Value};

    use super::{TurnOrchestrator, GAME_PREAMBLE};
    use crate::gateway::{Gateway, GatewayConfig};
    use crate::testing::{
        attached_references, image_reply, text_reply, RecordingAlert, RecordingSink,
        ScriptedTransport,
    };
    use crate::GatewayError;

    const KEY: &str = "sk-test-key-1234567890";

    struct Harness {
        transport: ScriptedTransport,
        sink: RecordingSink,
        orchestrator: TurnOrchestrator,
    }

    fn harness(credential: &str) -> anyhow::Result<Harness> {
        let transport = ScriptedTransport::default();
        let sink = RecordingSink::default();
        let gateway = Gateway::new(
            GatewayConfig::default(),
            Box::new(transport.clone()),
            Box::new(RecordingAlert::default()),
        );
        let mut credentials = CredentialStore::new(Box::new(MemoryCookieJar::new()), true);
        credentials.apply(credential, false)?;
        let orchestrator = TurnOrchestrator::new(gateway, credentials, Box::new(sink.clone()));
        Ok(Harness {
            transport,
            sink,
            orchestrator,
        })
    }

    fn scenario(opening: &str) -> ScenarioSpec {
        ScenarioSpec {
            name: "crash".to_string(),
            title: "Crash".to_string(),
            opening: opening.to_string(),
        }
    }

    #[test]
    fn airlock_turn_trims_reply_captions_image_and_logs() -> anyhow::Result<()> {
        let mut h = harness(KEY)?;
        let mut session = GameSession::new();
        h.orchestrator
            .start_scenario(&mut session, &scenario("Crash site.\n\n"));
        h.transport.push(text_reply(
            "  You open the airlock and feel cold air rush in. 1. Step outside 2. Wait",
        ));
        h.transport.push(image_reply("output_image", "SU1H"));

        let outcome = h.orchestrator.play_turn(&mut session, "open the airlock")?;

        let trimmed = "You open the airlock and feel cold air rush in. 1. Step outside 2. Wait";
        assert_eq!(outcome.reply, trimmed);
        assert_eq!(session.displayed_reply, trimmed);
        assert_eq!(outcome.caption, "You open the airlock and feel cold air rush in.");
        assert_eq!(outcome.image.as_deref(), Some("SU1H"));
        assert_eq!(session.state, TurnState::AwaitingInput);

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].payload["input"],
            json!(format!(
                "{GAME_PREAMBLE}Crash site.\n\n\n\n Your play: open the airlock\n Game: "
            ))
        );
        assert_eq!(
            calls[1].payload["input"][0]["content"][0]["text"],
            json!("You open the airlock and feel cold air rush in.")
        );

        let entry = session.last_entry().cloned();
        assert_eq!(
            entry.as_ref().and_then(|entry| entry.action.clone()).as_deref(),
            Some("open the airlock")
        );
        assert_eq!(entry.as_ref().map(|entry| entry.reply.as_str()), Some(trimmed));
        assert_eq!(
            entry.and_then(|entry| entry.image),
            Some(SceneImage::Base64("SU1H".to_string()))
        );

        let shown = h.sink.snapshot();
        assert_eq!(shown.accepted, vec!["open the airlock".to_string()]);
        assert_eq!(shown.replies, vec![trimmed.to_string()]);
        assert_eq!(shown.log.len(), 2);
        Ok(())
    }

    #[test]
    fn next_turn_folds_previous_reply_into_transcript() -> anyhow::Result<()> {
        let mut h = harness(KEY)?;
        let mut session = GameSession::new();
        h.orchestrator.start_scenario(&mut session, &scenario("Start.\n\n"));
        h.transport.push(text_reply("First reply."));
        h.transport.push(image_reply("output_image", "MQ=="));
        h.transport.push(text_reply("Second reply."));
        h.transport.push(image_reply("output_image", "Mg=="));

        h.orchestrator.play_turn(&mut session, "look")?;
        h.orchestrator.play_turn(&mut session, "wait")?;

        assert_eq!(
            session.transcript,
            "Start.\n\n\n\n Your play: look\n Game: First reply.\n\n Your play: wait\n Game: "
        );
        Ok(())
    }

    #[test]
    fn reference_frames_follow_newest_first_order() -> anyhow::Result<()> {
        let mut h = harness(KEY)?;
        let mut session = GameSession::new();
        h.orchestrator.start_scenario(&mut session, &scenario("Start.\n\n"));
        for b64 in ["A", "B", "C", "D", "E"] {
            h.transport.push(text_reply("Scene."));
            h.transport.push(image_reply("output_image", b64));
        }
        for _ in 0..5 {
            h.orchestrator.play_turn(&mut session, "go on")?;
        }

        let image_calls: Vec<Vec<String>> = h
            .transport
            .calls()
            .iter()
            .skip(1)
            .step_by(2)
            .map(attached_references)
            .collect();
        assert_eq!(image_calls[0], Vec::<String>::new());
        assert_eq!(image_calls[1], vec!["A"]);
        assert_eq!(image_calls[4], vec!["D", "C", "B"]);
        assert_eq!(session.references.as_slice(), ["E", "D", "C"]);
        Ok(())
    }

    #[test]
    fn scenario_reset_drops_reference_frames() -> anyhow::Result<()> {
        let mut h = harness(KEY)?;
        let mut session = GameSession::new();
        h.orchestrator.start_scenario(&mut session, &scenario("Start.\n\n"));
        for b64 in ["A", "B"] {
            h.transport.push(text_reply("Scene."));
            h.transport.push(image_reply("output_image", b64));
            h.orchestrator.play_turn(&mut session, "go on")?;
        }

        h.orchestrator
            .start_scenario(&mut session, &scenario("Elsewhere.\n\n"));
        assert_eq!(session.log.len(), 1);
        assert_eq!(
            session.log[0].image,
            Some(SceneImage::Url(OPENING_SCENE_IMAGE.to_string()))
        );
        assert_eq!(h.sink.snapshot().clears, 2);

        h.transport.push(text_reply("New scene."));
        h.transport.push(image_reply("output_image", "Z"));
        h.orchestrator.play_turn(&mut session, "look")?;

        let calls = h.transport.calls();
        let last_image_call = calls.last().map(attached_references);
        assert_eq!(last_image_call, Some(Vec::new()));
        Ok(())
    }

    #[test]
    fn missing_credential_aborts_before_any_request() -> anyhow::Result<()> {
        let mut h = harness("short")?;
        let mut session = GameSession::new();
        h.orchestrator.start_scenario(&mut session, &scenario("Start.\n\n"));

        let err = h
            .orchestrator
            .play_turn(&mut session, "look")
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert_eq!(err, "narration request failed: Need an api-key");
        assert!(h.transport.calls().is_empty());
        assert_eq!(session.transcript, "Start.\n\n");
        assert_eq!(session.state, TurnState::AwaitingInput);
        assert_eq!(session.log.len(), 1);
        Ok(())
    }

    #[test]
    fn image_failure_keeps_reply_and_logs_turn_without_image() -> anyhow::Result<()> {
        let mut h = harness(KEY)?;
        let mut session = GameSession::new();
        h.orchestrator.start_scenario(&mut session, &scenario("Start.\n\n"));
        h.transport.push(text_reply("A storm rolls in.\n1. Hide\n2. Run"));
        h.transport.push_failure("connection reset");

        let outcome = h.orchestrator.play_turn(&mut session, "look up")?;

        assert_eq!(session.displayed_reply, "A storm rolls in.\n1. Hide\n2. Run");
        assert_eq!(outcome.image, None);
        assert!(outcome
            .image_error
            .as_deref()
            .unwrap_or("")
            .contains("connection reset"));
        assert!(session.references.as_slice().is_empty());
        assert_eq!(session.log.len(), 2);
        assert_eq!(session.log[1].image, None);

        let shown = h.sink.snapshot();
        assert_eq!(shown.image_errors.len(), 1);
        assert!(shown.images.is_empty());
        Ok(())
    }

    #[test]
    fn remote_error_on_narration_aborts_turn() -> anyhow::Result<()> {
        let mut h = harness(KEY)?;
        let mut session = GameSession::new();
        h.orchestrator.start_scenario(&mut session, &scenario("Start.\n\n"));
        h.transport.push(crate::HttpReply {
            status: 429,
            body: json!({ "error": { "message": "Rate limit reached" } }).to_string(),
        });

        let err = h.orchestrator.play_turn(&mut session, "look").err();
        let remote = err
            .as_ref()
            .and_then(|err| err.downcast_ref::<GatewayError>())
            .map(|err| matches!(err, GatewayError::RemoteApi { .. }));
        assert_eq!(remote, Some(true));
        assert_eq!(h.transport.calls().len(), 1);
        assert!(h.sink.snapshot().replies.is_empty());
        Ok(())
    }

    #[test]
    fn turns_are_written_to_the_event_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let h = harness(KEY)?;
        let transport = h.transport.clone();
        let mut orchestrator = h
            .orchestrator
            .with_events(EventWriter::new(&path, "session-1"));
        let mut session = GameSession::new();
        orchestrator.start_scenario(&mut session, &scenario("Start.\n\n"));
        transport.push(text_reply("Dust everywhere. 1. Sneeze"));
        transport.push(image_reply("output_image", "RA=="));
        orchestrator.play_turn(&mut session, "sweep")?;

        let raw = std::fs::read_to_string(&path)?;
        let events: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect();
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(types, vec!["scenario_started", "turn_completed"]);
        assert_eq!(events[1]["caption"], json!("Dust everywhere."));
        assert_eq!(events[1]["references"], json!(0));
        Ok(())
    }
}
