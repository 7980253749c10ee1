use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, QUOTED_ARG_COMMANDS, RAW_ARG_COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub play: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            play: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_command(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
}

fn parse_quoted_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

/// Classifies one line of player input: a slash command or a game action.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_command(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .command_args
                    .insert(spec.arg_key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(spec) = find_command(&command, QUOTED_ARG_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent.command_args.insert(
                    spec.arg_key.to_string(),
                    Value::String(parse_quoted_arg(arg)),
                );
                return intent;
            }

            if let Some(spec) = find_command(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("play", text);
    intent.play = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_a_play() {
        let intent = parse_intent("  open the airlock ");
        assert_eq!(intent.action, "play");
        assert_eq!(intent.play.as_deref(), Some("open the airlock"));
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_scenario_command() {
        let intent = parse_intent("/Scenario haunted-manor");
        assert_eq!(intent.action, "start_scenario");
        assert_eq!(intent.command_args["scenario"], json!("haunted-manor"));
        assert_eq!(intent.arg("scenario"), Some("haunted-manor"));

        assert_eq!(parse_intent("/scenario").arg("scenario"), None);
    }

    #[test]
    fn parse_key_accepts_quotes() {
        let intent = parse_intent("/key \"sk-abc 123\"");
        assert_eq!(intent.action, "set_api_key");
        assert_eq!(intent.command_args["value"], json!("sk-abc 123"));

        let bare = parse_intent("/key sk-plain-key-123");
        assert_eq!(bare.arg("value"), Some("sk-plain-key-123"));
    }

    #[test]
    fn parse_model_commands() {
        let text_model = parse_intent("/text_model gpt-4o-mini");
        assert_eq!(text_model.action, "set_text_model");
        assert_eq!(text_model.command_args["model"], json!("gpt-4o-mini"));

        let image_model = parse_intent("/image_model gpt-image-1");
        assert_eq!(image_model.action, "set_image_model");
        assert_eq!(image_model.command_args["model"], json!("gpt-image-1"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/log").action, "show_log");
        assert_eq!(parse_intent("/scenarios").action, "list_scenarios");
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }

    #[test]
    fn lone_slash_is_played_verbatim() {
        let intent = parse_intent("/ ");
        assert_eq!(intent.action, "play");
        assert_eq!(intent.play.as_deref(), Some("/"));
    }
}
