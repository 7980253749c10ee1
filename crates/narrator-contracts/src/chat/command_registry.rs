#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "scenario",
        action: "start_scenario",
        arg_key: "scenario",
    },
    CommandSpec {
        command: "text_model",
        action: "set_text_model",
        arg_key: "model",
    },
    CommandSpec {
        command: "image_model",
        action: "set_image_model",
        arg_key: "model",
    },
];

pub(crate) const QUOTED_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "key",
    action: "set_api_key",
    arg_key: "value",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "scenarios",
        action: "list_scenarios",
        arg_key: "",
    },
    CommandSpec {
        command: "log",
        action: "show_log",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/scenario <name>",
    "/scenarios",
    "/key <api-key>",
    "/text_model <model>",
    "/image_model <model>",
    "/log",
    "/help",
    "/quit",
];
