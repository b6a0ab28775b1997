#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "unlock",
        action: "unlock",
        arg_key: "code",
    },
    CommandSpec {
        command: "channel",
        action: "load_channel",
        arg_key: "input",
    },
    CommandSpec {
        command: "generate",
        action: "generate",
        arg_key: "prompt",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "save",
    action: "save_result",
    arg_key: "path",
}];

pub(crate) const ID_LIST_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "select",
    action: "toggle_select",
    arg_key: "ids",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "more",
        action: "load_more",
        arg_key: "",
    },
    CommandSpec {
        command: "list",
        action: "list",
        arg_key: "",
    },
    CommandSpec {
        command: "clear",
        action: "clear_selection",
        arg_key: "",
    },
    CommandSpec {
        command: "retry",
        action: "retry",
        arg_key: "",
    },
    CommandSpec {
        command: "dismiss",
        action: "dismiss",
        arg_key: "",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
        arg_key: "",
    },
    CommandSpec {
        command: "quota",
        action: "quota",
        arg_key: "",
    },
    CommandSpec {
        command: "reconnect",
        action: "reconnect",
        arg_key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/unlock",
    "/channel",
    "/more",
    "/list",
    "/select",
    "/clear",
    "/generate",
    "/retry",
    "/dismiss",
    "/save",
    "/reset",
    "/quota",
    "/reconnect",
    "/status",
    "/help",
];
