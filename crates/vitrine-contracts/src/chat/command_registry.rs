#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Key the raw argument is stored under, when the command takes one.
    pub arg: &'static str,
}

const fn spec(command: &'static str, action: &'static str, arg: &'static str) -> CommandSpec {
    CommandSpec {
        command,
        action,
        arg,
    }
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    spec("text_model", "set_text_model", "model"),
    spec("image_model", "set_image_model", "model"),
    spec("format", "change_format", "format"),
    spec("vary", "vary", "edit"),
    spec("concept", "generate_concept", "theme"),
    spec("save_character", "save_character", "name"),
    spec("save_project", "save_project", "name"),
    spec("rewind", "rewind", "version_id"),
    spec("load_character", "load_character", "id"),
    spec("delete_character", "delete_character", "id"),
    spec("favorite", "toggle_favorite", "id"),
    spec("pin", "toggle_pin", "id"),
    spec("load_project", "load_project", "key"),
    spec("characters", "list_characters", "filter"),
];

/// Commands that update one generation parameter.
pub(crate) const SETTING_COMMANDS: &[CommandSpec] = &[
    spec("mode", "set_setting", "mode"),
    spec("style", "set_setting", "style"),
    spec("intention", "set_setting", "intention"),
    spec("pose", "set_setting", "pose"),
    spec("negative", "set_setting", "negative_prompt"),
    spec("overlay", "set_setting", "overlay_text"),
    spec("prompt", "set_setting", "prompt"),
    spec("framing", "set_setting", "framing"),
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    spec("face", "set_face", "path"),
    spec("pose_ref", "set_pose_reference", "path"),
    spec("export", "export_image", "path"),
];

/// `/<command> <slot-or-index> <rest>` commands.
pub(crate) const TARGETED_COMMANDS: &[CommandSpec] = &[
    spec("set", "set_slot_text", "text"),
    spec("image", "set_slot_image", "path"),
    spec("clear", "clear_slot", ""),
    spec("quick_image", "set_quick_image", "path"),
    spec("edit_image", "set_edit_image", "path"),
    spec("inpaint", "inpaint", "edit"),
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    spec("generate", "generate", ""),
    spec("upscale", "upscale", ""),
    spec("final_take", "final_take", ""),
    spec("lock", "lock_character", ""),
    spec("unlock", "unlock_character", ""),
    spec("reset", "reset", ""),
    spec("history", "history", ""),
    spec("state", "show_state", ""),
    spec("describe", "describe_scene", ""),
    spec("suggest", "suggest_edits", ""),
    spec("improve", "improve_prompt", ""),
    spec("improve_overlay", "improve_overlay", ""),
    spec("structure", "structure_prompt", ""),
    spec("captions", "generate_captions", ""),
    spec("projects", "list_projects", ""),
    spec("help", "help", ""),
    spec("quit", "quit", ""),
    spec("exit", "quit", ""),
];

pub(crate) const VIDEO_SCRIPT_COMMAND: CommandSpec =
    spec("video_script", "generate_video_script", "");

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/mode advanced|quick",
    "/prompt <scene description>",
    "/set <slot> <text>",
    "/image <slot> <path>",
    "/clear <slot>",
    "/framing <full_body|three_quarter|medium_shot|close_up>",
    "/quick_image <0-2> <path>",
    "/edit_image <0-2> <path>",
    "/face <path>",
    "/pose_ref <path>",
    "/style <text>",
    "/intention <text>",
    "/pose <text>",
    "/negative <text>",
    "/overlay <text>",
    "/generate",
    "/vary [edit]",
    "/upscale",
    "/format <w:h>",
    "/inpaint <mask path> [edit]",
    "/final_take",
    "/lock",
    "/unlock",
    "/history",
    "/rewind <version id>",
    "/reset",
    "/describe",
    "/suggest",
    "/improve",
    "/improve_overlay",
    "/structure",
    "/concept <theme>",
    "/captions",
    "/video_script [seconds] [camera style]",
    "/save_character [name]",
    "/characters [pinned|favorites]",
    "/load_character <id>",
    "/delete_character <id>",
    "/favorite <id>",
    "/pin <id>",
    "/save_project [name]",
    "/projects",
    "/load_project <key>",
    "/text_model <name>",
    "/image_model <name>",
    "/export <path>",
    "/state",
    "/quit",
];
