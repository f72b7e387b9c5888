use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SETTING_COMMANDS, SINGLE_PATH_COMMANDS,
    TARGETED_COMMANDS, VIDEO_SCRIPT_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> &str {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

fn find_spec<'a>(command: &str, specs: &'a [CommandSpec]) -> Option<&'a CommandSpec> {
    specs.iter().find(|spec| spec.command == command)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Splits `<target> <rest>`; the target honours shell quoting so paths with
/// spaces survive, the rest is kept verbatim.
fn split_target(arg: &str) -> (String, String) {
    let trimmed = arg.trim_start();
    if let Some(quote) = trimmed.chars().next().filter(|ch| *ch == '"' || *ch == '\'') {
        if let Some(end) = trimmed[1..].find(quote) {
            let target = trimmed[1..1 + end].to_string();
            let rest = trimmed[end + 2..].trim().to_string();
            return (target, rest);
        }
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((head, tail)) => (head.to_string(), tail.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

fn parse_video_script_args(arg: &str) -> (Option<u64>, String) {
    let (head, tail) = split_target(arg);
    let seconds = head.trim_end_matches('s').parse::<u64>().ok();
    match seconds {
        Some(value) => (Some(value), tail),
        None => (None, arg.trim().to_string()),
    }
}

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
            let remainder = &slash_tail[command_len..];
            let arg = remainder.trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .command_args
                    .insert(spec.arg.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(spec) = find_spec(&command, SETTING_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .settings_update
                    .insert(spec.arg.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent.command_args.insert(
                    spec.arg.to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(spec) = find_spec(&command, TARGETED_COMMANDS) {
                let (target, rest) = split_target(arg);
                let mut intent = Intent::new(spec.action, text);
                intent
                    .command_args
                    .insert("target".to_string(), Value::String(target));
                if !spec.arg.is_empty() {
                    let rest = if spec.arg == "path" {
                        parse_single_path_arg(&rest)
                    } else {
                        rest
                    };
                    intent
                        .command_args
                        .insert(spec.arg.to_string(), Value::String(rest));
                }
                return intent;
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            if command == VIDEO_SCRIPT_COMMAND.command {
                let (seconds, camera) = parse_video_script_args(arg);
                let mut intent = Intent::new(VIDEO_SCRIPT_COMMAND.action, text);
                intent.command_args.insert(
                    "duration_s".to_string(),
                    seconds.map(Value::from).unwrap_or(Value::Null),
                );
                intent
                    .command_args
                    .insert("camera_style".to_string(), Value::String(camera));
                return intent;
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

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_generates_with_prompt() {
        let intent = parse_intent("  model on a rooftop at dusk ");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.prompt.as_deref(), Some("model on a rooftop at dusk"));
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_slot_commands() {
        let set = parse_intent("/set char woman, red hair");
        assert_eq!(set.action, "set_slot_text");
        assert_eq!(set.command_args["target"], json!("char"));
        assert_eq!(set.command_args["text"], json!("woman, red hair"));

        let image = parse_intent("/image bg \"/tmp/my beach.png\"");
        assert_eq!(image.action, "set_slot_image");
        assert_eq!(image.command_args["target"], json!("bg"));
        assert_eq!(image.command_args["path"], json!("/tmp/my beach.png"));

        let clear = parse_intent("/clear cloth");
        assert_eq!(clear.action, "clear_slot");
        assert_eq!(clear.arg_str("target"), "cloth");
    }

    #[test]
    fn parse_inpaint_with_quoted_mask() {
        let intent = parse_intent("/inpaint \"/tmp/a mask.png\" make the sky pink");
        assert_eq!(intent.action, "inpaint");
        assert_eq!(intent.command_args["target"], json!("/tmp/a mask.png"));
        assert_eq!(intent.command_args["edit"], json!("make the sky pink"));
    }

    #[test]
    fn parse_single_path_commands() {
        let face = parse_intent("/face \"/tmp/a b.png\"");
        assert_eq!(face.action, "set_face");
        assert_eq!(face.command_args["path"], json!("/tmp/a b.png"));

        let export = parse_intent("/export out.png");
        assert_eq!(export.action, "export_image");
        assert_eq!(export.command_args["path"], json!("out.png"));
    }

    #[test]
    fn parse_setting_and_model_commands() {
        let mode = parse_intent("/mode quick");
        assert_eq!(mode.action, "set_setting");
        assert_eq!(mode.settings_update["mode"], json!("quick"));

        let negative = parse_intent("/negative no hats");
        assert_eq!(negative.settings_update["negative_prompt"], json!("no hats"));

        let text_model = parse_intent("/text_model gemini-2.5-flash");
        assert_eq!(text_model.action, "set_text_model");
        assert_eq!(text_model.command_args["model"], json!("gemini-2.5-flash"));
    }

    #[test]
    fn parse_generation_commands() {
        assert_eq!(parse_intent("/generate").action, "generate");
        assert_eq!(parse_intent("/upscale").action, "upscale");
        assert_eq!(parse_intent("/final_take").action, "final_take");

        let vary = parse_intent("/vary swap the jacket for a trench coat");
        assert_eq!(vary.action, "vary");
        assert_eq!(vary.arg_str("edit"), "swap the jacket for a trench coat");

        let format = parse_intent("/format 16:9");
        assert_eq!(format.action, "change_format");
        assert_eq!(format.arg_str("format"), "16:9");
    }

    #[test]
    fn parse_video_script_arguments() {
        let intent = parse_intent("/video_script 8s slow dolly in");
        assert_eq!(intent.action, "generate_video_script");
        assert_eq!(intent.command_args["duration_s"], json!(8));
        assert_eq!(intent.command_args["camera_style"], json!("slow dolly in"));

        let bare = parse_intent("/video_script handheld");
        assert_eq!(bare.command_args["duration_s"], json!(null));
        assert_eq!(bare.command_args["camera_style"], json!("handheld"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
