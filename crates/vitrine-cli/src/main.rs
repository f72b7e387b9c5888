use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use vitrine_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use vitrine_contracts::error::StudioError;
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::library::LibraryFilter;
use vitrine_contracts::scene::{AspectRatio, Framing, ImageData, SlotId};
use vitrine_contracts::session::Mode;
use vitrine_contracts::storage::FileStore;
use vitrine_engine::providers::resolve_api;
use vitrine_engine::{EngineConfig, GenerationOutcome, Orchestrator, Studio};

#[derive(Debug, Parser)]
#[command(name = "vitrine", version, about = "Fashion and product image studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive slash-command session.
    Chat(ChatArgs),
    /// One quick-mode generation written to the output directory.
    Generate(GenerateArgs),
}

#[derive(Debug, Clone, Args)]
struct StudioArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "dryrun")]
    provider: String,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    /// JSON file backing the character library and projects.
    #[arg(long)]
    store: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    studio: StudioArgs,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[command(flatten)]
    studio: StudioArgs,
    #[arg(long, default_value = "")]
    prompt: String,
    /// Up to three reference images.
    #[arg(long)]
    reference: Vec<PathBuf>,
    #[arg(long, default_value = "1:1")]
    format: String,
    #[arg(long)]
    style: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vitrine error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
    }
}

fn open_studio(args: &StudioArgs) -> Result<Studio> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let config = EngineConfig::from_env();
    let resolved = resolve_api(
        &config,
        &args.provider,
        args.text_model.as_deref(),
        args.image_model.as_deref(),
    )?;
    for selection in [&resolved.text, &resolved.image] {
        if let Some(reason) = &selection.fallback_reason {
            eprintln!("vitrine: {reason}");
        }
    }

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| args.out.join("studio-store.json"));
    let events = EventWriter::new(events_path, session_id());
    let orchestrator = Orchestrator::new(resolved.api, &config, events);
    Ok(Studio::open(
        orchestrator,
        Box::new(FileStore::new(store_path)),
        &config,
    )?)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut studio = open_studio(&args.studio)?;
    studio.switch_mode(Mode::Quick);
    studio.state_mut().format = parse_format(&args.format)?;
    if let Some(style) = args.style.as_deref() {
        studio.state_mut().params.style = style.trim().to_string();
    }
    studio.state_mut().quick.description = args.prompt.trim().to_string();
    if args.reference.len() > 3 {
        bail!("at most 3 reference images are supported");
    }
    for (index, path) in args.reference.iter().enumerate() {
        let image = read_image(path)?;
        studio.state_mut().quick.set_reference_image(index, Some(image))?;
    }

    match studio.generate() {
        Ok(outcome) => {
            report_outcome(&studio, &args.studio.out, outcome)?;
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}", err.user_message());
            Ok(1)
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

struct ChatSession {
    studio: Studio,
    args: StudioArgs,
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let studio = open_studio(&args.studio)?;
    let mut session = ChatSession {
        studio,
        args: args.studio,
    };

    let stdin = io::stdin();
    let mut line = String::new();
    println!(
        "Vitrine chat started ({} provider). Type /help for commands.",
        session.studio.provider_name()
    );

    loop {
        print!("[{}]> ", session.studio.mode());
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match session.handle(&intent) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => match err.downcast_ref::<StudioError>() {
                Some(studio_err) => println!("{}", studio_err.user_message()),
                None => println!("error: {err:#}"),
            },
        }
    }
    Ok(())
}

impl ChatSession {
    fn handle(&mut self, intent: &Intent) -> Result<Flow> {
        match intent.action.as_str() {
            "noop" => {}
            "quit" => return Ok(Flow::Quit),
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "unknown" => println!(
                "Unknown command /{}. Type /help for commands.",
                intent.arg_str("command")
            ),
            "set_text_model" | "set_image_model" => self.switch_model(intent)?,
            "set_setting" => self.apply_settings(intent)?,
            "set_slot_text" => {
                let slot = parse_slot(intent.arg_str("target"))?;
                self.studio.set_slot_text(slot, intent.arg_str("text").trim());
                println!("{} text set.", slot.title());
            }
            "set_slot_image" => {
                let slot = parse_slot(intent.arg_str("target"))?;
                let image = read_image(Path::new(required(intent, "path")?))?;
                self.studio.set_slot_image(slot, image)?;
                println!("{} image set.", slot.title());
            }
            "clear_slot" => {
                let slot = parse_slot(intent.arg_str("target"))?;
                self.studio.clear_slot(slot);
                println!("{} cleared.", slot.title());
            }
            "set_quick_image" | "set_edit_image" => {
                let index = intent
                    .arg_str("target")
                    .parse::<usize>()
                    .map_err(|_| anyhow!("expected an image index 0-2"))?;
                let path = intent.arg_str("path").trim();
                let image = if path.is_empty() {
                    None
                } else {
                    Some(read_image(Path::new(path))?)
                };
                let quick = &mut self.studio.state_mut().quick;
                if intent.action == "set_quick_image" {
                    quick.set_reference_image(index, image)?;
                } else {
                    quick.set_edit_image(index, image)?;
                }
                println!("Quick image {index} updated.");
            }
            "set_face" => {
                let image = read_image(Path::new(required(intent, "path")?))?;
                self.studio.set_new_character_face(image);
                println!("New face staged for the next variation.");
            }
            "set_pose_reference" => {
                let image = read_image(Path::new(required(intent, "path")?))?;
                self.studio.set_pose_reference(image);
                println!("Pose reference staged for the next generation.");
            }
            "generate" => {
                if let Some(prompt) = intent.prompt.as_deref() {
                    self.set_scene_description(prompt);
                }
                let outcome = self.studio.generate()?;
                self.report(outcome)?;
            }
            "vary" => {
                let edit = intent.arg_str("edit");
                let outcome = self.studio.vary(Some(edit))?;
                self.report(outcome)?;
            }
            "upscale" => {
                let outcome = self.studio.upscale()?;
                self.report(outcome)?;
            }
            "change_format" => {
                let target = parse_format(intent.arg_str("format"))?;
                match self.studio.change_format(target)? {
                    Some(outcome) => self.report(outcome)?,
                    None => println!("Format set to {target}."),
                }
            }
            "inpaint" => {
                let mask = read_image(Path::new(required(intent, "target")?))?;
                let outcome = self.studio.inpaint(intent.arg_str("edit"), mask)?;
                self.report(outcome)?;
            }
            "final_take" => {
                let outcome = self.studio.final_take()?;
                self.report(outcome)?;
            }
            "lock_character" => {
                self.studio.lock_character()?;
                println!("Character locked to the current image.");
            }
            "unlock_character" => {
                self.studio.unlock_character();
                println!("Character unlocked.");
            }
            "reset" => {
                self.studio.reset_generation_panel();
                println!("Generation panel reset.");
            }
            "history" => self.print_history(),
            "rewind" => {
                let scene = self.studio.rewind(required(intent, "version_id")?)?;
                println!("Rewound. Scene description: {scene}");
            }
            "show_state" => self.print_state(),
            "describe_scene" => println!("{}", self.studio.describe_scene()?),
            "suggest_edits" => {
                for (index, suggestion) in self.studio.suggest_edits()?.iter().enumerate() {
                    println!("{}. {suggestion}", index + 1);
                }
            }
            "improve_prompt" => println!("{}", self.studio.improve_prompt()?),
            "improve_overlay" => {
                let mode = self.studio.mode();
                println!("{}", self.studio.improve_overlay_text(mode)?);
            }
            "structure_prompt" => {
                let structured = self.studio.structure_prompt()?;
                self.studio.apply_structured_prompt(&structured);
                println!("{}", serde_json::to_string_pretty(&structured)?);
            }
            "generate_concept" => {
                let applied = self
                    .studio
                    .generate_concept(intent.arg_str("theme"), None, "")?;
                for (slot, text) in applied {
                    println!("{}: {text}", slot.title());
                }
            }
            "generate_captions" => {
                for caption in self.studio.generate_captions()? {
                    println!("- {caption}");
                }
            }
            "generate_video_script" => {
                let duration = intent.command_args.get("duration_s").and_then(Value::as_u64);
                let script = self
                    .studio
                    .generate_video_script(duration, Some(intent.arg_str("camera_style")))?;
                println!("{}\n\n{}", script.summary, script.script);
            }
            "save_character" => {
                let character = self.studio.save_character(optional(intent, "name"))?;
                println!("Saved {} ({}).", character.name, character.id);
            }
            "list_characters" => {
                let filter = LibraryFilter::parse(intent.arg_str("filter"));
                let characters = self.studio.list_characters(filter);
                if characters.is_empty() {
                    println!("No saved characters.");
                }
                for character in characters {
                    let mut flags = String::new();
                    if character.is_pinned {
                        flags.push_str(" [pinned]");
                    }
                    if character.is_favorite {
                        flags.push_str(" [favorite]");
                    }
                    println!("{}  {}{flags}", character.id, character.name);
                }
            }
            "load_character" => {
                self.studio.load_character(required(intent, "id")?)?;
                println!("Character loaded into advanced mode.");
            }
            "delete_character" => {
                self.studio.delete_character(required(intent, "id")?)?;
                println!("Character deleted.");
            }
            "toggle_favorite" => {
                self.studio.toggle_favorite(required(intent, "id")?)?;
                println!("Favorite toggled.");
            }
            "toggle_pin" => {
                self.studio.toggle_pin(required(intent, "id")?)?;
                println!("Pin toggled.");
            }
            "save_project" => {
                let key = self.studio.save_project(optional(intent, "name"))?;
                println!("Project saved as {key}.");
            }
            "list_projects" => {
                let projects = self.studio.list_projects()?;
                if projects.is_empty() {
                    println!("No saved projects.");
                }
                for project in projects {
                    println!("{}  {}  {}", project.key, project.name, project.saved_at);
                }
            }
            "load_project" => {
                let name = self.studio.load_project(required(intent, "key")?)?;
                println!("Loaded project {name}.");
            }
            "export_image" => {
                let path = PathBuf::from(required(intent, "path")?);
                let version = self
                    .studio
                    .state()
                    .history_for(self.studio.mode())
                    .current()
                    .ok_or_else(|| anyhow!("nothing to export yet"))?;
                export_image(&version.image, &path)?;
                println!("Exported {} to {}.", version.version_id, path.display());
            }
            other => println!("Action '{other}' is not available here."),
        }
        Ok(Flow::Continue)
    }

    fn apply_settings(&mut self, intent: &Intent) -> Result<()> {
        for (key, value) in &intent.settings_update {
            let value = value.as_str().unwrap_or_default().trim();
            let mode = self.studio.mode();
            match key.as_str() {
                "mode" => {
                    let mode = value.parse::<Mode>().map_err(anyhow::Error::msg)?;
                    self.studio.switch_mode(mode);
                }
                "framing" => {
                    self.studio.state_mut().scene.framing =
                        value.parse::<Framing>().map_err(anyhow::Error::msg)?;
                }
                "prompt" => self.set_scene_description(value),
                "overlay_text" => self.studio.state_mut().params.set_overlay_for(mode, value),
                "style" => self.studio.state_mut().params.style = value.to_string(),
                "intention" => self.studio.state_mut().params.intention = value.to_string(),
                "pose" => self.studio.state_mut().params.pose = value.to_string(),
                "negative_prompt" => {
                    self.studio.state_mut().params.negative_prompt = value.to_string()
                }
                other => bail!("unknown setting '{other}'"),
            }
            println!("{key} set.");
        }
        Ok(())
    }

    /// Model changes rebuild the studio on the same store; live state carries over.
    fn switch_model(&mut self, intent: &Intent) -> Result<()> {
        let model = required(intent, "model")?.to_string();
        let mut args = self.args.clone();
        if intent.action == "set_text_model" {
            args.text_model = Some(model.clone());
        } else {
            args.image_model = Some(model.clone());
        }
        let state = self.studio.state().clone();
        let mut studio = open_studio(&args)?;
        *studio.state_mut() = state;
        self.studio = studio;
        self.args = args;
        println!("Model set to {model}.");
        Ok(())
    }

    fn set_scene_description(&mut self, text: &str) {
        let text = text.trim().to_string();
        match self.studio.mode() {
            Mode::Advanced => self.studio.state_mut().base_prompt = text,
            Mode::Quick => self.studio.state_mut().quick.description = text,
        }
    }

    fn report(&self, outcome: GenerationOutcome) -> Result<()> {
        report_outcome(&self.studio, &self.args.out, outcome)
    }

    fn print_history(&self) {
        let history = self.studio.state().history_for(self.studio.mode());
        if history.is_empty() {
            println!("No versions yet.");
            return;
        }
        let current = history.current().map(|version| version.version_id.as_str());
        for version in history.versions() {
            let marker = if Some(version.version_id.as_str()) == current {
                "*"
            } else {
                " "
            };
            println!(
                "{marker} {} {} {} (from {})",
                version.version_id,
                version.origin,
                version.format,
                version.parent_version_id.as_deref().unwrap_or("-"),
            );
        }
    }

    fn print_state(&self) {
        let state = self.studio.state();
        println!("mode: {}", state.active_mode);
        println!("format: {}", state.format);
        println!("style: {}", state.params.style);
        println!("intention: {}", state.params.intention);
        println!("framing: {}", state.scene.framing.label());
        for slot in SlotId::ALL {
            let component = state.scene.slot(slot);
            if component.is_empty() {
                continue;
            }
            let image = if component.has_image() { " [image]" } else { "" };
            println!("{}: {}{image}", slot.title(), component.text);
        }
        println!("base prompt: {}", state.base_prompt);
        println!("quick description: {}", state.quick.description);
        println!(
            "locked character: {}",
            if state.locked_character.is_some() { "yes" } else { "no" }
        );
    }
}

fn report_outcome(studio: &Studio, out: &Path, outcome: GenerationOutcome) -> Result<()> {
    let version = match outcome {
        GenerationOutcome::Completed(version) => version,
        GenerationOutcome::Cancelled => {
            println!("Generation cancelled.");
            return Ok(());
        }
    };
    let extension = extension_for(&version.image);
    let path = out.join(format!(
        "{}-{}.{extension}",
        studio.mode(),
        version.version_id
    ));
    fs::write(&path, version.image.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "{} ({}, {}) -> {}",
        version.version_id,
        version.origin,
        version.format,
        path.display()
    );
    Ok(())
}

fn read_image(path: &Path) -> Result<ImageData> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    image::guess_format(&bytes)
        .with_context(|| format!("{} is not a supported image", path.display()))?;
    Ok(ImageData::new(bytes))
}

/// Re-encodes when the target extension asks for a different format.
fn export_image(image: &ImageData, path: &Path) -> Result<()> {
    let wanted = image::ImageFormat::from_path(path).ok();
    let current = image::guess_format(image.as_bytes()).ok();
    if wanted.is_none() || wanted == current {
        return fs::write(path, image.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()));
    }
    image::load_from_memory(image.as_bytes())
        .context("failed to decode image for export")?
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn extension_for(image: &ImageData) -> &'static str {
    match image.mime_type() {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

fn parse_format(raw: &str) -> Result<AspectRatio> {
    raw.parse::<AspectRatio>().map_err(anyhow::Error::msg)
}

fn parse_slot(raw: &str) -> Result<SlotId> {
    raw.parse::<SlotId>().map_err(anyhow::Error::msg)
}

fn required<'a>(intent: &'a Intent, key: &str) -> Result<&'a str> {
    optional(intent, key).ok_or_else(|| anyhow!("this command needs a {key}"))
}

fn optional<'a>(intent: &'a Intent, key: &str) -> Option<&'a str> {
    let value = intent.arg_str(key).trim();
    (!value.is_empty()).then_some(value)
}

fn session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("vitrine-{millis}")
}
