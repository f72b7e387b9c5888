use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::{json, Value};
use vitrine_contracts::error::StudioError;
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::library::LibraryFilter;
use vitrine_contracts::scene::{AspectRatio, ImageData, SlotId};
use vitrine_contracts::session::Mode;
use vitrine_contracts::storage::MemoryStore;
use vitrine_engine::api::{ApiError, Attachment, GenerativeApi, ImageOutcome, PromptPart};
use vitrine_engine::canvas::{CanvasComposer, PaddedCanvasComposer};
use vitrine_engine::prompts::{
    FILL_ONLY_DIRECTIVE, LOCKED_CHARACTER_LABEL, QUICK_REFERENCE_LABEL, VARIATION_BASE_LABEL,
};
use vitrine_engine::retry::{CancelHandle, VirtualClock};
use vitrine_engine::session::GenerationPhase;
use vitrine_engine::{EngineConfig, GenerationOutcome, Orchestrator, Studio};

#[derive(Debug, Clone)]
struct ImageCall {
    prompt: String,
    attachments: Vec<Attachment>,
}

/// Remote API double: pops canned outcomes, falls back to a fixed image,
/// and records every call.
#[derive(Default)]
struct ScriptedApi {
    images: Mutex<VecDeque<Result<ImageOutcome, ApiError>>>,
    structured: Mutex<VecDeque<Value>>,
    image_calls: Mutex<Vec<ImageCall>>,
    text_calls: AtomicUsize,
    counter: AtomicUsize,
}

impl ScriptedApi {
    fn push_image(&self, outcome: Result<ImageOutcome, ApiError>) {
        self.images.lock().unwrap().push_back(outcome);
    }

    fn image_calls(&self) -> Vec<ImageCall> {
        self.image_calls.lock().unwrap().clone()
    }
}

impl GenerativeApi for ScriptedApi {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_text(&self, _: &[PromptPart], _: &CancelHandle) -> Result<String, ApiError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok("a described scene".to_string())
    }

    fn generate_structured(
        &self,
        _: &[PromptPart],
        _: &Value,
        _: &CancelHandle,
    ) -> Result<Value, ApiError> {
        Ok(self.structured.lock().unwrap().pop_front().unwrap_or(Value::Null))
    }

    fn generate_image(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        _: &CancelHandle,
    ) -> Result<ImageOutcome, ApiError> {
        self.image_calls.lock().unwrap().push(ImageCall {
            prompt: prompt.to_string(),
            attachments: attachments.to_vec(),
        });
        if let Some(outcome) = self.images.lock().unwrap().pop_front() {
            return outcome;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) as u8;
        Ok(ImageOutcome::Image(ImageData::new(vec![0xAA, n])))
    }
}

#[derive(Default)]
struct CountingCanvas {
    calls: AtomicUsize,
}

impl CanvasComposer for CountingCanvas {
    fn compose_outpaint_canvas(&self, image: &ImageData, target: AspectRatio) -> Result<ImageData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PaddedCanvasComposer::default().compose_outpaint_canvas(image, target)
    }
}

struct Harness {
    studio: Studio,
    api: Arc<ScriptedApi>,
    clock: Arc<VirtualClock>,
    canvas: Arc<CountingCanvas>,
}

fn harness_with(store: MemoryStore, events: EventWriter) -> Result<Harness> {
    let api = Arc::new(ScriptedApi::default());
    let clock = Arc::new(VirtualClock::new());
    let canvas = Arc::new(CountingCanvas::default());
    let config = EngineConfig::default();
    let orchestrator = Orchestrator::new(api.clone(), &config, events)
        .with_clock(clock.clone())
        .with_canvas(canvas.clone());
    let studio = Studio::open(orchestrator, Box::new(store), &config)?;
    Ok(Harness {
        studio,
        api,
        clock,
        canvas,
    })
}

fn harness() -> Result<Harness> {
    harness_with(MemoryStore::new(), EventWriter::disabled("test"))
}

fn img(tag: u8) -> ImageData {
    ImageData::new(vec![tag; 16])
}

fn png(width: u32, height: u32) -> Result<ImageData> {
    let mut bytes = Vec::new();
    image::DynamicImage::new_rgb8(width, height).write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )?;
    Ok(ImageData::new(bytes))
}

fn completed(outcome: GenerationOutcome) -> Result<vitrine_contracts::runs::history::Version> {
    match outcome {
        GenerationOutcome::Completed(version) => Ok(version),
        GenerationOutcome::Cancelled => anyhow::bail!("generation was cancelled"),
    }
}

#[test]
fn fourth_limited_image_is_rejected() -> Result<()> {
    let mut h = harness()?;
    h.studio.set_slot_image(SlotId::Background, img(1))?;
    h.studio.set_slot_image(SlotId::Clothing, img(2))?;
    h.studio.set_slot_image(SlotId::Accessory, img(3))?;
    assert!(!h.studio.can_accept_image(SlotId::Product));
    assert!(h.studio.can_accept_image(SlotId::Clothing));
    assert!(h.studio.can_accept_image(SlotId::Character));
    let err = h.studio.set_slot_image(SlotId::Product, img(4)).unwrap_err();
    assert!(matches!(err, StudioError::CapacityExceeded { slot: SlotId::Product, limit: 3 }));
    Ok(())
}

#[test]
fn editorial_scene_with_preset_prompt_skips_describe() -> Result<()> {
    let mut h = harness()?;
    h.studio.set_slot_text(SlotId::Character, "woman, red hair");
    h.studio.set_slot_image(SlotId::Background, img(2))?;
    h.studio.state_mut().base_prompt = "studio shot".to_string();

    completed(h.studio.generate()?)?;
    let calls = h.api.image_calls();
    assert_eq!(calls.len(), 1);
    for needle in ["editorial", "1:1", "studio shot"] {
        assert!(calls[0].prompt.contains(needle), "missing {needle}");
    }
    assert_eq!(h.api.text_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn rewind_keeps_history_and_next_append_lands_at_end() -> Result<()> {
    let mut h = harness()?;
    h.studio.switch_mode(Mode::Quick);
    h.studio.state_mut().quick.description = "linen suit on a pier".to_string();
    for _ in 0..3 {
        completed(h.studio.generate()?)?;
    }
    h.studio.state_mut().quick.description.clear();

    let scene = h.studio.rewind("v1")?;
    assert_eq!(scene, "linen suit on a pier");
    assert_eq!(h.studio.state().quick.description, "linen suit on a pier");
    assert_eq!(h.studio.state().quick_history.len(), 3);

    let version = completed(h.studio.vary(Some("make it dusk"))?)?;
    let history = &h.studio.state().quick_history;
    assert_eq!(history.len(), 4);
    assert_eq!(history.last().map(|v| v.version_id.as_str()), Some("v4"));
    assert_eq!(version.parent_version_id.as_deref(), Some("v1"));
    assert!(matches!(h.studio.rewind("v99"), Err(StudioError::InvalidRequest(_))));
    Ok(())
}

#[test]
fn locked_character_replaces_live_character_in_variations() -> Result<()> {
    let mut h = harness()?;
    let live_face = img(42);
    h.studio.set_slot_image(SlotId::Character, live_face.clone())?;
    h.studio.state_mut().base_prompt = "rooftop at night".to_string();
    let first = completed(h.studio.generate()?)?;

    assert!(h.studio.toggle_character_lock()?);
    assert_eq!(h.studio.state().locked_character.as_ref(), Some(&first.image));
    completed(h.studio.vary(None)?)?;

    let calls = h.api.image_calls();
    let variation = &calls[1];
    assert!(!variation
        .attachments
        .iter()
        .any(|attachment| attachment.image == live_face));
    let labels: Vec<&str> = variation
        .attachments
        .iter()
        .map(|attachment| attachment.label.as_str())
        .collect();
    assert_eq!(labels, vec![VARIATION_BASE_LABEL, LOCKED_CHARACTER_LABEL]);

    assert!(!h.studio.toggle_character_lock()?);
    assert!(h.studio.state().locked_character.is_none());
    Ok(())
}

#[test]
fn quick_mode_lock_rides_along_with_edits() -> Result<()> {
    let mut h = harness()?;
    h.studio.switch_mode(Mode::Quick);
    h.studio.state_mut().quick.description = "street market".to_string();
    let first = completed(h.studio.generate()?)?;

    h.studio.lock_character()?;
    completed(h.studio.vary(Some("make it dusk"))?)?;

    let calls = h.api.image_calls();
    let edit = &calls[1];
    assert!(edit.prompt.ends_with("make it dusk"));
    let locked: Vec<&Attachment> = edit
        .attachments
        .iter()
        .filter(|attachment| attachment.label == LOCKED_CHARACTER_LABEL)
        .collect();
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].image, first.image);
    assert_eq!(edit.attachments[0].label, VARIATION_BASE_LABEL);
    assert_eq!(edit.attachments[1].label, LOCKED_CHARACTER_LABEL);
    Ok(())
}

#[test]
fn locked_character_survives_outpainting() -> Result<()> {
    let mut h = harness()?;
    h.studio.state_mut().base_prompt = "portrait on a balcony".to_string();
    let base = png(8, 8)?;
    h.api.push_image(Ok(ImageOutcome::Image(base.clone())));
    completed(h.studio.generate()?)?;
    h.studio.lock_character()?;

    let wide: AspectRatio = "16:9".parse().map_err(anyhow::Error::msg)?;
    h.studio
        .change_format(wide)?
        .map(completed)
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("format change did not generate"))?;

    let calls = h.api.image_calls();
    let outpaint = &calls[1];
    assert_eq!(h.canvas.calls.load(Ordering::SeqCst), 1);
    assert!(outpaint.attachments[0].label.contains(FILL_ONLY_DIRECTIVE));
    assert_eq!(outpaint.attachments[1].label, LOCKED_CHARACTER_LABEL);
    assert_eq!(outpaint.attachments[1].image, base);
    Ok(())
}

#[test]
fn five_no_image_responses_report_safety_policy() -> Result<()> {
    let mut h = harness()?;
    h.studio.switch_mode(Mode::Quick);
    h.studio.state_mut().quick.description = "swimwear campaign".to_string();
    for _ in 0..5 {
        h.api.push_image(Ok(ImageOutcome::NoImage { text: None }));
    }

    let err = h.studio.generate().unwrap_err();
    assert!(matches!(err, StudioError::NoImageProduced { attempts: 5, .. }));
    assert!(err.user_message().contains("safety policy"));
    assert!(!err.user_message().contains("generation failed"));
    assert_eq!(h.api.image_calls().len(), 5);
    assert!(h.studio.state().quick_history.is_empty());
    Ok(())
}

#[test]
fn cancel_during_second_retry_delay_commits_nothing() -> Result<()> {
    let mut h = harness()?;
    h.studio.switch_mode(Mode::Quick);
    h.studio.state_mut().quick.description = "trench coat in the rain".to_string();
    for _ in 0..3 {
        h.api.push_image(Err(ApiError::Transport("connection reset".to_string())));
    }
    let session = h.studio.session();
    let remote = Arc::clone(&session);
    h.clock.set_hook(move |index| {
        if index == 1 {
            remote.cancel_current();
        }
    });

    let outcome = h.studio.generate()?;
    assert_eq!(outcome, GenerationOutcome::Cancelled);
    assert_eq!(h.api.image_calls().len(), 2);
    assert!(h.studio.state().quick_history.is_empty());
    assert_eq!(session.phase(), GenerationPhase::Idle);
    assert_eq!(session.last_terminal(), Some(GenerationPhase::Cancelled));
    assert!(!session.is_generating());

    // The guard is free again.
    completed(h.studio.generate()?)?;
    Ok(())
}

#[test]
fn empty_advanced_scene_is_rejected_before_any_remote_call() -> Result<()> {
    let mut h = harness()?;
    let err = h.studio.generate().unwrap_err();
    assert!(matches!(err, StudioError::InvalidRequest(_)));
    assert_eq!(h.api.text_calls.load(Ordering::SeqCst), 0);
    assert!(h.api.image_calls().is_empty());
    assert!(h.studio.state().history.is_empty());
    assert!(h.studio.state().base_prompt.is_empty());
    let session = h.studio.session();
    assert_eq!(session.phase(), GenerationPhase::Idle);
    assert!(!session.is_generating());

    // One filled slot is enough to describe the scene first.
    h.studio.state_mut().scene.set_text(SlotId::Background, "harbour at dawn");
    completed(h.studio.generate()?)?;
    assert_eq!(h.api.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.studio.state().base_prompt, "a described scene");
    assert_eq!(h.api.image_calls().len(), 1);
    Ok(())
}

#[test]
fn saving_empty_character_leaves_library_untouched() -> Result<()> {
    let mut h = harness()?;
    let before = h.studio.list_characters(LibraryFilter::All).len();
    assert_eq!(
        h.studio.save_character(Some("nobody")).unwrap_err(),
        StudioError::EmptyCharacter
    );
    assert_eq!(h.studio.list_characters(LibraryFilter::All).len(), before);
    Ok(())
}

#[test]
fn failed_character_write_rolls_back() -> Result<()> {
    let mut h = harness_with(MemoryStore::with_quota(8), EventWriter::disabled("test"))?;
    h.studio.set_slot_text(SlotId::Character, "tall, freckles");
    let err = h.studio.save_character(None).unwrap_err();
    assert!(matches!(err, StudioError::StorageFull(_)));
    assert!(h.studio.list_characters(LibraryFilter::All).is_empty());
    Ok(())
}

#[test]
fn quick_mode_validates_then_labels_references() -> Result<()> {
    let mut h = harness()?;
    h.studio.switch_mode(Mode::Quick);
    assert!(matches!(
        h.studio.generate(),
        Err(StudioError::InvalidRequest(_))
    ));
    assert!(h.api.image_calls().is_empty());

    h.studio.state_mut().quick.set_reference_image(0, Some(img(1)))?;
    h.studio.state_mut().quick.set_reference_image(1, Some(img(2)))?;
    completed(h.studio.generate()?)?;
    let calls = h.api.image_calls();
    assert_eq!(calls[0].attachments.len(), 2);
    assert!(calls[0]
        .attachments
        .iter()
        .all(|attachment| attachment.label == QUICK_REFERENCE_LABEL));
    Ok(())
}

#[test]
fn format_change_outpaints_once_with_fill_directive() -> Result<()> {
    let mut h = harness()?;
    h.studio.switch_mode(Mode::Quick);
    h.studio.state_mut().quick.description = "desert road".to_string();
    h.api.push_image(Ok(ImageOutcome::Image(png(32, 32)?)));
    completed(h.studio.generate()?)?;

    let wide: AspectRatio = "16:9".parse().map_err(anyhow::Error::msg)?;
    let version = h
        .studio
        .change_format(wide)?
        .map(completed)
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("format change did not generate"))?;

    assert_eq!(h.canvas.calls.load(Ordering::SeqCst), 1);
    let calls = h.api.image_calls();
    let outpaint = &calls[1];
    assert!(outpaint.prompt.contains(FILL_ONLY_DIRECTIVE));
    assert!(!outpaint
        .attachments
        .iter()
        .any(|attachment| attachment.label == VARIATION_BASE_LABEL));
    assert_eq!(version.format, wide);
    assert_eq!(h.studio.state().format, wide);
    Ok(())
}

#[test]
fn project_load_merges_state_and_keeps_library() -> Result<()> {
    let mut h = harness()?;
    h.studio.set_slot_text(SlotId::Character, "silver hair, green eyes");
    let saved = h.studio.save_character(Some("Mara"))?;
    h.studio.state_mut().base_prompt = "greenhouse editorial".to_string();
    let key = h.studio.save_project(Some("greenhouse"))?;

    h.studio.state_mut().base_prompt = "something else".to_string();
    h.studio.set_slot_text(SlotId::Background, "glass roof");
    h.studio.set_slot_text(SlotId::Character, "another person");
    let second = h.studio.save_character(None)?;

    assert_eq!(h.studio.load_project(&key)?, "greenhouse");
    assert_eq!(h.studio.state().base_prompt, "greenhouse editorial");
    assert_eq!(
        h.studio.state().scene.character.text,
        "silver hair, green eyes"
    );
    let ids: Vec<&str> = h
        .studio
        .list_characters(LibraryFilter::All)
        .iter()
        .map(|character| character.id.as_str())
        .collect();
    assert!(ids.contains(&saved.id.as_str()));
    assert!(ids.contains(&second.id.as_str()));

    let projects = h.studio.list_projects()?;
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, "greenhouse");
    Ok(())
}

#[test]
fn load_character_resets_panel_into_advanced_mode() -> Result<()> {
    let mut h = harness()?;
    h.studio.set_slot_text(SlotId::Character, "curly hair");
    let saved = h.studio.save_character(None)?;
    assert!(saved.is_favorite);

    h.studio.clear_slot(SlotId::Character);
    h.studio.switch_mode(Mode::Quick);
    h.studio.state_mut().quick.description = "street style".to_string();
    completed(h.studio.generate()?)?;

    h.studio.load_character(&saved.id)?;
    assert_eq!(h.studio.mode(), Mode::Advanced);
    assert!(h.studio.state().quick_history.is_empty());
    assert_eq!(h.studio.state().scene.character.text, "curly hair");

    h.studio.toggle_pin(&saved.id)?;
    assert_eq!(h.studio.list_characters(LibraryFilter::Pinned).len(), 1);
    h.studio.delete_character(&saved.id)?;
    h.studio.delete_character("char_missing")?;
    assert!(h.studio.list_characters(LibraryFilter::All).is_empty());
    Ok(())
}

#[test]
fn switching_to_quick_clears_advanced_work() -> Result<()> {
    let mut h = harness()?;
    h.studio.set_slot_text(SlotId::Clothing, "red trench");
    h.studio.state_mut().base_prompt = "city".to_string();
    completed(h.studio.generate()?)?;

    h.studio.switch_mode(Mode::Quick);
    assert!(h.studio.state().history.is_empty());
    assert!(h.studio.state().scene.clothing.is_empty());

    h.studio.state_mut().quick.description = "beach".to_string();
    completed(h.studio.generate()?)?;
    h.studio.switch_mode(Mode::Advanced);
    assert!(h.studio.state().quick_history.is_empty());
    assert!(h.studio.state().quick.description.is_empty());
    Ok(())
}

#[test]
fn concept_fills_slots_and_drops_their_images() -> Result<()> {
    let mut h = harness()?;
    h.studio.set_slot_image(SlotId::Accessory, img(9))?;
    h.api.structured.lock().unwrap().push_back(json!({
        "char": "a dancer",
        "bg": "empty theatre",
        "cloth": "tulle dress",
        "acc": "pearl earrings",
        "prod": "perfume bottle"
    }));

    let applied = h.studio.generate_concept("ballet", None, "woman")?;
    assert_eq!(applied.len(), 5);
    let scene = &h.studio.state().scene;
    assert_eq!(scene.accessory.text, "pearl earrings");
    assert!(!scene.accessory.has_image());
    assert_eq!(h.studio.state().inspiration.theme, "ballet");
    assert!(matches!(
        h.studio.generate_concept("  ", None, ""),
        Err(StudioError::InvalidRequest(_))
    ));
    Ok(())
}

#[test]
fn partial_concept_leaves_missing_slots_alone() -> Result<()> {
    let mut h = harness()?;
    h.studio.set_slot_text(SlotId::Product, "leather handbag");
    h.studio.set_slot_image(SlotId::Product, img(4))?;
    h.studio.set_slot_text(SlotId::Clothing, "denim jacket");
    h.api.structured.lock().unwrap().push_back(json!({
        "char": "a skateboarder",
        "bg": "concrete skatepark",
        "cloth": 42
    }));

    let applied = h.studio.generate_concept("street culture", None, "")?;
    let slots: Vec<SlotId> = applied.iter().map(|(slot, _)| *slot).collect();
    assert_eq!(slots, vec![SlotId::Character, SlotId::Background]);
    let scene = &h.studio.state().scene;
    assert_eq!(scene.character.text, "a skateboarder");
    assert_eq!(scene.product.text, "leather handbag");
    assert!(scene.product.has_image());
    assert_eq!(scene.clothing.text, "denim jacket");
    Ok(())
}

#[test]
fn video_script_then_final_take_lands_in_advanced_history() -> Result<()> {
    let mut h = harness()?;
    h.studio.state_mut().base_prompt = "runway finale".to_string();
    assert!(matches!(
        h.studio.final_take(),
        Err(StudioError::InvalidRequest(_))
    ));
    completed(h.studio.generate()?)?;
    h.api.structured.lock().unwrap().push_back(json!({
        "summary": "She walks to the end of the runway.",
        "script": "Shot 1: wide. Shot 2: close-up as she turns."
    }));
    let script = h.studio.generate_video_script(Some(6), None)?;
    assert!(script.script.starts_with("Shot 1"));

    let version = completed(h.studio.final_take()?)?;
    assert_eq!(version.origin, "final_take");
    assert_eq!(h.studio.state().history.len(), 2);
    assert_eq!(h.api.image_calls()[1].prompt, script.script);
    Ok(())
}

#[test]
fn events_carry_request_fingerprint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("events.jsonl");
    let mut h = harness_with(MemoryStore::new(), EventWriter::new(&path, "session-1"))?;
    h.studio.switch_mode(Mode::Quick);
    h.studio.state_mut().quick.description = "wool coat".to_string();
    completed(h.studio.generate()?)?;

    let events: Vec<Value> = std::fs::read_to_string(&path)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let started = events
        .iter()
        .find(|event| event["type"] == "generation_started")
        .ok_or_else(|| anyhow::anyhow!("no generation_started event"))?;
    let created = events
        .iter()
        .find(|event| event["type"] == "version_created")
        .ok_or_else(|| anyhow::anyhow!("no version_created event"))?;
    assert_eq!(started["session_id"], "session-1");
    assert_eq!(started["request_fingerprint"], created["request_fingerprint"]);
    assert_eq!(
        started["request_fingerprint"].as_str().map(str::len),
        Some(64)
    );
    Ok(())
}
