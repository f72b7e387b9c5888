//! The studio context: live session state, the process-wide character
//! library, the blob store and the orchestrator, passed around as one value.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use vitrine_contracts::error::{StudioError, StudioResult};
use vitrine_contracts::events::{EventPayload, EventWriter};
use vitrine_contracts::library::{
    CharacterLibrary, LibraryFilter, ProjectStore, ProjectSummary, SavedCharacter, StorageWarning,
};
use vitrine_contracts::scene::{AspectRatio, ImageData, SlotId};
use vitrine_contracts::session::{AppState, GenerationParams, Mode, VideoScript};
use vitrine_contracts::storage::KeyValueStore;

use crate::assembler::GenerationRequest;
use crate::config::EngineConfig;
use crate::orchestrator::{GenerationOutcome, Orchestrator};
use crate::prompts::{
    captions_parts, captions_schema, concept_parts, concept_schema, describe_scene_parts,
    improve_overlay_parts, improve_prompt_parts, parse_suggestions, structure_prompt_parts,
    structure_schema, suggest_edits_parts, video_script_parts, video_script_schema,
    StructuredPrompt, VideoScriptContext, CONCEPT_FIELDS,
};
use crate::session::GenerationSession;

pub const DEFAULT_VIDEO_DURATION_S: u64 = 8;
pub const DEFAULT_CAMERA_STYLE: &str = "cinematic, smooth handheld";

pub struct Studio {
    state: AppState,
    library: CharacterLibrary,
    projects: ProjectStore,
    store: Box<dyn KeyValueStore + Send>,
    orchestrator: Orchestrator,
    events: EventWriter,
}

impl Studio {
    /// Loads the character library from `store`. An unreadable library is
    /// discarded with a `storage_warning` event rather than failing.
    pub fn open(
        orchestrator: Orchestrator,
        mut store: Box<dyn KeyValueStore + Send>,
        config: &EngineConfig,
    ) -> StudioResult<Self> {
        let (library, notice) = CharacterLibrary::load(&mut *store, config.library_warn_bytes)?;
        let events = orchestrator.events().clone();
        let studio = Self {
            state: AppState::default(),
            library,
            projects: ProjectStore::new(config.project_warn_bytes),
            store,
            orchestrator,
            events,
        };
        if let Some(notice) = notice {
            studio.emit(
                "storage_warning",
                map_object(json!({ "key": "saved_characters", "message": notice })),
            );
        }
        Ok(studio)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Direct access for presentation-layer edits (text fields, parameters).
    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.active_mode
    }

    pub fn session(&self) -> Arc<GenerationSession> {
        self.orchestrator.session()
    }

    pub fn provider_name(&self) -> &str {
        self.orchestrator.api_name()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    // Scene components.

    pub fn can_accept_image(&self, slot: SlotId) -> bool {
        self.state.scene.can_accept_image(slot)
    }

    pub fn set_slot_image(&mut self, slot: SlotId, image: ImageData) -> StudioResult<()> {
        self.state.scene.set_image(slot, image)
    }

    pub fn set_slot_text(&mut self, slot: SlotId, text: impl Into<String>) {
        self.state.scene.set_text(slot, text);
    }

    pub fn clear_slot(&mut self, slot: SlotId) {
        self.state.scene.clear(slot);
    }

    pub fn set_new_character_face(&mut self, image: ImageData) {
        self.state.aux.set_new_character_face(image);
    }

    pub fn set_pose_reference(&mut self, image: ImageData) {
        self.state.aux.set_pose_reference(image);
    }

    // Generation.

    /// Runs `request` in the active mode.
    pub fn run(&mut self, request: GenerationRequest) -> StudioResult<GenerationOutcome> {
        let mode = self.state.active_mode;
        self.orchestrator
            .generate_image(&mut self.state, &request, mode)
    }

    pub fn generate(&mut self) -> StudioResult<GenerationOutcome> {
        self.run(GenerationRequest::Initial)
    }

    pub fn vary(&mut self, edit_prompt: Option<&str>) -> StudioResult<GenerationOutcome> {
        self.run(GenerationRequest::Variation {
            edit_prompt: edit_prompt
                .map(str::trim)
                .filter(|edit| !edit.is_empty())
                .map(str::to_string),
            upscale: false,
        })
    }

    pub fn upscale(&mut self) -> StudioResult<GenerationOutcome> {
        self.run(GenerationRequest::Variation {
            edit_prompt: None,
            upscale: true,
        })
    }

    /// Outpaints the current image to `target`. With nothing generated yet
    /// only the format setting changes and `None` is returned.
    pub fn change_format(
        &mut self,
        target: AspectRatio,
    ) -> StudioResult<Option<GenerationOutcome>> {
        if self.state.history_for(self.state.active_mode).is_empty() {
            self.state.format = target;
            return Ok(None);
        }
        self.run(GenerationRequest::FormatChange { target }).map(Some)
    }

    pub fn inpaint(&mut self, edit_prompt: &str, mask: ImageData) -> StudioResult<GenerationOutcome> {
        self.run(GenerationRequest::InpaintEdit {
            edit_prompt: edit_prompt.to_string(),
            mask,
        })
    }

    /// Renders the frame the stored video script ends on.
    pub fn final_take(&mut self) -> StudioResult<GenerationOutcome> {
        let script = self
            .state
            .video_script
            .as_ref()
            .map(|video| video.script.clone())
            .ok_or_else(|| StudioError::invalid("generate a video script first"))?;
        self.orchestrator.generate_image(
            &mut self.state,
            &GenerationRequest::FinalTake { script },
            Mode::Advanced,
        )
    }

    /// Signals the in-flight call, if any.
    pub fn cancel_generation(&self) -> bool {
        self.orchestrator.session().cancel_current()
    }

    // Modes and panel state.

    /// Entering quick mode drops advanced components and history when any
    /// component has content; entering advanced mode drops quick state when
    /// quick images or results exist.
    pub fn switch_mode(&mut self, mode: Mode) {
        let from = self.state.active_mode;
        if from == mode {
            return;
        }
        let cleared = match mode {
            Mode::Quick => {
                let dirty = self.state.scene.has_scene_content();
                if dirty {
                    self.state.scene.clear_all();
                    self.state.history.clear();
                }
                dirty
            }
            Mode::Advanced => {
                let dirty =
                    self.state.quick.has_images() || !self.state.quick_history.is_empty();
                if dirty {
                    self.state.quick = Default::default();
                    self.state.quick_history.clear();
                }
                dirty
            }
        };
        self.state.active_mode = mode;
        self.emit(
            "mode_switched",
            map_object(json!({
                "from": from.to_string(),
                "to": mode.to_string(),
                "cleared": cleared,
            })),
        );
    }

    pub fn reset_generation_panel(&mut self) {
        self.state.history.clear();
        self.state.quick_history.clear();
        self.state.base_prompt.clear();
        self.state.locked_character = None;
        self.state.format = AspectRatio::SQUARE;
        self.state.quick = Default::default();
        self.state.params = GenerationParams::default();
        self.state.video_script = None;
    }

    /// Pins the current result of the active mode as the character identity.
    pub fn lock_character(&mut self) -> StudioResult<()> {
        let mode = self.state.active_mode;
        let (version_id, image) = self
            .state
            .history_for(mode)
            .current()
            .map(|version| (version.version_id.clone(), version.image.clone()))
            .ok_or_else(|| StudioError::invalid("no image to lock; generate one first"))?;
        self.state.locked_character = Some(image);
        self.emit(
            "character_locked",
            map_object(json!({ "mode": mode.to_string(), "version_id": version_id })),
        );
        Ok(())
    }

    pub fn unlock_character(&mut self) {
        if self.state.locked_character.take().is_some() {
            self.emit("character_unlocked", Map::new());
        }
    }

    /// Returns whether a character is locked afterwards.
    pub fn toggle_character_lock(&mut self) -> StudioResult<bool> {
        if self.state.locked_character.is_some() {
            self.unlock_character();
            return Ok(false);
        }
        self.lock_character()?;
        Ok(true)
    }

    /// Makes `version_id` current in the active mode and puts its scene
    /// description back into the editor.
    pub fn rewind(&mut self, version_id: &str) -> StudioResult<String> {
        let mode = self.state.active_mode;
        let scene = self
            .state
            .history_for_mut(mode)
            .rewind(version_id)
            .ok_or_else(|| StudioError::invalid(format!("unknown version '{version_id}'")))?;
        match mode {
            Mode::Advanced => self.state.base_prompt = scene.clone(),
            Mode::Quick => self.state.quick.description = scene.clone(),
        }
        self.emit(
            "version_rewound",
            map_object(json!({ "mode": mode.to_string(), "version_id": version_id })),
        );
        Ok(scene)
    }

    // Text operations.

    /// Fills the base prompt from the scene components.
    pub fn describe_scene(&mut self) -> StudioResult<String> {
        if !self.state.scene.has_scene_content() && !self.state.scene.style_reference.has_image() {
            return Err(StudioError::invalid("add at least one scene component first"));
        }
        let description = self
            .orchestrator
            .text_operation("describe_scene", &describe_scene_parts(&self.state.scene))?;
        self.state.base_prompt = description.clone();
        Ok(description)
    }

    pub fn suggest_edits(&self) -> StudioResult<Vec<String>> {
        let mode = self.state.active_mode;
        let source = self
            .state
            .history_for(mode)
            .current()
            .map(|version| {
                version
                    .scene_description
                    .clone()
                    .filter(|scene| !scene.trim().is_empty())
                    .unwrap_or_else(|| version.prompt.clone())
            })
            .unwrap_or_else(|| self.state.scene_description_for(mode).trim().to_string());
        if source.trim().is_empty() {
            return Err(StudioError::invalid("nothing to suggest edits for"));
        }
        let raw = self
            .orchestrator
            .text_operation("suggest_edits", &suggest_edits_parts(&source))?;
        Ok(parse_suggestions(&raw))
    }

    /// Rewrites the active mode's scene description in place.
    pub fn improve_prompt(&mut self) -> StudioResult<String> {
        let mode = self.state.active_mode;
        let current = self.state.scene_description_for(mode).trim().to_string();
        if current.is_empty() {
            return Err(StudioError::invalid("write a scene description first"));
        }
        let improved = self
            .orchestrator
            .text_operation("improve_prompt", &improve_prompt_parts(&current))?;
        match mode {
            Mode::Advanced => self.state.base_prompt = improved.clone(),
            Mode::Quick => self.state.quick.description = improved.clone(),
        }
        Ok(improved)
    }

    pub fn improve_overlay_text(&mut self, mode: Mode) -> StudioResult<String> {
        let scene = self.state.scene_description_for(mode).trim().to_string();
        if scene.is_empty() {
            return Err(StudioError::invalid(
                "the overlay text needs a scene description to work from",
            ));
        }
        let current = self.state.params.overlay_for(mode).to_string();
        let improved = self.orchestrator.text_operation(
            "improve_overlay_text",
            &improve_overlay_parts(&current, &scene),
        )?;
        let improved = improved.trim().trim_matches('"').to_string();
        self.state.params.set_overlay_for(mode, improved.clone());
        Ok(improved)
    }

    pub fn structure_prompt(&self) -> StudioResult<StructuredPrompt> {
        let description = self.state.quick.description.trim();
        if description.is_empty() {
            return Err(StudioError::invalid("write a quick-mode description first"));
        }
        let value = self.orchestrator.structured_operation(
            "structure_prompt",
            &structure_prompt_parts(description),
            &structure_schema(),
        )?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn apply_structured_prompt(&mut self, structured: &StructuredPrompt) {
        self.state.quick.description = structured.joined();
    }

    /// Writes a generated concept into the five scene slots, dropping their
    /// images.
    pub fn generate_concept(
        &mut self,
        theme: &str,
        image: Option<ImageData>,
        character_type: &str,
    ) -> StudioResult<Vec<(SlotId, String)>> {
        if theme.trim().is_empty() && image.is_none() {
            return Err(StudioError::invalid("a concept needs a theme or an image"));
        }
        self.state.inspiration.theme = theme.trim().to_string();
        self.state.inspiration.image = image;
        self.state.inspiration.character_type = character_type.trim().to_string();

        let inspiration = &self.state.inspiration;
        let value = self.orchestrator.structured_operation(
            "generate_concept",
            &concept_parts(
                &inspiration.theme,
                inspiration.image.as_ref(),
                &inspiration.character_type,
            ),
            &concept_schema(),
        )?;

        // Slots the response leaves out keep their current text and image.
        let mut applied = Vec::new();
        for slot in CONCEPT_FIELDS {
            let Some(text) = value.get(slot.key()).and_then(Value::as_str) else {
                continue;
            };
            let text = text.trim().to_string();
            self.state.scene.set_text(slot, text.clone());
            self.state.scene.remove_image(slot);
            applied.push((slot, text));
        }
        Ok(applied)
    }

    pub fn generate_captions(&self) -> StudioResult<Vec<String>> {
        let mode = self.state.active_mode;
        let version = self
            .state
            .history_for(mode)
            .current()
            .ok_or_else(|| StudioError::invalid("generate an image before writing captions"))?;
        let source = version
            .scene_description
            .clone()
            .filter(|scene| !scene.trim().is_empty())
            .unwrap_or_else(|| version.prompt.clone());
        let value = self.orchestrator.structured_operation(
            "generate_captions",
            &captions_parts(&source),
            &captions_schema(),
        )?;
        Ok(value
            .get("captions")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|caption| !caption.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn generate_video_script(
        &mut self,
        duration_s: Option<u64>,
        camera_style: Option<&str>,
    ) -> StudioResult<VideoScript> {
        let initial_image = self
            .state
            .history
            .current()
            .map(|version| version.image.clone())
            .ok_or_else(|| {
                StudioError::invalid("a video script needs an advanced-mode image to start from")
            })?;
        let camera_style = camera_style
            .map(str::trim)
            .filter(|style| !style.is_empty())
            .unwrap_or(DEFAULT_CAMERA_STYLE);
        let parts = video_script_parts(&VideoScriptContext {
            base_prompt: &self.state.base_prompt,
            scene: &self.state.scene,
            intention: &self.state.params.intention,
            duration_s: duration_s.unwrap_or(DEFAULT_VIDEO_DURATION_S).max(1),
            camera_style,
            initial_image: &initial_image,
        });
        let value = self.orchestrator.structured_operation(
            "generate_video_script",
            &parts,
            &video_script_schema(),
        )?;
        let script = VideoScript {
            summary: string_field(&value, "summary"),
            script: string_field(&value, "script"),
        };
        self.state.video_script = Some(script.clone());
        Ok(script)
    }

    // Character library.

    pub fn list_characters(&self, filter: LibraryFilter) -> Vec<&SavedCharacter> {
        self.library.list(filter)
    }

    pub fn save_character(&mut self, name: Option<&str>) -> StudioResult<SavedCharacter> {
        let snapshot = self.state.scene.character_snapshot();
        let (character, warning) =
            self.library
                .save(&mut *self.store, snapshot, name, Utc::now())?;
        self.emit(
            "character_saved",
            map_object(json!({
                "id": character.id,
                "name": character.name,
                "library_size": self.library.len(),
            })),
        );
        self.warn(warning);
        Ok(character)
    }

    pub fn delete_character(&mut self, id: &str) -> StudioResult<()> {
        let existed = self.library.get(id).is_some();
        let warning = self.library.delete(&mut *self.store, id)?;
        if existed {
            self.emit("character_deleted", map_object(json!({ "id": id })));
        }
        self.warn(warning);
        Ok(())
    }

    pub fn toggle_favorite(&mut self, id: &str) -> StudioResult<()> {
        let warning = self.library.toggle_favorite(&mut *self.store, id)?;
        self.warn(warning);
        Ok(())
    }

    pub fn toggle_pin(&mut self, id: &str) -> StudioResult<()> {
        let warning = self.library.toggle_pin(&mut *self.store, id)?;
        self.warn(warning);
        Ok(())
    }

    /// Resets the panel, switches to advanced mode and restores the saved
    /// character into the live character slot.
    pub fn load_character(&mut self, id: &str) -> StudioResult<()> {
        let snapshot = self
            .library
            .get(id)
            .map(|character| character.snapshot.clone())
            .ok_or_else(|| StudioError::invalid(format!("unknown character '{id}'")))?;
        self.reset_generation_panel();
        self.switch_mode(Mode::Advanced);
        self.state.scene.restore_character(&snapshot);
        Ok(())
    }

    // Projects.

    pub fn save_project(&mut self, name: Option<&str>) -> StudioResult<String> {
        let data = self.state.to_blob()?;
        let bytes = data.len();
        let (key, warning) = self
            .projects
            .save(&mut *self.store, name, data, Utc::now())?;
        self.emit(
            "project_saved",
            map_object(json!({ "key": key, "bytes": bytes })),
        );
        self.warn(warning);
        Ok(key)
    }

    /// Merges the stored snapshot into live state. The character library is
    /// never part of a project and is left as is.
    pub fn load_project(&mut self, key: &str) -> StudioResult<String> {
        let project = self.projects.load(&mut *self.store, key)?;
        self.state.merge_blob(&project.data)?;
        self.emit(
            "project_loaded",
            map_object(json!({ "key": key, "name": project.name })),
        );
        Ok(project.name)
    }

    pub fn list_projects(&mut self) -> StudioResult<Vec<ProjectSummary>> {
        self.projects.list(&mut *self.store)
    }

    pub fn delete_project(&mut self, key: &str) -> StudioResult<()> {
        self.projects.delete(&mut *self.store, key)
    }

    fn warn(&self, warning: Option<StorageWarning>) {
        if let Some(warning) = warning {
            self.emit(
                "storage_warning",
                map_object(json!({
                    "key": warning.key,
                    "bytes": warning.bytes,
                    "threshold": warning.threshold,
                    "message": warning.to_string(),
                })),
            );
        }
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("vitrine: failed to write {event_type} event: {err:#}");
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
