//! Turns the live studio state plus one request into the exact prompt text and
//! ordered attachment list sent to the image model.
//!
//! Assembly reads state but never mutates it: the orchestrator consumes the
//! one-shot auxiliary images afterwards, using the `consumed_*` flags.

use vitrine_contracts::error::{StudioError, StudioResult};
use vitrine_contracts::runs::history::{Version, NEGATIVE_MARKER, SCENE_MARKER};
use vitrine_contracts::scene::{AspectRatio, ImageData, SlotId};
use vitrine_contracts::session::{AppState, Mode};

use crate::api::Attachment;
use crate::canvas::CanvasComposer;
use crate::prompts::{
    overlay_directive, CHARACTER_REFERENCE_LABEL, EDIT_SUFFIX_PREFIX, EXTRA_REFERENCE_LABEL,
    FACE_SWAP_BASE_LABEL, FACE_SWAP_FACE_LABEL, FILL_ONLY_DIRECTIVE, FINAL_TAKE_LABEL,
    FIXED_NEGATIVES, ITEM_REFERENCE_LABEL, LOCKED_CHARACTER_LABEL, MASK_LABEL,
    POSE_REFERENCE_LABEL, QUICK_REFERENCE_LABEL, STUDIO_QUALITY, STYLE_REFERENCE_LABEL,
    UGC_EXTRA_NEGATIVES, UGC_QUALITY, UPSCALE_BODY, UPSCALE_SUFFIX, VARIATION_BASE_LABEL,
    VARIATION_BODY,
};

const QUICK_IMAGES_ONLY_SCENE: &str = "A scene composed from the provided reference images.";
const FACE_SWAP_BODY: &str = "Replace the face of the person in the base image with the identity of the new character, keeping the composition, pose, clothing and lighting of the base image.";
const EDIT_BODY: &str = "Based on the provided image, keep its style and subject.";

/// One generation call. Each variant carries only what it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRequest {
    Initial,
    Variation {
        edit_prompt: Option<String>,
        upscale: bool,
    },
    FormatChange {
        target: AspectRatio,
    },
    InpaintEdit {
        edit_prompt: String,
        mask: ImageData,
    },
    FinalTake {
        script: String,
    },
}

impl GenerationRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationRequest::Initial => "initial",
            GenerationRequest::Variation { upscale: true, .. } => "upscale",
            GenerationRequest::Variation {
                edit_prompt: Some(_),
                ..
            } => "edit",
            GenerationRequest::Variation { .. } => "variation",
            GenerationRequest::FormatChange { .. } => "format_change",
            GenerationRequest::InpaintEdit { .. } => "inpaint",
            GenerationRequest::FinalTake { .. } => "final_take",
        }
    }

    /// Mode whose history receives the result.
    pub fn target_mode(&self, mode: Mode) -> Mode {
        match self {
            GenerationRequest::FinalTake { .. } => Mode::Advanced,
            _ => mode,
        }
    }
}

/// Everything captured for one remote call, taken synchronously before the
/// first suspension point.
#[derive(Debug, Clone)]
pub struct AssembledRequest {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub scene_description: Option<String>,
    pub target_format: AspectRatio,
    pub parent_version_id: Option<String>,
    pub origin: String,
    pub consumed_face: bool,
    pub consumed_pose: bool,
}

pub fn assemble(
    state: &AppState,
    request: &GenerationRequest,
    mode: Mode,
    canvas: &dyn CanvasComposer,
) -> StudioResult<AssembledRequest> {
    match request {
        GenerationRequest::Initial => match mode {
            Mode::Advanced => Ok(assemble_advanced_initial(state)),
            Mode::Quick => assemble_quick_initial(state),
        },
        GenerationRequest::FinalTake { script } => assemble_final_take(state, script),
        _ => assemble_variation(state, request, mode, canvas),
    }
}

fn assemble_advanced_initial(state: &AppState) -> AssembledRequest {
    let scene = state.base_prompt.trim().to_string();
    let mut prompt = compose_prompt(state, Mode::Advanced, &scene);
    append_overlay(&mut prompt, state, Mode::Advanced);

    let mut attachments = Vec::new();
    if let Some(image) = &state.scene.style_reference.image {
        attachments.push(Attachment::new(STYLE_REFERENCE_LABEL, image.clone()));
    }
    push_locked_character(&mut attachments, state);
    for id in SlotId::SCENE_ORDER {
        let Some(image) = &state.scene.slot(id).image else {
            continue;
        };
        if id == SlotId::Character && state.locked_character.is_some() {
            continue;
        }
        attachments.push(Attachment::new(slot_label(id), image.clone()));
    }
    let consumed_pose = push_pose(&mut attachments, state);

    AssembledRequest {
        prompt,
        attachments,
        scene_description: Some(scene),
        target_format: state.format,
        parent_version_id: None,
        origin: GenerationRequest::Initial.kind().to_string(),
        consumed_face: false,
        consumed_pose,
    }
}

fn assemble_quick_initial(state: &AppState) -> StudioResult<AssembledRequest> {
    let description = state.quick.description.trim().to_string();
    let references = state.quick.references();
    if description.is_empty() && references.is_empty() {
        return Err(StudioError::invalid(
            "quick mode needs a scene description or at least one reference image",
        ));
    }
    let scene = if description.is_empty() {
        QUICK_IMAGES_ONLY_SCENE
    } else {
        description.as_str()
    };
    let mut prompt = compose_prompt(state, Mode::Quick, scene);
    append_overlay(&mut prompt, state, Mode::Quick);

    let mut attachments = Vec::new();
    push_locked_character(&mut attachments, state);
    attachments.extend(
        references
            .into_iter()
            .map(|image| Attachment::new(QUICK_REFERENCE_LABEL, image)),
    );
    let consumed_pose = push_pose(&mut attachments, state);

    Ok(AssembledRequest {
        prompt,
        attachments,
        scene_description: Some(description),
        target_format: state.format,
        parent_version_id: None,
        origin: GenerationRequest::Initial.kind().to_string(),
        consumed_face: false,
        consumed_pose,
    })
}

fn assemble_final_take(state: &AppState, script: &str) -> StudioResult<AssembledRequest> {
    let script = script.trim();
    if script.is_empty() {
        return Err(StudioError::invalid("final take needs a video script"));
    }
    let base = base_version(state, Mode::Advanced)?;
    let mut attachments = vec![Attachment::new(FINAL_TAKE_LABEL, base.image.clone())];
    push_locked_character(&mut attachments, state);
    let consumed_pose = push_pose(&mut attachments, state);
    Ok(AssembledRequest {
        prompt: script.to_string(),
        attachments,
        scene_description: base.scene_description.clone(),
        target_format: base.format,
        parent_version_id: Some(base.version_id.clone()),
        origin: "final_take".to_string(),
        consumed_face: false,
        consumed_pose,
    })
}

fn assemble_variation(
    state: &AppState,
    request: &GenerationRequest,
    mode: Mode,
    canvas: &dyn CanvasComposer,
) -> StudioResult<AssembledRequest> {
    let base = base_version(state, mode)?;
    let scene = {
        let live = state.scene_description_for(mode).trim();
        if live.is_empty() {
            base.scene_description.clone().unwrap_or_default()
        } else {
            live.to_string()
        }
    };

    let (edit_prompt, upscale, mask, format_target) = match request {
        GenerationRequest::Variation {
            edit_prompt,
            upscale,
        } => (edit_prompt.as_deref(), *upscale, None, None),
        GenerationRequest::FormatChange { target } => (None, false, None, Some(*target)),
        GenerationRequest::InpaintEdit { edit_prompt, mask } => {
            (Some(edit_prompt.as_str()), false, Some(mask), None)
        }
        GenerationRequest::Initial | GenerationRequest::FinalTake { .. } => {
            return Err(StudioError::invalid(format!(
                "'{}' is not a variation request",
                request.kind()
            )))
        }
    };
    let edit_prompt = edit_prompt.map(str::trim).filter(|edit| !edit.is_empty());
    let overlay = state.params.overlay_for(mode);
    let format_target = format_target.filter(|target| *target != state.format);

    let mut attachments = Vec::new();
    let mut consumed_face = false;
    let mut origin = request.kind().to_string();
    let mut target_format = state.format;

    let body = if let Some(face) = state.aux.new_character_face() {
        attachments.push(Attachment::new(FACE_SWAP_BASE_LABEL, base.image.clone()));
        attachments.push(Attachment::new(FACE_SWAP_FACE_LABEL, face.clone()));
        push_locked_character(&mut attachments, state);
        consumed_face = true;
        origin = "face_swap".to_string();
        FACE_SWAP_BODY.to_string()
    } else if let Some(target) = format_target {
        let padded = canvas
            .compose_outpaint_canvas(&base.image, target)
            .map_err(|err| StudioError::invalid(format!("failed to compose outpaint canvas: {err:#}")))?;
        attachments.push(Attachment::new(
            format!("[Padded base image]: {FILL_ONLY_DIRECTIVE}"),
            padded,
        ));
        push_locked_character(&mut attachments, state);
        push_extra_references(&mut attachments, state, mode);
        target_format = target;
        format!(
            "{FILL_ONLY_DIRECTIVE} Use the following description to complete the scene: \"{scene}\"."
        )
    } else {
        attachments.push(Attachment::new(VARIATION_BASE_LABEL, base.image.clone()));
        push_locked_character(&mut attachments, state);
        push_extra_references(&mut attachments, state, mode);
        if matches!(request, GenerationRequest::FormatChange { .. }) {
            origin = "variation".to_string();
        }
        if edit_prompt.is_some() || !overlay.is_empty() {
            EDIT_BODY.to_string()
        } else if upscale {
            UPSCALE_BODY.to_string()
        } else {
            VARIATION_BODY.to_string()
        }
    };

    let mut prompt = body;
    if format_target.is_none() && !scene.is_empty() {
        prompt.push_str(&format!(" {SCENE_MARKER} {}", scene.trim_end_matches('.')));
    }
    if let Some(edit) = edit_prompt {
        prompt.push_str(EDIT_SUFFIX_PREFIX);
        prompt.push_str(edit);
    }
    if upscale {
        prompt.push_str(UPSCALE_SUFFIX);
    }
    let pose = state.params.pose.trim();
    if !pose.is_empty() && !upscale {
        prompt.push_str(&format!(". POSE: {pose}"));
    }
    if !overlay.is_empty() {
        prompt.push_str(&overlay_directive(overlay));
    }

    let consumed_pose = push_pose(&mut attachments, state);
    if let Some(mask) = mask {
        attachments.push(Attachment::new(MASK_LABEL, mask.clone()));
    }

    Ok(AssembledRequest {
        prompt,
        attachments,
        scene_description: Some(scene),
        target_format,
        parent_version_id: Some(base.version_id.clone()),
        origin,
        consumed_face,
        consumed_pose,
    })
}

fn base_version(state: &AppState, mode: Mode) -> StudioResult<&Version> {
    state.history_for(mode).current().ok_or_else(|| {
        StudioError::invalid(format!("no {mode} image to vary; generate one first"))
    })
}

/// `{quality} {composition} Scene details: {scene}. Avoid strictly: {negatives}`
fn compose_prompt(state: &AppState, mode: Mode, scene: &str) -> String {
    let params = &state.params;
    let quality = if params.is_ugc() {
        UGC_QUALITY.to_string()
    } else {
        format!("{STUDIO_QUALITY} Visual style: {}.", params.style.trim())
    };

    let mut composition = format!("Intention: {}.", params.intention.trim());
    if mode == Mode::Advanced {
        composition.push_str(&format!(
            " Character framing: {}.",
            state.scene.framing.label()
        ));
    }
    let pose = params.pose.trim();
    if !pose.is_empty() {
        composition.push_str(&format!(" The character pose must be: {pose}."));
    }
    composition.push_str(&format!(
        " Exact aspect ratio of {}, no borders.",
        state.format
    ));

    let mut negatives = Vec::new();
    let user_negative = params.negative_prompt.trim().trim_end_matches(',');
    if !user_negative.is_empty() {
        negatives.push(user_negative);
    }
    negatives.push(FIXED_NEGATIVES);
    if params.is_ugc() {
        negatives.push(UGC_EXTRA_NEGATIVES);
    }

    format!(
        "{quality} {composition} {SCENE_MARKER} {}{NEGATIVE_MARKER} {}.",
        scene.trim().trim_end_matches('.'),
        negatives.join(", ")
    )
}

fn append_overlay(prompt: &mut String, state: &AppState, mode: Mode) {
    let overlay = state.params.overlay_for(mode);
    if !overlay.is_empty() {
        prompt.push_str(&overlay_directive(overlay));
    }
}

fn slot_label(id: SlotId) -> String {
    match id {
        SlotId::Character => CHARACTER_REFERENCE_LABEL.to_string(),
        id if id.is_item() => format!("[{}] {ITEM_REFERENCE_LABEL}", id.title()),
        id => format!("[{}]", id.title()),
    }
}

/// The locked identity rides along with every generation, right after the
/// base image(s) or ahead of the slot references on an initial call.
fn push_locked_character(attachments: &mut Vec<Attachment>, state: &AppState) {
    if let Some(locked) = &state.locked_character {
        attachments.push(Attachment::new(LOCKED_CHARACTER_LABEL, locked.clone()));
    }
}

fn push_extra_references(attachments: &mut Vec<Attachment>, state: &AppState, mode: Mode) {
    if mode != Mode::Quick {
        return;
    }
    for image in state.quick.edit_references() {
        attachments.push(Attachment::new(EXTRA_REFERENCE_LABEL, image));
    }
}

fn push_pose(attachments: &mut Vec<Attachment>, state: &AppState) -> bool {
    match state.aux.pose_reference() {
        Some(pose) => {
            attachments.push(Attachment::new(POSE_REFERENCE_LABEL, pose.clone()));
            true
        }
        None => false,
    }
}
