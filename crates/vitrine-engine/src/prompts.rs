//! Instruction text and response schemas for the text operations, plus the
//! fixed fragments the image prompt is built from.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use vitrine_contracts::scene::{ImageData, SceneComponents, SlotId};

use crate::api::PromptPart;

pub const STUDIO_QUALITY: &str = "Ultra-realistic photograph with professional camera quality, 8k, visible skin and fabric textures, natural lighting, indistinguishable from a real photo.";

pub const UGC_QUALITY: &str = "Authentic UGC (user-generated content) video aesthetic, shot on a high-end smartphone for social media (TikTok/Reels style). Casual natural light (window light, soft ring light). Everyday setting. Spontaneous, unposed moment. Focus on natural skin texture and the realistic quality of a smartphone camera, not a polished 8k studio look. IMPORTANT: the final image must be clean and contain ONLY the photographed scene. Do NOT include ANY social media interface elements such as like icons, comments, usernames, hashtags or progress bars.";

pub const UGC_EXTRA_NEGATIVES: &str = "user interface, UI, icons, overlaid text, studio lighting, artificial pose, over-polished, too perfect, unreal, professional photography, 8k, haute couture";

pub const FIXED_NEGATIVES: &str = "excessive filters, oversaturation, \"AI art\" look";

pub const STYLE_REFERENCE_LABEL: &str = "[Principal style reference]: Use this image as the principal style inspiration for the artistic style, lighting and atmosphere.";
pub const LOCKED_CHARACTER_LABEL: &str = "[FIXED CHARACTER]: Keep the facial identity of this person. This is a fixed identity.";
pub const CHARACTER_REFERENCE_LABEL: &str = "[Character reference]: Use ONLY the facial and physical traits of this person; ignore the pose, clothing and background of this reference.";
pub const ITEM_REFERENCE_LABEL: &str = "[Use ONLY the item (clothing, accessory, product) from this reference image and ignore the wearer.]";
pub const POSE_REFERENCE_LABEL: &str = "[Pose reference]: Reproduce the body pose shown in this image.";
pub const QUICK_REFERENCE_LABEL: &str = "[General visual reference]: Use this image as a general visual reference for the scene.";
pub const FACE_SWAP_BASE_LABEL: &str = "[BASE IMAGE]: Preserve the composition, pose and clothing of this image.";
pub const FACE_SWAP_FACE_LABEL: &str = "[NEW CHARACTER]: Apply this identity (face) to the base image.";
pub const VARIATION_BASE_LABEL: &str = "[Base image for variation or edit]";
pub const FINAL_TAKE_LABEL: &str = "[Initial frame]: Use this image only for visual consistency of the character, wardrobe and setting.";
pub const EXTRA_REFERENCE_LABEL: &str = "[Additional visual inspiration]";
pub const MASK_LABEL: &str = "[EDIT MASK]: Alter only the white region of the mask.";

pub const FILL_ONLY_DIRECTIVE: &str = "The central image has been padded with a neutral gray fill to a new aspect ratio. Fill ONLY the padded regions, extending the scene naturally; do not alter the original content; no visible fill-color borders may remain.";

pub const VARIATION_BODY: &str = "Rework this image, keeping its style and subject.";
pub const UPSCALE_BODY: &str = "Raise the quality and realism of this image to 8k. Add fine detail and realistic texture to skin, fabric and set surfaces, improve the lighting so it looks natural and professional with sharp focus, and keep the composition, pose and every element of the original intact.";
pub const UPSCALE_SUFFIX: &str = ". The image must be 8k, hyper-detailed, with sharp focus and professional quality.";
pub const EDIT_SUFFIX_PREFIX: &str = ". APPLY THE FOLLOWING CHANGE: ";

pub const STRUCTURED_FIELDS: [&str; 7] = [
    "subject",
    "action",
    "setting",
    "style",
    "lighting",
    "composition",
    "details",
];

pub const CONCEPT_FIELDS: [SlotId; 5] = SlotId::SCENE_ORDER;

pub fn overlay_directive(text: &str) -> String {
    format!(
        ". The image MUST contain the EXACT text \"{text}\" rendered prominently, clearly and in a stylistically fitting way."
    )
}

/// Parts for the art-director scene description: style reference first, then
/// every scene slot that has an image or text.
pub fn describe_scene_parts(scene: &SceneComponents) -> Vec<PromptPart> {
    let mut parts = vec![PromptPart::text(
        "Act as an art director. Write a description for an image generator. Creatively fill in any missing details to build a complete, coherent scene. The final description must be a single cohesive narrative.",
    )];

    if let Some(image) = &scene.style_reference.image {
        parts.push(PromptPart::text(
            "\n[Style Reference]: The following image is the main reference for visual style, lighting, colour scheme and overall composition. The described scene should closely match this aesthetic.",
        ));
        parts.push(PromptPart::Image(image.clone()));
    }

    for id in SlotId::SCENE_ORDER {
        let slot = scene.slot(id);
        if slot.is_empty() {
            continue;
        }
        let text = slot.text.trim();
        let mut line = format!(
            "\n[{}]: {}",
            id.title(),
            if text.is_empty() {
                "As shown in the image."
            } else {
                text
            }
        );
        if id == SlotId::Character {
            line.push_str(&format!(" Framing: {}.", scene.framing.label()));
        }
        if id.is_item() && slot.has_image() {
            line.push_str(" Extract ONLY the item (clothing, accessory or product) from this image to place in the scene, ignoring any person or busy background in the reference.");
        }
        parts.push(PromptPart::Text(line));
        if let Some(image) = &slot.image {
            parts.push(PromptPart::Image(image.clone()));
        }
    }
    parts
}

pub fn suggest_edits_parts(prompt: &str) -> Vec<PromptPart> {
    vec![PromptPart::Text(format!(
        "Based on the following description: \"{prompt}\", suggest 3 creative edits. Reply only with a newline-separated list."
    ))]
}

/// Non-empty lines with list markers stripped, at most three.
pub fn parse_suggestions(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|ch: char| ch.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(3)
        .collect()
}

pub fn improve_prompt_parts(prompt: &str) -> Vec<PromptPart> {
    vec![PromptPart::Text(format!(
        "You are a prompt engineer for a photorealistic fashion image generator. Rewrite the following scene description so it is vivid, specific and unambiguous about subject, wardrobe, setting, lighting and camera. Keep the original intent. Reply only with the improved description.\n\nDescription: \"{prompt}\""
    ))]
}

pub fn improve_overlay_parts(text: &str, scene: &str) -> Vec<PromptPart> {
    vec![PromptPart::Text(format!(
        "You are a copywriter for a fashion brand. The image being generated shows: \"{scene}\". Improve the following text so it works as a short, striking on-image caption for that scene. Reply only with the improved text, without quotes.\n\nText: \"{text}\""
    ))]
}

/// Prompt broken into its components by `structure_prompt`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredPrompt {
    pub subject: String,
    pub action: String,
    pub setting: String,
    pub style: String,
    pub lighting: String,
    pub composition: String,
    pub details: String,
}

impl StructuredPrompt {
    /// Non-empty fields in display order, joined with ", ".
    pub fn joined(&self) -> String {
        [
            &self.subject,
            &self.action,
            &self.setting,
            &self.style,
            &self.lighting,
            &self.composition,
            &self.details,
        ]
        .into_iter()
        .map(|field| field.trim())
        .filter(|field| !field.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

pub fn structure_prompt_parts(prompt: &str) -> Vec<PromptPart> {
    vec![PromptPart::Text(format!(
        "Break the following image description into its components: subject, action, setting, style, lighting, composition and details. Use an empty string for anything the description does not mention.\n\nDescription: \"{prompt}\""
    ))]
}

pub fn structure_schema() -> Value {
    string_object_schema(&STRUCTURED_FIELDS)
}

pub fn concept_parts(theme: &str, image: Option<&ImageData>, character_type: &str) -> Vec<PromptPart> {
    let mut instruction = "You are a fashion stylist. Create a complete fashion concept from the following inspiration.".to_string();
    if !theme.trim().is_empty() {
        instruction.push_str(&format!(" The main theme is: \"{}\".", theme.trim()));
    }
    if !character_type.trim().is_empty() {
        instruction.push_str(&format!(" The character is a {}.", character_type.trim()));
    }
    if image.is_some() {
        instruction.push_str(" Use the reference image as the main inspiration for style, colours and atmosphere.");
    }
    instruction.push_str(" Provide concise descriptions for: Character, Background, Clothing, Accessory and a Product related to the theme.");

    let mut parts = vec![PromptPart::Text(instruction)];
    if let Some(image) = image {
        parts.push(PromptPart::Image(image.clone()));
    }
    parts
}

pub fn concept_schema() -> Value {
    let keys: Vec<&str> = CONCEPT_FIELDS.iter().map(|id| id.key()).collect();
    string_object_schema(&keys)
}

pub fn captions_parts(prompt: &str) -> Vec<PromptPart> {
    vec![PromptPart::Text(format!(
        "You are a social media manager for a fashion brand. Based on the following image description: \"{prompt}\", write 3 engaging Instagram captions. Include relevant emojis and hashtags."
    ))]
}

pub fn captions_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "captions": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }
        },
        "required": ["captions"]
    })
}

pub struct VideoScriptContext<'a> {
    pub base_prompt: &'a str,
    pub scene: &'a SceneComponents,
    pub intention: &'a str,
    pub duration_s: u64,
    pub camera_style: &'a str,
    pub initial_image: &'a ImageData,
}

pub fn video_script_parts(context: &VideoScriptContext<'_>) -> Vec<PromptPart> {
    let mut details = Vec::new();
    for id in [
        SlotId::Character,
        SlotId::Clothing,
        SlotId::Background,
        SlotId::Accessory,
    ] {
        let text = context.scene.slot(id).text.trim();
        if !text.is_empty() {
            details.push(format!("{}: {text}", id.title()));
        }
    }
    let instruction = format!(
        "You are a film director writing a shot list for a fashion film made by an AI video generator. The video lasts {} seconds. The main scene is: '{}'. {}Intention: {}. Camera style: '{}'. Write a professional shot-by-shot script describing what happens from the start (the attached image) to a new final state. Also give a one-sentence summary. Return a JSON object with the keys 'summary' and 'script'.",
        context.duration_s,
        context.base_prompt.trim(),
        if details.is_empty() {
            String::new()
        } else {
            format!("Details: {}. ", details.join("; "))
        },
        context.intention,
        context.camera_style.trim(),
    );
    vec![
        PromptPart::Text(instruction),
        PromptPart::Image(context.initial_image.clone()),
    ]
}

pub fn video_script_schema() -> Value {
    string_object_schema(&["summary", "script"])
}

fn string_object_schema(keys: &[&str]) -> Value {
    let mut properties = Map::new();
    for key in keys {
        properties.insert((*key).to_string(), json!({ "type": "STRING" }));
    }
    json!({
        "type": "OBJECT",
        "properties": Value::Object(properties),
        "required": keys,
    })
}
