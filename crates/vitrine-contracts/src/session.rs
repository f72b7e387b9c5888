use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StudioError, StudioResult};
use crate::runs::history::VersionHistory;
use crate::scene::{AspectRatio, AuxSlots, ImageData, QuickScene, SceneComponents};

pub const DEFAULT_NEGATIVE_PROMPT: &str = "deformed face, deformed hands, extra fingers, poor quality, low resolution, AI art, computer generated, unreal, unsharp, blurry, cartoon, painting, ugly, duplicate, frame, black borders, black bars";

/// Top-level keys a project blob may never overwrite on load.
const PROCESS_WIDE_KEYS: &[&str] = &[
    "saved_characters",
    "savedCharacters",
    "generation_session",
    "is_generating",
    "isGenerating",
    "generation_controller",
    "generationController",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Advanced,
    Quick,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Advanced => "advanced",
            Mode::Quick => "quick",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "advanced" | "adv" => Ok(Mode::Advanced),
            "quick" | "simple" => Ok(Mode::Quick),
            _ => Err(format!("unknown mode '{raw}'")),
        }
    }
}

/// Art-direction parameters selected alongside the components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub style: String,
    pub intention: String,
    pub pose: String,
    pub negative_prompt: String,
    pub overlay_text: String,
    pub quick_overlay_text: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            style: "editorial fashion photography".to_string(),
            intention: "editorial".to_string(),
            pose: String::new(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            overlay_text: String::new(),
            quick_overlay_text: String::new(),
        }
    }
}

impl GenerationParams {
    pub fn is_ugc(&self) -> bool {
        self.intention.contains("UGC")
    }

    pub fn overlay_for(&self, mode: Mode) -> &str {
        match mode {
            Mode::Advanced => self.overlay_text.trim(),
            Mode::Quick => self.quick_overlay_text.trim(),
        }
    }

    pub fn set_overlay_for(&mut self, mode: Mode, text: impl Into<String>) {
        match mode {
            Mode::Advanced => self.overlay_text = text.into(),
            Mode::Quick => self.quick_overlay_text = text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Inspiration {
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub image: Option<ImageData>,
    #[serde(default)]
    pub character_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoScript {
    pub summary: String,
    pub script: String,
}

/// Everything a project snapshot captures. The character library and the
/// in-flight generation session live outside this struct.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub scene: SceneComponents,
    #[serde(default)]
    pub aux: AuxSlots,
    #[serde(default)]
    pub quick: QuickScene,
    #[serde(default)]
    pub params: GenerationParams,
    #[serde(default)]
    pub base_prompt: String,
    #[serde(default)]
    pub format: AspectRatio,
    #[serde(default)]
    pub locked_character: Option<ImageData>,
    #[serde(default)]
    pub history: VersionHistory,
    #[serde(default)]
    pub quick_history: VersionHistory,
    #[serde(default)]
    pub inspiration: Inspiration,
    #[serde(default)]
    pub video_script: Option<VideoScript>,
    #[serde(default)]
    pub active_mode: Mode,
}

impl AppState {
    pub fn history_for(&self, mode: Mode) -> &VersionHistory {
        match mode {
            Mode::Advanced => &self.history,
            Mode::Quick => &self.quick_history,
        }
    }

    pub fn history_for_mut(&mut self, mode: Mode) -> &mut VersionHistory {
        match mode {
            Mode::Advanced => &mut self.history,
            Mode::Quick => &mut self.quick_history,
        }
    }

    pub fn scene_description_for(&self, mode: Mode) -> &str {
        match mode {
            Mode::Advanced => &self.base_prompt,
            Mode::Quick => &self.quick.description,
        }
    }

    /// Serialized project blob.
    pub fn to_blob(&self) -> StudioResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Merges a project blob into this state: top-level keys present in the
    /// blob replace the live ones, absent keys keep their live value, and
    /// process-wide keys are never taken from the blob.
    pub fn merge_blob(&mut self, blob: &str) -> StudioResult<()> {
        let loaded: Value = serde_json::from_str(blob)?;
        let Value::Object(loaded) = loaded else {
            return Err(StudioError::Serialization(
                "project data is not a JSON object".to_string(),
            ));
        };
        let Value::Object(mut live) = serde_json::to_value(&*self)? else {
            return Err(StudioError::Serialization(
                "live state did not serialize to an object".to_string(),
            ));
        };
        for (key, value) in loaded {
            if PROCESS_WIDE_KEYS.contains(&key.as_str()) {
                continue;
            }
            live.insert(key, value);
        }
        *self = serde_json::from_value(Value::Object(live))?;
        Ok(())
    }
}
