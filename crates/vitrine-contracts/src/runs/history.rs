use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::scene::{AspectRatio, ImageData};

/// Marker that precedes the scene description inside a composed prompt.
pub const SCENE_MARKER: &str = "Scene details:";
/// Marker that follows the scene description inside a composed prompt.
pub const NEGATIVE_MARKER: &str = ". Avoid strictly:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: String,
    pub parent_version_id: Option<String>,
    pub image: ImageData,
    pub prompt: String,
    /// Scene description the prompt was built from, stored verbatim so a
    /// rewind does not have to re-derive it from the composed text.
    #[serde(default)]
    pub scene_description: Option<String>,
    #[serde(default)]
    pub format: AspectRatio,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub prompt_diff: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: String,
}

/// Fields the orchestrator supplies when committing a result.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub image: ImageData,
    pub prompt: String,
    pub scene_description: Option<String>,
    pub format: AspectRatio,
    pub origin: String,
    pub parent_version_id: Option<String>,
}

/// Append-only version ledger for one mode.
///
/// Rewinding moves the "current" cursor without touching the sequence; the
/// next append still lands at the end and becomes current.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionHistory {
    #[serde(default)]
    versions: Vec<Version>,
    #[serde(default)]
    cursor: Option<usize>,
    #[serde(default)]
    next_seq: u64,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: NewVersion) -> &Version {
        let prev = entry
            .parent_version_id
            .as_deref()
            .and_then(|id| self.get(id));
        let prompt_diff = prompt_diff(prev.map(|version| version.prompt.as_str()), &entry.prompt);
        self.next_seq = self.next_seq.max(self.versions.len() as u64) + 1;
        let version = Version {
            version_id: format!("v{}", self.next_seq),
            parent_version_id: entry.parent_version_id,
            image: entry.image,
            prompt: entry.prompt,
            scene_description: entry.scene_description,
            format: entry.format,
            origin: entry.origin,
            prompt_diff,
            created_at: now_utc_iso(),
        };
        self.versions.push(version);
        self.cursor = None;
        &self.versions[self.versions.len() - 1]
    }

    /// Makes an existing version current and returns the scene description to
    /// put back into the editor. Unknown ids leave the ledger untouched.
    pub fn rewind(&mut self, version_id: &str) -> Option<String> {
        let index = self
            .versions
            .iter()
            .position(|version| version.version_id == version_id)?;
        self.cursor = if index + 1 == self.versions.len() {
            None
        } else {
            Some(index)
        };
        let version = &self.versions[index];
        Some(
            version
                .scene_description
                .clone()
                .or_else(|| extract_scene_description(&version.prompt))
                .unwrap_or_default(),
        )
    }

    pub fn current(&self) -> Option<&Version> {
        match self.cursor {
            Some(index) => self.versions.get(index),
            None => self.versions.last(),
        }
    }

    pub fn last(&self) -> Option<&Version> {
        self.versions.last()
    }

    pub fn is_rewound(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn get(&self, version_id: &str) -> Option<&Version> {
        self.versions
            .iter()
            .find(|version| version.version_id == version_id)
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn clear(&mut self) {
        self.versions.clear();
        self.cursor = None;
    }
}

/// Best-effort recovery of the scene text from a composed prompt.
pub fn extract_scene_description(prompt: &str) -> Option<String> {
    let (_, tail) = prompt.split_once(SCENE_MARKER)?;
    let scene = tail
        .split_once(NEGATIVE_MARKER)
        .map(|(head, _)| head)
        .unwrap_or(tail)
        .trim();
    if scene.is_empty() {
        return None;
    }
    Some(scene.to_string())
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_words(prev, curr);
    let rendered = diff.unified_diff().header("parent", "version").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::{extract_scene_description, NewVersion, VersionHistory};
    use crate::scene::{AspectRatio, ImageData};

    fn entry(tag: u8, prompt: &str, parent: Option<&str>) -> NewVersion {
        NewVersion {
            image: ImageData::new(vec![tag]),
            prompt: prompt.to_string(),
            scene_description: None,
            format: AspectRatio::SQUARE,
            origin: "initial".to_string(),
            parent_version_id: parent.map(str::to_string),
        }
    }

    #[test]
    fn rewind_never_shortens_and_next_append_lands_at_end() {
        let mut history = VersionHistory::new();
        history.append(entry(1, "one", None));
        history.append(entry(2, "two", Some("v1")));
        history.append(entry(3, "three", Some("v2")));

        history.rewind("v1");
        assert_eq!(history.len(), 3);
        assert_eq!(history.current().map(|v| v.version_id.as_str()), Some("v1"));
        assert!(history.is_rewound());

        let appended = history.append(entry(4, "four", Some("v1"))).version_id.clone();
        assert_eq!(history.len(), 4);
        assert_eq!(appended, "v4");
        assert_eq!(history.last().map(|v| v.version_id.as_str()), Some("v4"));
        assert_eq!(history.current().map(|v| v.version_id.as_str()), Some("v4"));
        let order: Vec<&str> = history.versions().iter().map(|v| v.prompt.as_str()).collect();
        assert_eq!(order, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn rewind_prefers_stored_scene_description() {
        let mut history = VersionHistory::new();
        let mut first = entry(1, "Look. Scene details: composed. Avoid strictly: blur", None);
        first.scene_description = Some("a model on a pier".to_string());
        history.append(first);
        history.append(entry(2, "Look. Scene details: rooftop party. Avoid strictly: blur", None));

        assert_eq!(history.rewind("v1").as_deref(), Some("a model on a pier"));
        assert_eq!(history.rewind("v2").as_deref(), Some("rooftop party"));
        assert!(!history.is_rewound());
        assert_eq!(history.rewind("v9"), None);
    }

    #[test]
    fn scene_extraction_is_best_effort() {
        assert_eq!(extract_scene_description("no markers here"), None);
        assert_eq!(
            extract_scene_description("x Scene details: tail without negatives").as_deref(),
            Some("tail without negatives")
        );
    }

    #[test]
    fn variation_records_prompt_diff_against_parent() {
        let mut history = VersionHistory::new();
        history.append(entry(1, "red dress on a beach", None));
        let second = history.append(entry(2, "blue dress on a beach", Some("v1")));
        assert!(second.prompt_diff.is_some());
        assert_eq!(second.parent_version_id.as_deref(), Some("v1"));
    }

    #[test]
    fn ids_stay_unique_after_clear() {
        let mut history = VersionHistory::new();
        history.append(entry(1, "a", None));
        history.clear();
        assert!(history.is_empty());
        let id = history.append(entry(2, "b", None)).version_id.clone();
        assert_eq!(id, "v2");
    }
}
