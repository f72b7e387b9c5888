mod characters;
mod projects;

use std::fmt;

pub use characters::{CharacterLibrary, LibraryFilter, SavedCharacter, CHARACTER_LIBRARY_KEY};
pub use projects::{Project, ProjectStore, ProjectSummary, PROJECT_KEY_PREFIX};

pub const DEFAULT_PROJECT_WARN_BYTES: usize = 4_718_592;
pub const DEFAULT_LIBRARY_WARN_BYTES: usize = 5_033_164;

/// Non-fatal notice that a persisted blob is approaching the store's limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWarning {
    pub key: String,
    pub bytes: usize,
    pub threshold: usize,
}

impl StorageWarning {
    pub(crate) fn check(key: &str, bytes: usize, threshold: usize) -> Option<Self> {
        (bytes > threshold).then(|| Self {
            key: key.to_string(),
            bytes,
            threshold,
        })
    }
}

impl fmt::Display for StorageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is {:.1} MB, above the {:.1} MB safety threshold; storage may fill up soon",
            self.key,
            self.bytes as f64 / 1_048_576.0,
            self.threshold as f64 / 1_048_576.0
        )
    }
}
