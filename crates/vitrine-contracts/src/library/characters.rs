use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StorageWarning;
use crate::error::{StudioError, StudioResult};
use crate::scene::CharacterSnapshot;
use crate::storage::KeyValueStore;

pub const CHARACTER_LIBRARY_KEY: &str = "vitrine_saved_characters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCharacter {
    pub id: String,
    pub name: String,
    pub snapshot: CharacterSnapshot,
    #[serde(default = "default_favorite")]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_pinned: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

fn default_favorite() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LibraryFilter {
    #[default]
    All,
    Pinned,
    Favorites,
}

impl LibraryFilter {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pinned" | "pin" => LibraryFilter::Pinned,
            "favorites" | "favourites" | "fav" | "favorite" => LibraryFilter::Favorites,
            _ => LibraryFilter::All,
        }
    }

    fn admits(&self, character: &SavedCharacter) -> bool {
        match self {
            LibraryFilter::All => true,
            LibraryFilter::Pinned => character.is_pinned,
            LibraryFilter::Favorites => character.is_favorite,
        }
    }
}

/// Process-wide saved-character list. Stored most-recent-first; every
/// mutation is persisted and rolled back in memory when the write fails.
#[derive(Debug, Clone, Default)]
pub struct CharacterLibrary {
    characters: Vec<SavedCharacter>,
    warn_bytes: usize,
}

impl CharacterLibrary {
    pub fn new(warn_bytes: usize) -> Self {
        Self {
            characters: Vec::new(),
            warn_bytes,
        }
    }

    /// Reads the persisted list. Data that is not a JSON array of characters
    /// is discarded and described in the returned notice.
    pub fn load(
        store: &mut dyn KeyValueStore,
        warn_bytes: usize,
    ) -> StudioResult<(Self, Option<String>)> {
        let mut library = Self::new(warn_bytes);
        let Some(raw) = store.get(CHARACTER_LIBRARY_KEY)? else {
            return Ok((library, None));
        };
        match serde_json::from_str::<Vec<SavedCharacter>>(&raw) {
            Ok(characters) => {
                library.characters = characters;
                Ok((library, None))
            }
            Err(err) => Ok((
                library,
                Some(format!("discarded unreadable character library: {err}")),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SavedCharacter> {
        self.characters.iter().find(|character| character.id == id)
    }

    /// Pinned first, then favorites, then newest.
    pub fn list(&self, filter: LibraryFilter) -> Vec<&SavedCharacter> {
        let mut listed: Vec<&SavedCharacter> = self
            .characters
            .iter()
            .filter(|character| filter.admits(character))
            .collect();
        listed.sort_by_key(|character| {
            (
                Reverse(character.is_pinned),
                Reverse(character.is_favorite),
                Reverse(character.created_at),
            )
        });
        listed
    }

    pub fn save(
        &mut self,
        store: &mut dyn KeyValueStore,
        snapshot: CharacterSnapshot,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StudioResult<(SavedCharacter, Option<StorageWarning>)> {
        if snapshot.is_empty() {
            return Err(StudioError::EmptyCharacter);
        }
        let name = name
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Character {}", now.format("%Y-%m-%d %H:%M")));
        let character = SavedCharacter {
            id: format!("char_{}", Uuid::new_v4().simple()),
            name,
            snapshot,
            is_favorite: true,
            is_pinned: false,
            created_at: now.timestamp_millis(),
        };
        self.characters.insert(0, character.clone());
        match self.persist(store) {
            Ok(warning) => Ok((character, warning)),
            Err(err) => {
                self.characters.remove(0);
                Err(err)
            }
        }
    }

    /// Returns `Ok(None)` without writing when `id` is unknown.
    pub fn delete(
        &mut self,
        store: &mut dyn KeyValueStore,
        id: &str,
    ) -> StudioResult<Option<StorageWarning>> {
        let Some(index) = self.position(id) else {
            return Ok(None);
        };
        let removed = self.characters.remove(index);
        self.persist(store).inspect_err(|_| {
            self.characters.insert(index, removed);
        })
    }

    pub fn toggle_favorite(
        &mut self,
        store: &mut dyn KeyValueStore,
        id: &str,
    ) -> StudioResult<Option<StorageWarning>> {
        self.toggle(store, id, |character| {
            character.is_favorite = !character.is_favorite
        })
    }

    pub fn toggle_pin(
        &mut self,
        store: &mut dyn KeyValueStore,
        id: &str,
    ) -> StudioResult<Option<StorageWarning>> {
        self.toggle(store, id, |character| {
            character.is_pinned = !character.is_pinned
        })
    }

    fn toggle(
        &mut self,
        store: &mut dyn KeyValueStore,
        id: &str,
        flip: impl Fn(&mut SavedCharacter),
    ) -> StudioResult<Option<StorageWarning>> {
        let Some(index) = self.position(id) else {
            return Ok(None);
        };
        flip(&mut self.characters[index]);
        self.persist(store).inspect_err(|_| {
            flip(&mut self.characters[index]);
        })
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.characters
            .iter()
            .position(|character| character.id == id)
    }

    fn persist(&self, store: &mut dyn KeyValueStore) -> StudioResult<Option<StorageWarning>> {
        let blob = serde_json::to_string(&self.characters)?;
        let warning = StorageWarning::check(CHARACTER_LIBRARY_KEY, blob.len(), self.warn_bytes);
        store.set(CHARACTER_LIBRARY_KEY, &blob)?;
        Ok(warning)
    }
}
