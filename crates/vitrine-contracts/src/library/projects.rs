use std::cmp::Reverse;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::StorageWarning;
use crate::error::{StudioError, StudioResult};
use crate::storage::KeyValueStore;

pub const PROJECT_KEY_PREFIX: &str = "vitrine_project_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Serialized session state, see `AppState::to_blob`.
    pub data: String,
    pub saved_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub key: String,
    pub name: String,
    pub saved_at: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectStore {
    warn_bytes: usize,
}

impl ProjectStore {
    pub fn new(warn_bytes: usize) -> Self {
        Self { warn_bytes }
    }

    /// Writes a snapshot under a fresh timestamped key and returns that key.
    pub fn save(
        &self,
        store: &mut dyn KeyValueStore,
        name: Option<&str>,
        data: String,
        now: DateTime<Utc>,
    ) -> StudioResult<(String, Option<StorageWarning>)> {
        let name = name
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Project {}", now.format("%Y-%m-%d %H:%M")));
        let mut stamp = now.timestamp_millis();
        let existing = store.keys(PROJECT_KEY_PREFIX)?;
        let key = loop {
            let candidate = format!("{PROJECT_KEY_PREFIX}{stamp}");
            if !existing.contains(&candidate) {
                break candidate;
            }
            stamp += 1;
        };
        let project = Project {
            name,
            data,
            saved_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let blob = serde_json::to_string(&project)?;
        let warning = StorageWarning::check(&key, blob.len(), self.warn_bytes);
        store.set(&key, &blob)?;
        Ok((key, warning))
    }

    pub fn load(&self, store: &mut dyn KeyValueStore, key: &str) -> StudioResult<Project> {
        let raw = store
            .get(key)?
            .ok_or_else(|| StudioError::invalid(format!("no project stored under '{key}'")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn delete(&self, store: &mut dyn KeyValueStore, key: &str) -> StudioResult<()> {
        if !key.starts_with(PROJECT_KEY_PREFIX) {
            return Err(StudioError::invalid(format!("'{key}' is not a project key")));
        }
        store.remove(key)?;
        Ok(())
    }

    /// Newest first. Entries that fail to parse are skipped.
    pub fn list(&self, store: &mut dyn KeyValueStore) -> StudioResult<Vec<ProjectSummary>> {
        let mut keyed = Vec::new();
        for key in store.keys(PROJECT_KEY_PREFIX)? {
            let Some(raw) = store.get(&key)? else {
                continue;
            };
            let Ok(project) = serde_json::from_str::<Project>(&raw) else {
                continue;
            };
            let stamp = key
                .strip_prefix(PROJECT_KEY_PREFIX)
                .and_then(|tail| tail.parse::<i64>().ok())
                .unwrap_or(0);
            keyed.push((
                stamp,
                ProjectSummary {
                    key,
                    name: project.name,
                    saved_at: project.saved_at,
                },
            ));
        }
        keyed.sort_by_key(|(stamp, _)| Reverse(*stamp));
        Ok(keyed.into_iter().map(|(_, summary)| summary).collect())
    }
}
