use thiserror::Error;

use crate::scene::SlotId;

pub type StudioResult<T> = Result<T, StudioError>;

/// Failures surfaced to the presentation layer.
///
/// Local validation errors (`InvalidRequest`, `CapacityExceeded`,
/// `EmptyCharacter`) are raised before any network call. Remote failures are
/// folded into `TransientApiFailure` or `NoImageProduced` at the orchestrator
/// boundary, so no transport error type leaks past it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("slot '{slot}' cannot take another image: at most {limit} of bg/cloth/acc/prod may hold images")]
    CapacityExceeded { slot: SlotId, limit: usize },
    #[error("there is no character to save")]
    EmptyCharacter,
    #[error("generation failed after {attempts} attempt(s): {detail}")]
    TransientApiFailure { attempts: usize, detail: String },
    #[error("no image was produced after {attempts} attempt(s); the image was likely blocked by the safety policy")]
    NoImageProduced {
        attempts: usize,
        detail: Option<String>,
    },
    #[error("generation cancelled")]
    Cancelled,
    #[error("storage is full or unavailable: {0}")]
    StorageFull(String),
    #[error("a generation is already in flight")]
    GenerationInFlight,
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl StudioError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Single line shown to the user. Model text returned instead of an image
    /// is surfaced verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoImageProduced {
                detail: Some(text), ..
            } if !text.trim().is_empty() => format!("{self} Model response: {}", text.trim()),
            _ => self.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::StudioError;
    use crate::scene::SlotId;

    #[test]
    fn no_image_message_mentions_safety_policy() {
        let err = StudioError::NoImageProduced {
            attempts: 5,
            detail: None,
        };
        assert!(err.user_message().contains("safety policy"));
        assert!(!err.user_message().contains("generation failed"));
    }

    #[test]
    fn no_image_message_surfaces_model_text_verbatim() {
        let err = StudioError::NoImageProduced {
            attempts: 5,
            detail: Some("I can't draw that person.".to_string()),
        };
        assert!(err.user_message().ends_with("I can't draw that person."));
    }

    #[test]
    fn capacity_message_names_slot() {
        let err = StudioError::CapacityExceeded {
            slot: SlotId::Product,
            limit: 3,
        };
        assert!(err.to_string().contains("'prod'"));
    }
}
