use serde_json::Value;
use thiserror::Error;
use vitrine_contracts::scene::ImageData;

use crate::retry::CancelHandle;

/// One element of a multimodal request, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    Image(ImageData),
}

impl PromptPart {
    pub fn text(value: impl Into<String>) -> Self {
        PromptPart::Text(value.into())
    }
}

/// Image reference sent with an image request; the label tells the model how
/// to use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub label: String,
    pub image: ImageData,
}

impl Attachment {
    pub fn new(label: impl Into<String>, image: ImageData) -> Self {
        Self {
            label: label.into(),
            image,
        }
    }
}

/// Result of an image request that reached the model. `NoImage` is a
/// content-level outcome, not a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Image(ImageData),
    NoImage { text: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    /// Flattens a provider-internal error chain, keeping the HTTP status when
    /// one is present.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        if let Some(api) = err.downcast_ref::<ApiError>() {
            return api.clone();
        }
        let text = error_chain_text(&err, 512);
        let is_transport = err.chain().any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .map(|reqwest_err| {
                    reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
                })
                .unwrap_or(false)
        });
        if is_transport {
            ApiError::Transport(text)
        } else {
            ApiError::InvalidResponse(text)
        }
    }
}

/// The remote generation surface the studio depends on. Calls block; the
/// cancel handle is checked by implementations before sending.
pub trait GenerativeApi: Send + Sync {
    fn name(&self) -> &str;

    fn generate_text(&self, parts: &[PromptPart], cancel: &CancelHandle)
        -> Result<String, ApiError>;

    fn generate_structured(
        &self,
        parts: &[PromptPart],
        schema: &Value,
        cancel: &CancelHandle,
    ) -> Result<Value, ApiError>;

    fn generate_image(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        cancel: &CancelHandle,
    ) -> Result<ImageOutcome, ApiError>;
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
