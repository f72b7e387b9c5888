use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use vitrine_contracts::scene::ImageData;

use crate::api::{ApiError, Attachment, GenerativeApi, ImageOutcome, PromptPart};
use crate::retry::CancelHandle;

const DRYRUN_SIDE: u32 = 64;

/// Offline provider: deterministic text, schema-shaped JSON and solid-colour
/// PNGs derived from a hash of the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunProvider;

impl DryrunProvider {
    pub fn new() -> Self {
        Self
    }
}

impl GenerativeApi for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_text(&self, parts: &[PromptPart], cancel: &CancelHandle) -> Result<String, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let id = short_id(&joined_text(parts));
        Ok(format!(
            "Dry-run suggestion {id}-1\nDry-run suggestion {id}-2\nDry-run suggestion {id}-3"
        ))
    }

    fn generate_structured(
        &self,
        parts: &[PromptPart],
        schema: &Value,
        cancel: &CancelHandle,
    ) -> Result<Value, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let id = short_id(&joined_text(parts));
        Ok(value_for_schema(schema, &id, "value"))
    }

    fn generate_image(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        cancel: &CancelHandle,
    ) -> Result<ImageOutcome, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        for attachment in attachments {
            hasher.update(attachment.image.as_bytes());
        }
        let digest = hasher.finalize();
        let bytes = write_dryrun_png(DRYRUN_SIDE, DRYRUN_SIDE, (digest[0], digest[1], digest[2]))
            .map_err(ApiError::from_anyhow)?;
        Ok(ImageOutcome::Image(ImageData::new(bytes)))
    }
}

fn write_dryrun_png(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode dry-run image")?;
    Ok(bytes)
}

fn joined_text(parts: &[PromptPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            PromptPart::Text(text) => Some(text.as_str()),
            PromptPart::Image(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn short_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..4])
}

fn value_for_schema(schema: &Value, id: &str, key: &str) -> Value {
    let kind = schema
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("STRING")
        .to_ascii_uppercase();
    match kind.as_str() {
        "OBJECT" => {
            let mut out = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    out.insert(name.clone(), value_for_schema(property, id, name));
                }
            }
            Value::Object(out)
        }
        "ARRAY" => {
            let items = schema.get("items").cloned().unwrap_or(Value::Null);
            Value::Array(
                (1..=3)
                    .map(|idx| value_for_schema(&items, id, &format!("{key} {idx}")))
                    .collect(),
            )
        }
        "NUMBER" | "INTEGER" => Value::from(0),
        "BOOLEAN" => Value::Bool(false),
        _ => Value::String(format!("dry-run {key} {id}")),
    }
}
