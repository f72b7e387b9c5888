use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use vitrine_contracts::scene::ImageData;

use crate::api::{truncate_text, ApiError, Attachment, GenerativeApi, ImageOutcome, PromptPart};
use crate::retry::CancelHandle;

pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
    text_model: String,
    image_model: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(
        api_base: impl Into<String>,
        text_model: impl Into<String>,
        image_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            http: HttpClient::new(),
            text_model: text_model.into(),
            image_model: image_model.into(),
            timeout,
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post(&self, model: &str, payload: &Value, cancel: &CancelHandle) -> Result<Value> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled.into());
        }
        let api_key = Self::api_key().ok_or_else(|| {
            ApiError::MissingCredentials("GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string())
        })?;
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error(response)
    }

    fn contents(parts: Vec<Value>) -> Value {
        json!([{ "role": "user", "parts": parts }])
    }

    fn parts_json(parts: &[PromptPart]) -> Vec<Value> {
        parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => json!({ "text": text }),
                PromptPart::Image(image) => inline_image_part(image),
            })
            .collect()
    }

    fn extract_text(response_payload: &Value) -> String {
        let mut out = String::new();
        for part in candidate_parts(response_payload) {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        out.trim().to_string()
    }

    fn extract_image_items(response_payload: &Value) -> Result<Vec<ImageData>> {
        let mut out = Vec::new();
        for part in candidate_parts(response_payload) {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            out.push(ImageData::new(bytes));
        }
        Ok(out)
    }

    fn block_reason(response_payload: &Value) -> Option<String> {
        response_payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
            .map(|reason| format!("request blocked: {reason}"))
    }

    fn text_call(&self, parts: &[PromptPart], cancel: &CancelHandle) -> Result<String> {
        let payload = json!({ "contents": Self::contents(Self::parts_json(parts)) });
        let response_payload = self.post(&self.text_model, &payload, cancel)?;
        let text = Self::extract_text(&response_payload);
        if text.is_empty() {
            return Err(ApiError::InvalidResponse(
                Self::block_reason(&response_payload)
                    .unwrap_or_else(|| "Gemini returned no text".to_string()),
            )
            .into());
        }
        Ok(text)
    }

    fn structured_call(
        &self,
        parts: &[PromptPart],
        schema: &Value,
        cancel: &CancelHandle,
    ) -> Result<Value> {
        let payload = json!({
            "contents": Self::contents(Self::parts_json(parts)),
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        });
        let response_payload = self.post(&self.text_model, &payload, cancel)?;
        let text = Self::extract_text(&response_payload);
        let parsed: Value = serde_json::from_str(strip_code_fence(&text))
            .with_context(|| format!("Gemini returned invalid JSON: {}", truncate_text(&text, 200)))?;
        if !parsed.is_object() {
            return Err(ApiError::InvalidResponse("expected a JSON object".to_string()).into());
        }
        Ok(parsed)
    }

    fn image_call(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        cancel: &CancelHandle,
    ) -> Result<ImageOutcome> {
        let mut parts = vec![json!({ "text": prompt })];
        for attachment in attachments {
            parts.push(json!({ "text": attachment.label }));
            parts.push(inline_image_part(&attachment.image));
        }
        let mut generation_config = Map::new();
        generation_config.insert(
            "responseModalities".to_string(),
            json!(["IMAGE", "TEXT"]),
        );
        let payload = json!({
            "contents": Self::contents(parts),
            "generationConfig": Value::Object(generation_config),
        });
        let response_payload = self.post(&self.image_model, &payload, cancel)?;
        let images = Self::extract_image_items(&response_payload)?;
        if let Some(image) = images.into_iter().next() {
            return Ok(ImageOutcome::Image(image));
        }
        let text = Self::extract_text(&response_payload);
        Ok(ImageOutcome::NoImage {
            text: Some(text)
                .filter(|text| !text.is_empty())
                .or_else(|| Self::block_reason(&response_payload)),
        })
    }
}

impl GenerativeApi for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_text(&self, parts: &[PromptPart], cancel: &CancelHandle) -> Result<String, ApiError> {
        self.text_call(parts, cancel).map_err(ApiError::from_anyhow)
    }

    fn generate_structured(
        &self,
        parts: &[PromptPart],
        schema: &Value,
        cancel: &CancelHandle,
    ) -> Result<Value, ApiError> {
        self.structured_call(parts, schema, cancel)
            .map_err(ApiError::from_anyhow)
    }

    fn generate_image(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        cancel: &CancelHandle,
    ) -> Result<ImageOutcome, ApiError> {
        self.image_call(prompt, attachments, cancel)
            .map_err(ApiError::from_anyhow)
    }
}

fn candidate_parts(response_payload: &Value) -> Vec<Value> {
    let candidates = response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        out.extend(parts);
    }
    out
}

fn inline_image_part(image: &ImageData) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type(),
            "data": image.to_base64(),
        }
    })
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        return Err(ApiError::Status {
            code,
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let parsed: Value =
        serde_json::from_str(&body).context("Gemini returned invalid JSON payload")?;
    Ok(parsed)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
