use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use vitrine_contracts::error::{StudioError, StudioResult};
use vitrine_contracts::events::{EventPayload, EventWriter};
use vitrine_contracts::runs::history::{NewVersion, Version};
use vitrine_contracts::scene::ImageData;
use vitrine_contracts::session::{AppState, Mode};

use crate::api::{ApiError, GenerativeApi, ImageOutcome, PromptPart};
use crate::assembler::{assemble, AssembledRequest, GenerationRequest};
use crate::canvas::{CanvasComposer, PaddedCanvasComposer};
use crate::config::EngineConfig;
use crate::prompts::describe_scene_parts;
use crate::retry::{Backoff, CancelHandle, Clock, RetryError, RetryPolicy, SystemClock};
use crate::session::{FlightGuard, GenerationPhase, GenerationSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed(Version),
    /// User-initiated; not an error and nothing was committed.
    Cancelled,
}

/// Failure of one pass through the transient layer, as seen by the
/// no-image layer.
#[derive(Debug, Clone)]
enum AttemptError {
    NoImage(Option<String>),
    Api(RetryError<ApiError>),
}

fn is_transient(err: &ApiError) -> bool {
    !matches!(err, ApiError::Cancelled)
}

fn is_no_image(err: &AttemptError) -> bool {
    matches!(err, AttemptError::NoImage(_))
}

/// Runs remote calls under the single-flight session with the two retry
/// layers, and commits successful images to the version history.
pub struct Orchestrator {
    api: Arc<dyn GenerativeApi>,
    clock: Arc<dyn Clock>,
    canvas: Arc<dyn CanvasComposer>,
    transient: RetryPolicy<ApiError>,
    no_image: RetryPolicy<AttemptError>,
    events: EventWriter,
    session: Arc<GenerationSession>,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn GenerativeApi>, config: &EngineConfig, events: EventWriter) -> Self {
        Self {
            api,
            clock: Arc::new(SystemClock::default()),
            canvas: Arc::new(PaddedCanvasComposer::default()),
            transient: RetryPolicy::new(
                config.transient_attempts(),
                Backoff::Fixed(config.retry_backoff),
                is_transient,
            ),
            no_image: RetryPolicy::new(
                config.no_image_attempts(),
                Backoff::Fixed(config.no_image_backoff),
                is_no_image,
            ),
            events,
            session: GenerationSession::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_canvas(mut self, canvas: Arc<dyn CanvasComposer>) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn session(&self) -> Arc<GenerationSession> {
        Arc::clone(&self.session)
    }

    pub fn api_name(&self) -> &str {
        self.api.name()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// One image generation. Fails with `GenerationInFlight` while another
    /// call holds the session; every other remote failure is folded into
    /// `TransientApiFailure` or `NoImageProduced`.
    pub fn generate_image(
        &self,
        state: &mut AppState,
        request: &GenerationRequest,
        mode: Mode,
    ) -> StudioResult<GenerationOutcome> {
        let guard = self.session.try_begin()?;
        let result = self.run_generation(&guard, state, request, mode);
        let terminal = match &result {
            Ok(GenerationOutcome::Completed(_)) => GenerationPhase::Succeeded,
            Ok(GenerationOutcome::Cancelled) => GenerationPhase::Cancelled,
            Err(err) if err.is_cancelled() => GenerationPhase::Cancelled,
            Err(_) => GenerationPhase::Failed,
        };
        guard.finish(terminal);
        match result {
            Ok(GenerationOutcome::Completed(version)) => Ok(GenerationOutcome::Completed(version)),
            Err(err) if !err.is_cancelled() => {
                self.emit(
                    "generation_failed",
                    map_object(json!({
                        "mode": mode.to_string(),
                        "request": request.kind(),
                        "error": err.to_string(),
                    })),
                );
                Err(err)
            }
            _ => {
                self.emit(
                    "generation_cancelled",
                    map_object(json!({ "mode": mode.to_string(), "request": request.kind() })),
                );
                Ok(GenerationOutcome::Cancelled)
            }
        }
    }

    fn run_generation(
        &self,
        guard: &FlightGuard,
        state: &mut AppState,
        request: &GenerationRequest,
        mode: Mode,
    ) -> StudioResult<GenerationOutcome> {
        let cancel = guard.cancel_handle().clone();

        if matches!(request, GenerationRequest::Initial)
            && mode == Mode::Advanced
            && state.base_prompt.trim().is_empty()
        {
            if !state.scene.has_scene_content() && !state.scene.style_reference.has_image() {
                return Err(StudioError::invalid(
                    "nothing to generate: add scene components or a scene description",
                ));
            }
            state.base_prompt =
                self.call_text("describe_scene", &describe_scene_parts(&state.scene), &cancel)?;
        }

        let assembled = assemble(state, request, mode, self.canvas.as_ref())?;
        if assembled.consumed_face {
            state.aux.take_new_character_face();
        }
        if assembled.consumed_pose {
            state.aux.take_pose_reference();
        }

        let fingerprint = request_fingerprint(&assembled);
        guard.set_phase(GenerationPhase::InFlight);
        self.emit(
            "generation_started",
            map_object(json!({
                "mode": mode.to_string(),
                "request": request.kind(),
                "origin": assembled.origin,
                "provider": self.api.name(),
                "request_fingerprint": fingerprint,
                "attachments": assembled.attachments.len(),
                "prompt_chars": assembled.prompt.chars().count(),
            })),
        );

        let image = self.image_with_retries(&assembled, &fingerprint, &cancel)?;
        if cancel.is_cancelled() {
            return Ok(GenerationOutcome::Cancelled);
        }

        let target_mode = request.target_mode(mode);
        let version = state
            .history_for_mut(target_mode)
            .append(NewVersion {
                image,
                prompt: assembled.prompt.clone(),
                scene_description: assembled.scene_description.clone(),
                format: assembled.target_format,
                origin: assembled.origin.clone(),
                parent_version_id: assembled.parent_version_id.clone(),
            })
            .clone();
        state.format = assembled.target_format;

        self.emit(
            "version_created",
            map_object(json!({
                "mode": target_mode.to_string(),
                "version_id": version.version_id,
                "parent_version_id": version.parent_version_id,
                "origin": version.origin,
                "format": version.format.to_string(),
                "request_fingerprint": fingerprint,
                "prompt_diff": version.prompt_diff,
            })),
        );
        Ok(GenerationOutcome::Completed(version))
    }

    fn image_with_retries(
        &self,
        assembled: &AssembledRequest,
        fingerprint: &str,
        cancel: &CancelHandle,
    ) -> StudioResult<ImageData> {
        let result = self.no_image.run(
            &*self.clock,
            cancel,
            |image_attempt| {
                let response = self.transient.run(
                    &*self.clock,
                    cancel,
                    |attempt| {
                        self.emit(
                            "generation_attempt",
                            map_object(json!({
                                "request_fingerprint": fingerprint,
                                "image_attempt": image_attempt,
                                "attempt": attempt,
                            })),
                        );
                        self.api
                            .generate_image(&assembled.prompt, &assembled.attachments, cancel)
                    },
                    |attempt, err, delay| {
                        self.emit(
                            "generation_retry",
                            map_object(json!({
                                "request_fingerprint": fingerprint,
                                "layer": "transient",
                                "attempt": attempt,
                                "error": err.to_string(),
                                "delay_ms": delay.as_millis() as u64,
                            })),
                        );
                    },
                );
                match response {
                    Ok(ImageOutcome::Image(image)) => Ok(image),
                    Ok(ImageOutcome::NoImage { text }) => Err(AttemptError::NoImage(text)),
                    Err(err) => Err(AttemptError::Api(err)),
                }
            },
            |attempt, err, delay| {
                let text = match err {
                    AttemptError::NoImage(text) => text.clone(),
                    AttemptError::Api(_) => None,
                };
                self.emit(
                    "generation_no_image",
                    map_object(json!({
                        "request_fingerprint": fingerprint,
                        "attempt": attempt,
                        "text": text,
                        "delay_ms": delay.as_millis() as u64,
                    })),
                );
            },
        );

        match result {
            Ok(image) => Ok(image),
            Err(RetryError::Cancelled { .. }) => Err(StudioError::Cancelled),
            Err(RetryError::Exhausted { attempts, last } | RetryError::Fatal { attempts, error: last }) => {
                match last {
                    AttemptError::NoImage(text) => Err(StudioError::NoImageProduced {
                        attempts,
                        detail: text,
                    }),
                    AttemptError::Api(inner) => Err(studio_error_from_retry(inner)),
                }
            }
        }
    }

    /// Text call under an already-held session; transient retries only.
    fn call_text(
        &self,
        operation: &str,
        parts: &[PromptPart],
        cancel: &CancelHandle,
    ) -> StudioResult<String> {
        self.with_transient_retries(operation, cancel, |cancel| {
            self.api.generate_text(parts, cancel)
        })
    }

    /// Single-call text operation. Holds the session for its duration and
    /// never touches the version history.
    pub fn text_operation(&self, operation: &str, parts: &[PromptPart]) -> StudioResult<String> {
        let guard = self.session.try_begin()?;
        guard.set_phase(GenerationPhase::InFlight);
        let result = self.call_text(operation, parts, guard.cancel_handle());
        guard.finish(terminal_for(&result));
        result
    }

    pub fn structured_operation(
        &self,
        operation: &str,
        parts: &[PromptPart],
        schema: &Value,
    ) -> StudioResult<Value> {
        let guard = self.session.try_begin()?;
        guard.set_phase(GenerationPhase::InFlight);
        let result = self.with_transient_retries(operation, guard.cancel_handle(), |cancel| {
            self.api.generate_structured(parts, schema, cancel)
        });
        guard.finish(terminal_for(&result));
        result
    }

    fn with_transient_retries<T>(
        &self,
        operation: &str,
        cancel: &CancelHandle,
        mut call: impl FnMut(&CancelHandle) -> Result<T, ApiError>,
    ) -> StudioResult<T> {
        let mut attempts = 0;
        let result = self.transient.run(
            &*self.clock,
            cancel,
            |attempt| {
                attempts = attempt;
                call(cancel)
            },
            |attempt, err, delay| {
                self.emit(
                    "generation_retry",
                    map_object(json!({
                        "operation": operation,
                        "layer": "transient",
                        "attempt": attempt,
                        "error": err.to_string(),
                        "delay_ms": delay.as_millis() as u64,
                    })),
                );
            },
        );
        let result = match result {
            Ok(_) if cancel.is_cancelled() => Err(StudioError::Cancelled),
            Ok(value) => Ok(value),
            Err(err) => Err(studio_error_from_retry(err)),
        };
        let status = match &result {
            Ok(_) => "succeeded".to_string(),
            Err(err) if err.is_cancelled() => "cancelled".to_string(),
            Err(err) => format!("failed: {err}"),
        };
        self.emit(
            "text_operation",
            map_object(json!({
                "operation": operation,
                "provider": self.api.name(),
                "attempts": attempts,
                "status": status,
            })),
        );
        result
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("vitrine: failed to write {event_type} event: {err:#}");
        }
    }
}

fn terminal_for<T>(result: &StudioResult<T>) -> GenerationPhase {
    match result {
        Ok(_) => GenerationPhase::Succeeded,
        Err(err) if err.is_cancelled() => GenerationPhase::Cancelled,
        Err(_) => GenerationPhase::Failed,
    }
}

fn studio_error_from_retry(err: RetryError<ApiError>) -> StudioError {
    match err {
        RetryError::Cancelled { .. } => StudioError::Cancelled,
        RetryError::Fatal {
            error: ApiError::Cancelled,
            ..
        } => StudioError::Cancelled,
        RetryError::Exhausted { attempts, last } | RetryError::Fatal { attempts, error: last } => {
            StudioError::TransientApiFailure {
                attempts,
                detail: last.to_string(),
            }
        }
    }
}

/// sha256 over the prompt and every attachment, hex encoded.
pub fn request_fingerprint(assembled: &AssembledRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(assembled.prompt.as_bytes());
    for attachment in &assembled.attachments {
        hasher.update([0u8]);
        hasher.update(attachment.label.as_bytes());
        hasher.update(attachment.image.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
