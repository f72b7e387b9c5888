pub mod api;
pub mod assembler;
pub mod canvas;
pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod session;
pub mod studio;

pub use assembler::GenerationRequest;
pub use config::EngineConfig;
pub use orchestrator::{GenerationOutcome, Orchestrator};
pub use studio::Studio;
