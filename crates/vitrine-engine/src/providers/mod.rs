mod dryrun;
mod gemini;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use vitrine_contracts::models::{Capability, ModelSelection, ModelSelector};

use crate::api::GenerativeApi;
use crate::config::EngineConfig;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;

/// Name-keyed lookup over remote API clients.
#[derive(Clone)]
pub struct ApiRegistry {
    providers: Vec<Arc<dyn GenerativeApi>>,
}

impl ApiRegistry {
    pub fn new(providers: Vec<Arc<dyn GenerativeApi>>) -> Self {
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn GenerativeApi>> {
        self.providers.iter().find(|provider| provider.name() == name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }
}

/// A provider bound to the text and image models it will call.
#[derive(Clone)]
pub struct ResolvedApi {
    pub api: Arc<dyn GenerativeApi>,
    pub text: ModelSelection,
    pub image: ModelSelection,
}

pub fn default_api_registry(
    config: &EngineConfig,
    text_model: &str,
    image_model: &str,
) -> ApiRegistry {
    ApiRegistry::new(vec![
        Arc::new(GeminiProvider::new(
            config.gemini_api_base.clone(),
            text_model,
            image_model,
            config.request_timeout,
        )) as Arc<dyn GenerativeApi>,
        Arc::new(DryrunProvider::new()),
    ])
}

/// Picks text and image models for `provider` (falling back to that
/// provider's defaults) and returns the bound client.
pub fn resolve_api(
    config: &EngineConfig,
    provider: &str,
    text_model: Option<&str>,
    image_model: Option<&str>,
) -> Result<ResolvedApi> {
    let selector = ModelSelector::new(None);
    let text = selector
        .select(text_model, Capability::Text, Some(provider))
        .map_err(|err| anyhow!("{err} (provider '{provider}')"))?;
    let image = selector
        .select(image_model, Capability::Image, Some(provider))
        .map_err(|err| anyhow!("{err} (provider '{provider}')"))?;
    let registry = default_api_registry(config, &text.model.name, &image.model.name);
    let api = registry.get(provider).cloned().ok_or_else(|| {
        anyhow!(
            "unknown provider '{provider}' (available: {})",
            registry.list().join(", ")
        )
    })?;
    Ok(ResolvedApi { api, text, image })
}

#[cfg(test)]
mod tests {
    use super::{default_api_registry, resolve_api};
    use crate::api::GenerativeApi;
    use crate::config::EngineConfig;

    #[test]
    fn registry_lists_sorted_names_and_finds_by_name() {
        let registry = default_api_registry(
            &EngineConfig::default(),
            "gemini-2.5-flash",
            "gemini-2.5-flash-image",
        );
        assert_eq!(registry.list(), vec!["dryrun", "gemini"]);
        assert_eq!(
            registry.get("gemini").map(|api| api.name().to_string()),
            Some("gemini".to_string())
        );
        assert!(registry.get("openai").is_none());
    }

    #[test]
    fn dryrun_resolves_its_own_models() -> anyhow::Result<()> {
        let resolved = resolve_api(&EngineConfig::default(), "dryrun", None, None)?;
        assert_eq!(resolved.api.name(), "dryrun");
        assert_eq!(resolved.text.model.name, "dryrun-text-1");
        assert_eq!(resolved.image.model.name, "dryrun-image-1");
        Ok(())
    }

    #[test]
    fn requested_model_from_another_provider_falls_back() -> anyhow::Result<()> {
        let resolved = resolve_api(
            &EngineConfig::default(),
            "gemini",
            Some("dryrun-text-1"),
            Some("gemini-2.5-flash-image"),
        )?;
        assert_eq!(resolved.text.model.name, "gemini-2.5-flash");
        assert!(resolved.text.fallback_reason.is_some());
        assert_eq!(resolved.image.fallback_reason, None);
        Ok(())
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(resolve_api(&EngineConfig::default(), "nope", None, None).is_err());
    }
}
