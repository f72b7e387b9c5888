use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves `requested` for `capability`, optionally restricted to one
    /// provider. Falls back to the first capable model and records why.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
        provider: Option<&str>,
    ) -> Result<ModelSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            let matched = self
                .registry
                .ensure(requested_value, capability)
                .filter(|model| provider.map_or(true, |name| model.provider == name));
            if let Some(model) = matched {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = match provider {
            Some(name) => self.registry.by_provider(name, capability),
            None => self.registry.by_capability(capability),
        };
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{Capability, ModelRegistry, ModelSpec};

    fn image_model(name: &str, provider: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: vec![Capability::Image],
            context_window: None,
        }
    }

    #[test]
    fn unavailable_model_falls_back_with_reason() -> Result<(), String> {
        let mut models = IndexMap::new();
        models.insert(
            "image-fallback".to_string(),
            image_model("image-fallback", "dryrun"),
        );
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("missing"), Capability::Image, None)?;
        assert_eq!(selection.model.name, "image-fallback");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'image'.")
        );
        Ok(())
    }

    #[test]
    fn provider_restriction_wins_over_requested_model() -> Result<(), String> {
        let mut models = IndexMap::new();
        models.insert("remote".to_string(), image_model("remote", "gemini"));
        models.insert("local".to_string(), image_model("local", "dryrun"));
        let selector = ModelSelector::new(Some(ModelRegistry::new(Some(models))));

        let selection = selector.select(Some("remote"), Capability::Image, Some("dryrun"))?;
        assert_eq!(selection.model.name, "local");
        assert!(selection.fallback_reason.is_some());
        assert!(selector.select(None, Capability::Text, None).is_err());
        Ok(())
    }
}
