use std::env;
use std::time::Duration;

use vitrine_contracts::library::{DEFAULT_LIBRARY_WARN_BYTES, DEFAULT_PROJECT_WARN_BYTES};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Engine knobs read from `VITRINE_*` environment variables. Out-of-range
/// values are clamped, unparsable ones fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub transient_retries: usize,
    pub retry_backoff: Duration,
    pub no_image_retries: usize,
    pub no_image_backoff: Duration,
    pub project_warn_bytes: usize,
    pub library_warn_bytes: usize,
    pub request_timeout: Duration,
    pub gemini_api_base: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transient_retries: 2,
            retry_backoff: Duration::from_millis(1500),
            no_image_retries: 4,
            no_image_backoff: Duration::from_millis(1000),
            project_warn_bytes: DEFAULT_PROJECT_WARN_BYTES,
            library_warn_bytes: DEFAULT_LIBRARY_WARN_BYTES,
            request_timeout: Duration::from_secs(90),
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: f64, min: f64, max: f64| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .unwrap_or(default)
                .clamp(min, max)
        };
        Self {
            transient_retries: number("VITRINE_TRANSIENT_RETRIES", 2.0, 0.0, 6.0).round() as usize,
            retry_backoff: Duration::from_millis(
                number("VITRINE_RETRY_BACKOFF_MS", 1500.0, 50.0, 10_000.0) as u64,
            ),
            no_image_retries: number("VITRINE_NO_IMAGE_RETRIES", 4.0, 0.0, 8.0).round() as usize,
            no_image_backoff: Duration::from_millis(
                number("VITRINE_NO_IMAGE_BACKOFF_MS", 1000.0, 0.0, 10_000.0) as u64,
            ),
            project_warn_bytes: number(
                "VITRINE_PROJECT_WARN_BYTES",
                defaults.project_warn_bytes as f64,
                1024.0,
                f64::from(u32::MAX),
            ) as usize,
            library_warn_bytes: number(
                "VITRINE_LIBRARY_WARN_BYTES",
                defaults.library_warn_bytes as f64,
                1024.0,
                f64::from(u32::MAX),
            ) as usize,
            request_timeout: Duration::from_secs_f64(number(
                "VITRINE_REQUEST_TIMEOUT_S",
                90.0,
                15.0,
                300.0,
            )),
            gemini_api_base: lookup("GEMINI_API_BASE")
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.gemini_api_base),
        }
    }

    /// Total attempts of the transient-failure layer.
    pub fn transient_attempts(&self) -> usize {
        self.transient_retries + 1
    }

    /// Total attempts of the no-image layer.
    pub fn no_image_attempts(&self) -> usize {
        self.no_image_retries + 1
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{EngineConfig, DEFAULT_GEMINI_API_BASE};

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_give_three_and_five_attempts() {
        let config = config_from(&[]);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.transient_attempts(), 3);
        assert_eq!(config.no_image_attempts(), 5);
        assert_eq!(config.gemini_api_base, DEFAULT_GEMINI_API_BASE);
    }

    #[test]
    fn values_are_clamped_and_garbage_ignored() {
        let config = config_from(&[
            ("VITRINE_TRANSIENT_RETRIES", "40"),
            ("VITRINE_RETRY_BACKOFF_MS", "1"),
            ("VITRINE_NO_IMAGE_RETRIES", "nope"),
            ("VITRINE_REQUEST_TIMEOUT_S", "600"),
            ("GEMINI_API_BASE", "http://localhost:8080/"),
        ]);
        assert_eq!(config.transient_retries, 6);
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.no_image_retries, 4);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.gemini_api_base, "http://localhost:8080");
    }
}
