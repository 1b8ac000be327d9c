use crate::retry::RetryPolicy;
use domain::error::AnalyzerError;
use domain::request::GenerationParams;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.mistral.ai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "mistral-small";
const DEFAULT_ALLOWED_MODELS: &str =
    "mistral-small,mistral-medium,mistral-large-latest,open-mistral-7b";

/// Resolved, validated settings. Read once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    pub allowed_models: Vec<String>,
    pub params: GenerationParams,
    pub retry: RetryPolicy,
    pub max_audio_duration: Duration,
    pub max_file_size_mb: u64,
    pub enable_content_filter: bool,
    pub chat_context_exchanges: usize,
    pub policy_path: Option<PathBuf>,
}

impl Settings {
    /// Load `.env` (or `env_file` when given) and read the process environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self, AnalyzerError> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    AnalyzerError::Configuration(format!(
                        "failed to read env file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                debug!("loaded environment from {}", path.display());
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, AnalyzerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AnalyzerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("MISTRAL_API_KEY").ok_or_else(|| {
            AnalyzerError::Configuration(
                "MISTRAL_API_KEY is required (set it in the environment or a .env file)"
                    .to_string(),
            )
        })?;
        if api_key.len() < 10 {
            return Err(AnalyzerError::Configuration(
                "MISTRAL_API_KEY looks invalid (too short)".to_string(),
            ));
        }

        let model = get("MISTRAL_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_url = get("MISTRAL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let mut allowed_models: Vec<String> = get("ALLOWED_MODELS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_MODELS.to_string())
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        allowed_models.dedup();
        if !allowed_models.iter().any(|m| m == &model) {
            return Err(AnalyzerError::Configuration(format!(
                "model `{}` is not in ALLOWED_MODELS ({})",
                model,
                allowed_models.join(", ")
            )));
        }

        let temperature: f32 = parse(&get, "TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(AnalyzerError::Configuration(
                "TEMPERATURE must be between 0.0 and 2.0".to_string(),
            ));
        }
        let max_tokens: u32 = parse(&get, "MAX_TOKENS", 1000)?;
        if max_tokens == 0 || max_tokens > 4000 {
            return Err(AnalyzerError::Configuration(
                "MAX_TOKENS must be between 1 and 4000".to_string(),
            ));
        }

        let max_retries: u32 = parse(&get, "MAX_RETRIES", 3)?;
        let request_timeout: u64 = parse(&get, "REQUEST_TIMEOUT", 30)?;
        let total_deadline: u64 = parse(&get, "TOTAL_DEADLINE", 120)?;
        let base_delay_ms: u64 = parse(&get, "RETRY_BASE_DELAY_MS", 500)?;
        let max_delay_ms: u64 = parse(&get, "RETRY_MAX_DELAY_MS", 8000)?;
        if request_timeout == 0 {
            return Err(AnalyzerError::Configuration(
                "REQUEST_TIMEOUT must be positive".to_string(),
            ));
        }
        if total_deadline < request_timeout {
            return Err(AnalyzerError::Configuration(
                "TOTAL_DEADLINE must be at least REQUEST_TIMEOUT".to_string(),
            ));
        }
        if base_delay_ms == 0 || max_delay_ms < base_delay_ms {
            return Err(AnalyzerError::Configuration(
                "RETRY_BASE_DELAY_MS must be positive and not exceed RETRY_MAX_DELAY_MS"
                    .to_string(),
            ));
        }

        let max_audio_duration: u64 = parse(&get, "MAX_AUDIO_DURATION", 300)?;
        let max_file_size_mb: u64 = parse(&get, "MAX_FILE_SIZE_MB", 50)?;
        if max_audio_duration == 0 || max_file_size_mb == 0 {
            return Err(AnalyzerError::Configuration(
                "MAX_AUDIO_DURATION and MAX_FILE_SIZE_MB must be positive".to_string(),
            ));
        }

        let enable_content_filter = match get("ENABLE_CONTENT_FILTER") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                AnalyzerError::Configuration(format!(
                    "ENABLE_CONTENT_FILTER: `{}` is not a boolean",
                    raw
                ))
            })?,
            None => true,
        };

        Ok(Self {
            api_key,
            model,
            api_url,
            allowed_models,
            params: GenerationParams {
                temperature,
                max_tokens,
            },
            retry: RetryPolicy {
                max_attempts: max_retries.saturating_add(1),
                base_delay: Duration::from_millis(base_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                attempt_timeout: Duration::from_secs(request_timeout),
                total_deadline: Duration::from_secs(total_deadline),
            },
            max_audio_duration: Duration::from_secs(max_audio_duration),
            max_file_size_mb,
            enable_content_filter,
            chat_context_exchanges: parse(&get, "CHAT_CONTEXT_EXCHANGES", 5)?,
            policy_path: get("GUARDRAIL_POLICY").map(PathBuf::from),
        })
    }

    /// API key with everything but the last four characters masked.
    pub fn redacted_key(&self) -> String {
        let visible: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("****{}", visible)
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T, AnalyzerError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AnalyzerError::Configuration(format!("{}: cannot parse `{}`", key, raw))),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, AnalyzerError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let s = settings(&[("MISTRAL_API_KEY", "sk-test-0123456789")]).unwrap();
        assert_eq!(s.model, DEFAULT_MODEL);
        assert_eq!(s.api_url, DEFAULT_API_URL);
        assert_eq!(s.retry.max_attempts, 4);
        assert_eq!(s.retry.attempt_timeout, Duration::from_secs(30));
        assert_eq!(s.params.max_tokens, 1000);
        assert!(s.enable_content_filter);
        assert_eq!(s.chat_context_exchanges, 5);
        assert!(s.policy_path.is_none());
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err = settings(&[]).unwrap_err();
        assert!(
            matches!(err, AnalyzerError::Configuration(ref m) if m.contains("MISTRAL_API_KEY"))
        );
        assert!(settings(&[("MISTRAL_API_KEY", "   ")]).is_err());
        assert!(settings(&[("MISTRAL_API_KEY", "short")]).is_err());
    }

    #[test]
    fn model_must_be_allowed() {
        let err = settings(&[
            ("MISTRAL_API_KEY", "sk-test-0123456789"),
            ("MISTRAL_MODEL", "gpt-4"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("gpt-4"));

        let ok = settings(&[
            ("MISTRAL_API_KEY", "sk-test-0123456789"),
            ("MISTRAL_MODEL", "custom"),
            ("ALLOWED_MODELS", "custom, other"),
        ])
        .unwrap();
        assert_eq!(ok.allowed_models, vec!["custom", "other"]);
    }

    #[test]
    fn validates_ranges() {
        let key = ("MISTRAL_API_KEY", "sk-test-0123456789");
        assert!(settings(&[key, ("TEMPERATURE", "2.5")]).is_err());
        assert!(settings(&[key, ("MAX_TOKENS", "0")]).is_err());
        assert!(settings(&[key, ("MAX_TOKENS", "lots")]).is_err());
        assert!(settings(&[key, ("REQUEST_TIMEOUT", "60"), ("TOTAL_DEADLINE", "30")]).is_err());
        assert!(settings(&[key, ("RETRY_BASE_DELAY_MS", "9000")]).is_err());
        assert!(settings(&[key, ("ENABLE_CONTENT_FILTER", "maybe")]).is_err());
        let off = settings(&[key, ("ENABLE_CONTENT_FILTER", "false")]).unwrap();
        assert!(!off.enable_content_filter);
    }

    #[test]
    fn key_is_redacted() {
        let s = settings(&[("MISTRAL_API_KEY", "sk-test-0123456789")]).unwrap();
        assert_eq!(s.redacted_key(), "****6789");
    }

    #[test]
    fn env_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.env");
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, AnalyzerError::Configuration(_)));
    }
}
