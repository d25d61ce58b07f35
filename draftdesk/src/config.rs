use std::time::Duration;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Context window sent alongside a refine request, in chars.
pub const DEFAULT_REFINE_CONTEXT_CHARS: usize = 4_000;
/// Documents shorter than this (in chars) are never scanned.
pub const DEFAULT_SCAN_MIN_CHARS: usize = 50;
pub const DEFAULT_SCAN_MAX_SUGGESTIONS: usize = 3;
/// Inline attachment ceiling accepted by the hosted API.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(String),
    #[error("invalid value for {key}: {value} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Tunables for the generation client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSettings {
    pub refine_context_chars: usize,
    pub scan_min_chars: usize,
    pub scan_max_suggestions: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            refine_context_chars: DEFAULT_REFINE_CONTEXT_CHARS,
            scan_min_chars: DEFAULT_SCAN_MIN_CHARS,
            scan_max_suggestions: DEFAULT_SCAN_MAX_SUGGESTIONS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP API listens on
    pub port: u16,
    /// Credential for the hosted model. Absent keys block generation, not startup.
    pub api_key: Option<String>,
    /// Model name used in `models/{model}:generateContent`
    pub model: String,
    /// Base URL of the hosted model API
    pub api_base_url: String,
    /// Per-request timeout for backend calls
    pub request_timeout: Duration,
    pub generation: GenerationSettings,
    /// Largest decoded attachment accepted for a draft
    pub max_attachment_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            generation: GenerationSettings::default(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let config = Self {
            port: env_parse("DRAFTDESK_PORT", 8080)?,
            api_key,
            model: env_str("DRAFTDESK_MODEL", DEFAULT_MODEL),
            api_base_url: env_str("DRAFTDESK_API_BASE_URL", DEFAULT_API_BASE_URL),
            request_timeout: Duration::from_secs(env_parse("DRAFTDESK_REQUEST_TIMEOUT_SECS", 60)?),
            generation: GenerationSettings {
                refine_context_chars: env_parse(
                    "DRAFTDESK_REFINE_CONTEXT_CHARS",
                    DEFAULT_REFINE_CONTEXT_CHARS,
                )?,
                scan_min_chars: env_parse("DRAFTDESK_SCAN_MIN_CHARS", DEFAULT_SCAN_MIN_CHARS)?,
                scan_max_suggestions: env_parse(
                    "DRAFTDESK_SCAN_MAX_SUGGESTIONS",
                    DEFAULT_SCAN_MAX_SUGGESTIONS,
                )?,
            },
            max_attachment_bytes: env_parse(
                "DRAFTDESK_MAX_ATTACHMENT_BYTES",
                DEFAULT_MAX_ATTACHMENT_BYTES,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// The credential, or the error every generation call must surface.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingApiKey(API_KEY_ENV.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.scan_max_suggestions == 0 {
            return Err(invalid(
                "DRAFTDESK_SCAN_MAX_SUGGESTIONS",
                "0",
                "must be at least 1",
            ));
        }
        if self.generation.refine_context_chars == 0 {
            return Err(invalid(
                "DRAFTDESK_REFINE_CONTEXT_CHARS",
                "0",
                "must be at least 1",
            ));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(invalid(
                "DRAFTDESK_API_BASE_URL",
                &self.api_base_url,
                "must start with http:// or https://",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            value: val.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_names_variable() {
        let config = Config::default();
        let err = config.require_api_key().unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey("GEMINI_API_KEY".to_string()));
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_present_api_key() {
        let config = Config {
            api_key: Some("k-123".to_string()),
            ..Config::default()
        };
        assert_eq!(config.require_api_key().unwrap(), "k-123");
    }

    #[test]
    fn test_validate_rejects_zero_suggestions() {
        let mut config = Config::default();
        config.generation.scan_max_suggestions = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "DRAFTDESK_SCAN_MAX_SUGGESTIONS"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let config = Config {
            api_base_url: "generativelanguage.googleapis.com".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_falls_back_to_default() {
        let value: usize = env_parse("DRAFTDESK_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
