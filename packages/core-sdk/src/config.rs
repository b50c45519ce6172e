use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCAL_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_LOCAL_MODEL: &str = "llama3";
pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_REMOTE_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/**
 * \brief Which backend the deployment prefers to try first.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendPreference {
    Local,
    Remote,
    /** \brief Anything else; ordered like `Local`. */
    Unrecognized(String),
}

impl BackendPreference {
    /**
     * \brief Parse a preference string. Accepts the server names too ("ollama", "openrouter").
     */
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" => BackendPreference::Local,
            "remote" | "openrouter" | "cloud" => BackendPreference::Remote,
            _ => BackendPreference::Unrecognized(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BackendPreference::Local => "local",
            BackendPreference::Remote => "remote",
            BackendPreference::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
 * \brief Explicit AI client configuration, built once and handed to `AiClient::new`.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub preference: BackendPreference,
    /** \brief Base URL of the local inference server, without the `/v1/...` suffix. */
    pub local_base_url: String,
    pub local_model: String,
    /** \brief Full chat-completions URL of the remote API. */
    pub remote_endpoint: String,
    pub remote_model: String,
    pub remote_api_key: Option<String>,
    pub request_timeout: Duration,
    /** \brief Budget for the local reachability probe; independent of `request_timeout`. */
    pub probe_timeout: Duration,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            preference: BackendPreference::Local,
            local_base_url: DEFAULT_LOCAL_BASE_URL.to_string(),
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            remote_endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            remote_model: DEFAULT_REMOTE_MODEL.to_string(),
            remote_api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/**
 * \brief A partial set of settings; unset fields leave the base config untouched.
 * \details Produced by the settings store and by the environment, then layered.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiSettings {
    pub backend: Option<String>,
    pub local_base_url: Option<String>,
    pub local_model: Option<String>,
    pub remote_endpoint: Option<String>,
    pub remote_model: Option<String>,
    pub remote_api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
}

impl AiSettings {
    /**
     * \brief Read `IQAC_*` variables from the process environment.
     */
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief Build settings from any key lookup; empty values count as unset.
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse_u64 = |key: &str| {
            get(key).and_then(|v| match v.parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!(key, value = %v, "ignoring non-numeric setting");
                    None
                }
            })
        };
        Self {
            backend: get("IQAC_AI_BACKEND"),
            local_base_url: get("IQAC_LOCAL_BASE_URL"),
            local_model: get("IQAC_LOCAL_MODEL"),
            remote_endpoint: get("IQAC_REMOTE_ENDPOINT"),
            remote_model: get("IQAC_REMOTE_MODEL"),
            remote_api_key: get("IQAC_REMOTE_API_KEY"),
            timeout_secs: parse_u64("IQAC_AI_TIMEOUT_SECS"),
            probe_timeout_ms: parse_u64("IQAC_PROBE_TIMEOUT_MS"),
        }
    }

    /**
     * \brief Apply every set field on top of `config`.
     */
    pub fn apply(&self, mut config: AiConfig) -> AiConfig {
        if let Some(backend) = &self.backend {
            config.preference = BackendPreference::parse(backend);
        }
        if let Some(v) = &self.local_base_url {
            config.local_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = &self.local_model {
            config.local_model = v.clone();
        }
        if let Some(v) = &self.remote_endpoint {
            config.remote_endpoint = v.clone();
        }
        if let Some(v) = &self.remote_model {
            config.remote_model = v.clone();
        }
        if let Some(v) = &self.remote_api_key {
            config.remote_api_key = Some(v.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.probe_timeout_ms {
            config.probe_timeout = Duration::from_millis(ms);
        }
        config
    }
}

impl AiConfig {
    /**
     * \brief Defaults overlaid with the process environment.
     */
    pub fn from_env() -> Self {
        AiSettings::from_env().apply(Self::default())
    }

    /** \brief True when a non-blank remote API key is configured. */
    pub fn has_remote_credential(&self) -> bool {
        self.remote_api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    /**
     * \brief API key with everything but the last four characters masked.
     */
    pub fn masked_api_key(&self) -> Option<String> {
        self.remote_api_key.as_deref().map(mask_secret)
    }
}

pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}
