use promptgate_types::{AudioTranscription, GatewayError, SessionConfig};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    4000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging configuration. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Write logs to this file (daily rotation) instead of stderr.
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

fn default_jwks_cache_secs() -> u64 {
    300
}
fn default_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

/// Bearer-token authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether relay routes require a valid bearer token (defaults to `true`).
    #[serde(default = "default_true")]
    pub required: bool,
    /// URL of the published signing-key set (JWKS).
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// How long a fetched key set is reused before refetching.
    #[serde(default = "default_jwks_cache_secs")]
    pub jwks_cache_secs: u64,
    /// Accepted signature algorithms (JWA names).
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: true,
            jwks_url: None,
            jwks_cache_secs: default_jwks_cache_secs(),
            algorithms: default_algorithms(),
            issuer: None,
            audience: None,
        }
    }
}

/// Provider credentials shared by both relays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub organization_id: Option<String>,
}

fn default_completions_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completions_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_sink_capacity() -> usize {
    16
}

/// Chat-completions relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionsConfig {
    /// API base URL; `/chat/completions` is appended.
    #[serde(default = "default_completions_url")]
    pub base_url: String,
    #[serde(default = "default_completions_model")]
    pub model: String,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    /// Prepended as a `system` message when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Chunks buffered between the relay and the HTTP body before the relay blocks.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

impl Default for CompletionsConfig {
    fn default() -> Self {
        Self {
            base_url: default_completions_url(),
            model: default_completions_model(),
            max_completion_tokens: None,
            system_prompt: None,
            sink_capacity: default_sink_capacity(),
        }
    }
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}
fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

/// Realtime relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Upstream WebSocket endpoint; `?model=` is appended.
    #[serde(default = "default_realtime_url")]
    pub url: String,
    #[serde(default = "default_realtime_model")]
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub input_audio_transcription: Option<AudioTranscription>,
    /// Tear the session down if either side sends nothing for this long.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    /// Hard cap on a session's lifetime.
    #[serde(default)]
    pub max_session_secs: Option<u64>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            model: default_realtime_model(),
            instructions: None,
            input_audio_transcription: None,
            read_timeout_secs: None,
            max_session_secs: None,
        }
    }
}

impl RealtimeConfig {
    /// The `session.update` parameters derived from this configuration.
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            instructions: self.instructions.clone(),
            input_audio_transcription: self.input_audio_transcription.clone(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen port (defaults to 4000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen address (defaults to `127.0.0.1`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Reported by the health check.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Add permissive CORS headers to every response.
    #[serde(default = "default_true")]
    pub cors_allow_any: bool,
    /// Optional outbound HTTP proxy for upstream and key-set requests.
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub completions: CompletionsConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            environment: default_environment(),
            cors_allow_any: true,
            proxy_url: None,
            log: LogConfig::default(),
            auth: AuthConfig::default(),
            openai: OpenAiConfig::default(),
            completions: CompletionsConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Config {
    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Format as _, Serialized, Yaml},
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    /// Loads configuration from a file path, merged with defaults and then
    /// with `PROMPTGATE_*` environment variables (`__` separates nesting,
    /// e.g. `PROMPTGATE_OPENAI__API_KEY`).
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &std::path::Path) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Env, Format as _, Serialized, Yaml},
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("PROMPTGATE_").split("__"))
            .extract()
    }

    /// Loads configuration from defaults and `PROMPTGATE_*` environment
    /// variables only, for deployments without a config file.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if a variable cannot be extracted.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Env, Serialized},
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("PROMPTGATE_").split("__"))
            .extract()
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.auth.required && self.auth.jwks_url.is_none() {
            return Err(GatewayError::Config(
                "auth.required is set but auth.jwks_url is missing".into(),
            ));
        }
        if self.openai.api_key.is_empty() {
            return Err(GatewayError::Config("openai.api_key is empty".into()));
        }
        if self.completions.sink_capacity == 0 {
            return Err(GatewayError::Config(
                "completions.sink_capacity must be at least 1".into(),
            ));
        }
        for (name, url) in [
            ("completions.base_url", &self.completions.base_url),
            ("realtime.url", &self.realtime.url),
        ] {
            if url.trim().is_empty() {
                return Err(GatewayError::Config(format!("{name} is empty")));
            }
        }
        if self.realtime.read_timeout_secs == Some(0) || self.realtime.max_session_secs == Some(0)
        {
            return Err(GatewayError::Config(
                "realtime timeouts must be positive when set".into(),
            ));
        }
        Ok(())
    }
}
