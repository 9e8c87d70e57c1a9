use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3000";
pub const DEFAULT_BASE_URL: &str = "https://glhf.chat/api/openai/v1";
pub const DEFAULT_MODEL: &str = "hf:Qwen/Qwen2.5-Coder-32B-Instruct";
pub const DEFAULT_CONFIG_FILE: &str = "codechat.toml";

/// How `/api/chat` hands the completion back to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Raw text fragments written to a chunked `text/plain` body as they arrive.
    #[default]
    Streaming,
    /// Whole completion collected, then returned as `{"response": ...}`.
    Aggregating,
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" | "stream" => Ok(Self::Streaming),
            "aggregating" | "aggregate" | "json" => Ok(Self::Aggregating),
            _ => Err(s.to_string()),
        }
    }
}

/// Deployment environment. Development exposes error chains in 500 bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(s.to_string()),
        }
    }
}

/// Optional `codechat.toml` contents. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_address: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    response_mode: Option<ResponseMode>,
    environment: Option<Environment>,
    connect_timeout_secs: Option<u64>,
    headers_timeout_secs: Option<u64>,
}

/// Process-wide configuration, built once at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub response_mode: ResponseMode,
    pub environment: Environment,
    pub connect_timeout: Duration,
    /// Upper bound on waiting for upstream response headers.
    pub headers_timeout: Duration,
    pub log_level: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("response_mode", &self.response_mode)
            .field("environment", &self.environment)
            .field("connect_timeout", &self.connect_timeout)
            .field("headers_timeout", &self.headers_timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Defaults for everything except the API key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            response_mode: ResponseMode::default(),
            environment: Environment::default(),
            connect_timeout: Duration::from_secs(10),
            headers_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }

    /// Load from the process environment and an optional TOML file.
    ///
    /// Precedence: environment > `CODECHAT_CONFIG` file (or `codechat.toml`
    /// in the working directory) > defaults. The API key is only read from
    /// `GLHF_API_KEY`; without it the server must not start.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = lookup("CODECHAT_CONFIG").filter(|p| !p.trim().is_empty());
        let file = match explicit {
            Some(path) => read_file_config(Path::new(&path))?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    read_file_config(&default_path)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::resolve(file, lookup)
    }

    fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GLHF_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let mut config = Self::with_api_key(api_key);

        if let Some(v) = file.bind_address {
            config.bind_address = v;
        }
        if let Some(v) = file.base_url {
            config.base_url = v;
        }
        if let Some(v) = file.model {
            config.model = v;
        }
        if let Some(v) = file.response_mode {
            config.response_mode = v;
        }
        if let Some(v) = file.environment {
            config.environment = v;
        }
        if let Some(secs) = file.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.headers_timeout_secs {
            config.headers_timeout = Duration::from_secs(secs);
        }

        if let Some(v) = lookup("CODECHAT_BIND") {
            config.bind_address = v;
        }
        if let Some(v) = lookup("GLHF_BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = lookup("CODECHAT_MODEL") {
            config.model = v;
        }
        if let Some(v) = lookup("CODECHAT_RESPONSE_MODE") {
            config.response_mode = v.parse().map_err(|value| ConfigError::InvalidValue {
                key: "CODECHAT_RESPONSE_MODE",
                value,
            })?;
        }
        let env_var = ["CODECHAT_ENV", "APP_ENV"]
            .into_iter()
            .find_map(|key| lookup(key).map(|v| (key, v)));
        if let Some((key, v)) = env_var {
            config.environment = v
                .parse()
                .map_err(|value| ConfigError::InvalidValue { key, value })?;
        }
        if let Some(v) = lookup("CODECHAT_LOG") {
            config.log_level = v;
        }

        // Trailing slash would double up when `/chat/completions` is joined.
        while config.base_url.ends_with('/') {
            config.base_url.pop();
        }

        Ok(config)
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = Config::resolve(FileConfig::default(), lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn blank_api_key_is_fatal() {
        let err =
            Config::resolve(FileConfig::default(), lookup(&[("GLHF_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn defaults_apply_with_only_a_key() {
        let config =
            Config::resolve(FileConfig::default(), lookup(&[("GLHF_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.response_mode, ResponseMode::Streaming);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(
            config.completions_url(),
            "https://glhf.chat/api/openai/v1/chat/completions"
        );
    }

    #[test]
    fn env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            model = "file-model"
            response_mode = "aggregating"
            environment = "development"
            base_url = "http://file.example/v1/"
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            file,
            lookup(&[
                ("GLHF_API_KEY", "k"),
                ("CODECHAT_MODEL", "env-model"),
                ("CODECHAT_RESPONSE_MODE", "streaming"),
            ]),
        )
        .unwrap();
        assert_eq!(config.model, "env-model");
        assert_eq!(config.response_mode, ResponseMode::Streaming);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.base_url, "http://file.example/v1");
    }

    #[test]
    fn unknown_response_mode_is_rejected() {
        let err = Config::resolve(
            FileConfig::default(),
            lookup(&[("GLHF_API_KEY", "k"), ("CODECHAT_RESPONSE_MODE", "carrier-pigeon")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "CODECHAT_RESPONSE_MODE", .. }
        ));
    }

    #[test]
    fn app_env_selects_development() {
        let config = Config::resolve(
            FileConfig::default(),
            lookup(&[("GLHF_API_KEY", "k"), ("APP_ENV", "development")]),
        )
        .unwrap();
        assert!(config.environment.is_development());
    }

    #[test]
    fn bad_app_env_names_app_env() {
        let err = Config::resolve(
            FileConfig::default(),
            lookup(&[("GLHF_API_KEY", "k"), ("APP_ENV", "staging")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "APP_ENV", ref value } if value == "staging"
        ));
    }

    #[test]
    fn codechat_env_wins_over_app_env() {
        let config = Config::resolve(
            FileConfig::default(),
            lookup(&[
                ("GLHF_API_KEY", "k"),
                ("CODECHAT_ENV", "production"),
                ("APP_ENV", "development"),
            ]),
        )
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = Config::with_api_key("sk-very-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let parsed: Result<FileConfig, _> = toml::from_str("colour = \"blue\"");
        assert!(parsed.is_err());
    }
}
