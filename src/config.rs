//! Configuration loader and validator for the WordPress.com mirror.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "https://public-api.wordpress.com/rest/v1.1/";
const AUTH_TOKEN_ENV: &str = "WP_API_AUTH_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub wordpress: WordPress,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Remote site settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordPress {
    pub site_id: i64,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Sync engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    #[serde(default = "default_webhook_delay_ms")]
    pub webhook_delay_ms: u64,
    #[serde(default = "default_early_stop")]
    pub early_stop: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            webhook_delay_ms: default_webhook_delay_ms(),
            early_stop: default_early_stop(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_webhook_delay_ms() -> u64 {
    1000
}

fn default_early_stop() -> bool {
    true
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Base URL with a guaranteed trailing slash so endpoint paths join below it.
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.wordpress.api_base_url)
    }

    /// Bearer token, with `WP_API_AUTH_TOKEN` taking precedence. Blank means none.
    pub fn auth_token(&self) -> Option<String> {
        std::env::var(AUTH_TOKEN_ENV)
            .ok()
            .or_else(|| self.wordpress.auth_token.clone())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/wp_mirror.db", self.app.data_dir))
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash)
        .map_err(|_| ConfigError::Invalid("wordpress.api_base_url must be an absolute URL"))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid("wordpress.api_base_url must be an absolute URL"));
    }
    Ok(url)
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.wordpress.site_id == 0 {
        return Err(ConfigError::Invalid("wordpress.site_id must be a non-zero integer"));
    }
    parse_base_url(&cfg.wordpress.api_base_url)?;
    Ok(())
}

/// Returns the example YAML content shipped with the crate.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

wordpress:
  site_id: 123456
  api_base_url: "https://public-api.wordpress.com/rest/v1.1/"
  auth_token: null

sync:
  webhook_delay_ms: 1000
  early_stop: true
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.wordpress.site_id, 123456);
        assert!(cfg.sync.early_stop);
    }

    #[test]
    fn zero_site_id_is_invalid() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.wordpress.site_id = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("site_id")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn non_integer_site_id_fails_to_parse() {
        let yaml = example().replace("site_id: 123456", "site_id: \"my-blog\"");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn missing_site_id_fails_to_parse() {
        let yaml = "app:\n  data_dir: ./data\nwordpress:\n  api_base_url: https://x.test/\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn sync_section_is_optional() {
        let yaml = "app:\n  data_dir: ./data\nwordpress:\n  site_id: 7\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync, SyncSettings::default());
        assert_eq!(cfg.wordpress.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.wordpress.api_base_url = "http://proxy.local/rest/v1.1".into();
        let url = cfg.api_base_url().unwrap();
        assert_eq!(url.as_str(), "http://proxy.local/rest/v1.1/");
        assert_eq!(
            url.join("sites/1/posts").unwrap().as_str(),
            "http://proxy.local/rest/v1.1/sites/1/posts"
        );
    }

    #[test]
    fn relative_base_url_is_invalid() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.wordpress.api_base_url = "rest/v1.1".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.sync.webhook_delay_ms, 1000);
    }
}
