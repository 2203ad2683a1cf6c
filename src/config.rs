use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CREDENTIAL_FILE_NAME: &str = "github-token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    /// Directory holding the persisted credential. Defaults to `~/.config/copilot-bridge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub default: String,
    #[serde(default = "default_big_model")]
    pub big: String,
    #[serde(default = "default_small_model")]
    pub small: String,
    /// Map "haiku"/"sonnet" family names onto `small`/`big` for Anthropic-style callers.
    #[serde(default = "default_true")]
    pub family_aliases: bool,
    /// Extra exact aliases, alias -> backend model id.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "default_editor_version")]
    pub editor_version: String,
    #[serde(default = "default_integration_id")]
    pub integration_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_device_code_url")]
    pub device_code_url: String,
    #[serde(default = "default_access_token_url")]
    pub access_token_url: String,
    #[serde(default = "default_token_exchange_url")]
    pub token_exchange_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_big_model() -> String {
    "gpt-4o".to_string()
}

fn default_small_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_backend_url() -> String {
    "https://api.githubcopilot.com".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_max_tokens() -> u64 {
    8192
}

fn default_editor_version() -> String {
    "vscode/0.1.0".to_string()
}

fn default_integration_id() -> String {
    "vscode-chat".to_string()
}

fn default_client_id() -> String {
    "Iv1.b507a08c87ecfe98".to_string()
}

fn default_scope() -> String {
    "copilot".to_string()
}

fn default_device_code_url() -> String {
    "https://github.com/login/device/code".to_string()
}

fn default_access_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

fn default_token_exchange_url() -> String {
    "https://api.github.com/copilot_internal/v2/token".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            big: default_big_model(),
            small: default_small_model(),
            family_aliases: true,
            aliases: HashMap::new(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_secs: default_request_timeout(),
            max_tokens: default_max_tokens(),
            editor_version: default_editor_version(),
            integration_id: default_integration_id(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            scope: default_scope(),
            device_code_url: default_device_code_url(),
            access_token_url: default_access_token_url(),
            token_exchange_url: default_token_exchange_url(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            config_dir: None,
            models: ModelsConfig::default(),
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load config from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `BIG_MODEL` / `SMALL_MODEL` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(big) = lookup("BIG_MODEL").filter(|v| !v.trim().is_empty()) {
            self.models.big = big.trim().to_string();
        }
        if let Some(small) = lookup("SMALL_MODEL").filter(|v| !v.trim().is_empty()) {
            self.models.small = small.trim().to_string();
        }
    }

    /// Directory holding the persisted credential.
    pub fn effective_config_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.config_dir {
            return Ok(dir.clone());
        }
        dirs_path()
            .map(|home| home.join(".config").join("copilot-bridge"))
            .ok_or_else(|| BridgeError::config("HOME is not set and no config_dir configured"))
    }

    pub fn credential_path(&self) -> Result<PathBuf> {
        Ok(self.effective_config_dir()?.join(CREDENTIAL_FILE_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("copilot-bridge.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("copilot-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("copilot-bridge").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("copilot-bridge").join("config.toml"));
        }
    }

    if let Some(home) = dirs_path() {
        paths.push(home.join(".copilot-bridge.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000
debug = true
config_dir = "/tmp/bridge-test"

[models]
big = "claude-3.7-sonnet"
family_aliases = false

[models.aliases]
"fast" = "gpt-4o-mini"

[backend]
request_timeout_secs = 30
"#
        )
        .unwrap();

        let config = BridgeConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert!(config.debug);
        assert_eq!(config.models.big, "claude-3.7-sonnet");
        assert_eq!(config.models.small, "gpt-4o-mini");
        assert!(!config.models.family_aliases);
        assert_eq!(
            config.models.aliases.get("fast"),
            Some(&"gpt-4o-mini".to_string())
        );
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.backend.base_url, "https://api.githubcopilot.com");
        assert_eq!(
            config.credential_path().unwrap(),
            PathBuf::from("/tmp/bridge-test/github-token")
        );
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = BridgeConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.models.default, "gpt-4o");
        assert!(config.models.family_aliases);
        assert_eq!(config.backend.max_tokens, 8192);
        assert_eq!(config.auth.scope, "copilot");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::default();
        config.apply_overrides_from(|key| match key {
            "BIG_MODEL" => Some("o1".to_string()),
            "SMALL_MODEL" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.models.big, "o1");
        assert_eq!(config.models.small, "gpt-4o-mini");
    }

    #[test]
    fn test_bind_addr() {
        let config = BridgeConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..BridgeConfig::default()
        };
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
    }
}
