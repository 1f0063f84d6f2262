use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::http_gateway::GatewayConfig;
use crate::models::ClientCredentials;

const APP_DIR: &str = "trackpulse";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub atlassian: AtlassianConfig,
    pub network: NetworkConfig,
    pub analysis: AnalysisConfig,
    pub deploy: DeployConfig,
    pub general: GeneralConfig,
}

/// Where the tracker lives and where credentials are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlassianConfig {
    pub workspace_id: String,
    pub api_base_url: String,
    pub token_url: String,
    /// JSON file holding `{client_id, client_secret}`. Never written.
    pub client_credentials_file: PathBuf,
    /// JSON file holding `{access_token, refresh_token}`. Rewritten after every refresh.
    pub token_store_file: PathBuf,
    /// Seed refresh token, used only when the token store does not exist yet.
    pub refresh_token: Option<String>,
}

/// Transport settings handed to the HTTP gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub proxy_url: Option<String>,
    /// Turning this off accepts any certificate. Local interception only.
    pub verify_tls: bool,
    pub timeout_seconds: u64,
}

/// Epic analysis knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub velocity_window_days: i64,
    pub long_running_days: i64,
    pub search_item_cap: usize,
    pub search_page_size: usize,
    pub changelog_page_size: usize,
    pub changelog_max_items: usize,
    pub comment_page_size: usize,
    pub comment_max_items: usize,
}

/// External deployment orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub command: String,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            atlassian: AtlassianConfig::default(),
            network: NetworkConfig::default(),
            analysis: AnalysisConfig::default(),
            deploy: DeployConfig::default(),
            general: GeneralConfig::default(),
        }
    }
}

impl Default for AtlassianConfig {
    fn default() -> Self {
        let dir = Config::get_config_dir();
        Self {
            workspace_id: String::new(),
            api_base_url: "https://api.atlassian.com".to_string(),
            token_url: "https://auth.atlassian.com/oauth/token".to_string(),
            client_credentials_file: dir.join("client_credentials.json"),
            token_store_file: dir.join("token.json"),
            refresh_token: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            verify_tls: true,
            timeout_seconds: 30,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            velocity_window_days: 30,
            long_running_days: 1,
            search_item_cap: 5000,
            search_page_size: 100,
            changelog_page_size: 50,
            changelog_max_items: 5000,
            comment_page_size: 50,
            comment_max_items: 5000,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            command: "npx serverless deploy".to_string(),
            working_dir: PathBuf::from(".."),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        let mut config = match Self::load_from_file(&Self::get_config_path())? {
            Some(config) => config,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a TOML file, `None` when it does not exist
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(Some(config))
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(workspace_id) = lookup("TRACKPULSE_WORKSPACE_ID") {
            self.atlassian.workspace_id = workspace_id;
        }

        if let Some(base_url) = lookup("TRACKPULSE_API_BASE_URL") {
            self.atlassian.api_base_url = base_url;
        }

        if let Some(token_url) = lookup("TRACKPULSE_TOKEN_URL") {
            self.atlassian.token_url = token_url;
        }

        if let Some(refresh_token) = lookup("TRACKPULSE_REFRESH_TOKEN") {
            self.atlassian.refresh_token = Some(refresh_token);
        }

        if let Some(path) = lookup("TRACKPULSE_CLIENT_CREDENTIALS_FILE") {
            self.atlassian.client_credentials_file = PathBuf::from(path);
        }

        if let Some(path) = lookup("TRACKPULSE_TOKEN_STORE_FILE") {
            self.atlassian.token_store_file = PathBuf::from(path);
        }

        if let Some(proxy) = lookup("TRACKPULSE_PROXY").or_else(|| lookup("LOCAL_HTTP_PROXY")) {
            self.network.proxy_url = Some(proxy);
        }

        if let Some(verify) = lookup("TRACKPULSE_VERIFY_TLS") {
            env_flag("TRACKPULSE_VERIFY_TLS", &verify, &mut self.network.verify_tls);
        }

        if let Some(verbose) = lookup("TRACKPULSE_VERBOSE") {
            env_flag("TRACKPULSE_VERBOSE", &verbose, &mut self.general.verbose);
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;

        Ok(())
    }

    fn get_config_dir() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push(APP_DIR);
        path
    }

    /// Get the configuration file path
    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    /// Read the OAuth client identity, env vars first, then the credential file
    pub fn load_client_credentials(&self) -> Result<ClientCredentials> {
        if let (Ok(client_id), Ok(client_secret)) = (
            env::var("TRACKPULSE_CLIENT_ID"),
            env::var("TRACKPULSE_CLIENT_SECRET"),
        ) {
            return Ok(ClientCredentials {
                client_id,
                client_secret,
            });
        }

        let path = &self.atlassian.client_credentials_file;
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read client credentials from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid client credentials in {}", path.display()))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            proxy_url: self.network.proxy_url.clone(),
            verify_tls: self.network.verify_tls,
            timeout_seconds: self.network.timeout_seconds,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.atlassian.workspace_id.is_empty() {
            return Err(anyhow::anyhow!(
                "No Atlassian workspace id configured. Set TRACKPULSE_WORKSPACE_ID or atlassian.workspace_id"
            ));
        }

        for (name, url) in [
            ("api_base_url", &self.atlassian.api_base_url),
            ("token_url", &self.atlassian.token_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("{} must start with http:// or https://, got {}", name, url));
            }
        }

        if self.analysis.search_page_size == 0
            || self.analysis.changelog_page_size == 0
            || self.analysis.comment_page_size == 0
        {
            return Err(anyhow::anyhow!("Page sizes must be greater than 0"));
        }

        if self.analysis.velocity_window_days <= 0 {
            return Err(anyhow::anyhow!(
                "Velocity window must be at least one day, got {}",
                self.analysis.velocity_window_days
            ));
        }

        Ok(())
    }

    /// Create a sample configuration file
    pub fn create_sample_config() -> Result<()> {
        let config = Self::default();
        let config_path = Self::get_config_path();

        if config_path.exists() {
            println!("Configuration file already exists at: {}", config_path.display());
            return Ok(());
        }

        config.save()?;

        println!("Created sample configuration file at: {}", config_path.display());
        println!("Set your workspace id there, or use environment variables:");
        println!("  TRACKPULSE_WORKSPACE_ID=your_atlassian_cloud_id");
        println!("  TRACKPULSE_REFRESH_TOKEN=your_refresh_token");
        println!("Client id/secret go in {}", config.atlassian.client_credentials_file.display());

        Ok(())
    }

    /// Set a configuration value
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "atlassian.workspace_id" => {
                self.atlassian.workspace_id = value.to_string();
            }
            "atlassian.api_base_url" => {
                self.atlassian.api_base_url = value.to_string();
            }
            "atlassian.token_url" => {
                self.atlassian.token_url = value.to_string();
            }
            "network.proxy_url" => {
                self.network.proxy_url = if value.is_empty() { None } else { Some(value.to_string()) };
            }
            "network.verify_tls" => {
                self.network.verify_tls = parse_flag(value)
                    .ok_or_else(|| anyhow::anyhow!("Invalid verify_tls value: {}. Must be true or false", value))?;
            }
            "network.timeout_seconds" => {
                self.network.timeout_seconds = value.parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("Invalid timeout_seconds value: {}", value))?;
            }
            "analysis.velocity_window_days" => {
                self.analysis.velocity_window_days = value.parse::<i64>()
                    .map_err(|_| anyhow::anyhow!("Invalid velocity_window_days value: {}", value))?;
            }
            "analysis.long_running_days" => {
                self.analysis.long_running_days = value.parse::<i64>()
                    .map_err(|_| anyhow::anyhow!("Invalid long_running_days value: {}", value))?;
            }
            "deploy.command" => {
                self.deploy.command = value.to_string();
            }
            "general.verbose" => {
                self.general.verbose = parse_flag(value)
                    .ok_or_else(|| anyhow::anyhow!("Invalid verbose value: {}. Must be true or false", value))?;
            }
            _ => {
                return Err(anyhow::anyhow!("Unknown configuration key: {}", key));
            }
        }
        Ok(())
    }

    /// Get available configuration keys
    pub fn get_available_keys() -> Vec<&'static str> {
        vec![
            "atlassian.workspace_id",
            "atlassian.api_base_url",
            "atlassian.token_url",
            "network.proxy_url",
            "network.verify_tls",
            "network.timeout_seconds",
            "analysis.velocity_window_days",
            "analysis.long_running_days",
            "deploy.command",
            "general.verbose",
        ]
    }
}

/// Accepts the usual spellings of a boolean flag.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_flag(name: &str, value: &str, target: &mut bool) {
    match parse_flag(value) {
        Some(flag) => *target = flag,
        None => warn!("Ignoring {}={:?}: expected true/false, 1/0, yes/no or on/off", name, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.atlassian.api_base_url, "https://api.atlassian.com");
        assert_eq!(config.atlassian.token_url, "https://auth.atlassian.com/oauth/token");
        assert!(config.network.verify_tls);
        assert_eq!(config.analysis.velocity_window_days, 30);
        assert_eq!(config.analysis.long_running_days, 1);
        assert_eq!(config.analysis.search_item_cap, 5000);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [atlassian]
            workspace_id = "from-file"

            [network]
            verify_tls = true
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("TRACKPULSE_WORKSPACE_ID", "from-env"),
            ("LOCAL_HTTP_PROXY", "http://localhost:8080"),
            ("TRACKPULSE_VERIFY_TLS", "false"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.atlassian.workspace_id, "from-env");
        assert_eq!(config.network.proxy_url.as_deref(), Some("http://localhost:8080"));
        assert!(!config.network.verify_tls);
        // untouched sections keep their defaults
        assert_eq!(config.analysis.changelog_page_size, 50);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.atlassian.workspace_id = "cloud-123".to_string();
        assert!(config.validate().is_ok());

        config.atlassian.token_url = "ftp://auth.example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_value() {
        let mut config = Config::default();
        config.set_value("network.verify_tls", "false").unwrap();
        config.set_value("network.proxy_url", "http://localhost:8080").unwrap();
        config.set_value("analysis.long_running_days", "10").unwrap();
        assert!(!config.network.verify_tls);
        assert_eq!(config.network.proxy_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.analysis.long_running_days, 10);

        assert!(config.set_value("network.verify_tls", "maybe").is_err());
        assert!(config.set_value("nope", "1").is_err());
    }

    #[test]
    fn test_gateway_config_mirrors_network() {
        let mut config = Config::default();
        config.network.proxy_url = Some("http://localhost:8080".to_string());
        config.network.verify_tls = false;
        let gateway = config.gateway_config();
        assert_eq!(gateway.proxy_url.as_deref(), Some("http://localhost:8080"));
        assert!(!gateway.verify_tls);
        assert_eq!(gateway.timeout_seconds, 30);
    }

    #[test]
    fn test_env_flags_accept_numeric_and_word_forms() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "TRACKPULSE_VERIFY_TLS" => Some("0".to_string()),
            "TRACKPULSE_VERBOSE" => Some("Yes".to_string()),
            _ => None,
        });
        assert!(!config.network.verify_tls);
        assert!(config.general.verbose);

        // unrecognised values leave the current setting alone
        config.apply_env(|key| match key {
            "TRACKPULSE_VERIFY_TLS" => Some("maybe".to_string()),
            "TRACKPULSE_VERBOSE" => Some("".to_string()),
            _ => None,
        });
        assert!(!config.network.verify_tls);
        assert!(config.general.verbose);

        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("1"), Some(true));
    }
}
