//! # Configuration Management
//!
//! Loads the server configuration from, in priority order (highest first):
//! 1. Well-known environment variables (`PORT`, `HOST`, `OPENAI_API_KEY`,
//!    `AZURE_SPEECH_KEY`, `AZURE_SPEECH_REGION`)
//! 2. Environment variables with the `APP_` prefix, nested keys joined by
//!    `__` (e.g. `APP_COMPLETION__MODEL=gpt-4o-mini`,
//!    `APP_STORAGE__DOWNLOAD_TIMEOUT_SECS=30`)
//! 3. An optional `config.toml` in the working directory
//! 4. Built-in defaults (the `Default` impl)
//!
//! Secrets are never required to start the server: a missing key only
//! produces a warning, and the first call that needs it fails with a
//! session-level error the client can see.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub completion: CompletionConfig,
    pub speech: SpeechConfig,
    pub storage: StorageConfig,
    pub performance: PerformanceConfig,
}

/// Where the HTTP/WebSocket server listens and what it serves statically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory with the built web client, served at `/`
    pub static_dir: PathBuf,
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Azure speech service credentials and operation time limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub key: String,
    pub region: String,
    pub synthesis_timeout_secs: u64,
    pub recognition_timeout_secs: u64,
}

/// Root of the per-session scratch space (resume, audio, exported chats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// Time limit for downloading a resume into session storage
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
                static_dir: PathBuf::from("dist"),
            },
            completion: CompletionConfig {
                api_key: String::new(),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-3.5-turbo".to_string(),
                timeout_secs: 60,
            },
            speech: SpeechConfig {
                key: String::new(),
                region: "westeurope".to_string(),
                synthesis_timeout_secs: 30,
                recognition_timeout_secs: 30,
            },
            storage: StorageConfig {
                root: PathBuf::from("public/temp"),
                download_timeout_secs: 30,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Plain names used by deployment platforms and existing .env files
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("OPENAI_API_KEY", "completion.api_key"),
            ("AZURE_SPEECH_KEY", "speech.key"),
            ("AZURE_SPEECH_REGION", "speech.region"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.completion.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Completion model cannot be empty"));
        }

        if !self.completion.base_url.starts_with("http://")
            && !self.completion.base_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "Completion base URL must be http(s): {}",
                self.completion.base_url
            ));
        }

        if self.completion.timeout_secs == 0
            || self.speech.synthesis_timeout_secs == 0
            || self.speech.recognition_timeout_secs == 0
            || self.storage.download_timeout_secs == 0
        {
            return Err(anyhow::anyhow!("Timeouts must be greater than 0"));
        }

        if self.speech.region.trim().is_empty() {
            return Err(anyhow::anyhow!("Speech region cannot be empty"));
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Storage root cannot be empty"));
        }

        Ok(())
    }

    /// Settings that are allowed to be absent but make sessions fail later.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.completion.api_key.is_empty() {
            missing.push("OPENAI_API_KEY");
        }
        if self.speech.key.is_empty() {
            missing.push("AZURE_SPEECH_KEY");
        }
        missing
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl SpeechConfig {
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.recognition_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.completion.base_url = "api.openai.com".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.speech.synthesis_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.download_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_credentials_reported() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.missing_credentials(),
            vec!["OPENAI_API_KEY", "AZURE_SPEECH_KEY"]
        );

        config.completion.api_key = "sk-test".to_string();
        config.speech.key = "azure".to_string();
        assert!(config.missing_credentials().is_empty());
    }

    #[test]
    fn test_timeouts() {
        let config = AppConfig::default();
        assert_eq!(config.completion.timeout(), Duration::from_secs(60));
        assert_eq!(config.speech.synthesis_timeout(), Duration::from_secs(30));
        assert_eq!(config.storage.download_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_applies_environment_overrides() {
        // Only test in the crate that touches the process environment
        let vars = [
            ("PORT", "8088"),
            ("OPENAI_API_KEY", "sk-from-env"),
            ("AZURE_SPEECH_REGION", "eastus"),
            ("APP_COMPLETION__MODEL", "gpt-4o-mini"),
            ("APP_STORAGE__DOWNLOAD_TIMEOUT_SECS", "12"),
        ];
        for (name, value) in vars {
            env::set_var(name, value);
        }

        let loaded = AppConfig::load();
        for (name, _) in vars {
            env::remove_var(name);
        }
        let config = loaded.unwrap();

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.completion.api_key, "sk-from-env");
        assert_eq!(config.speech.region, "eastus");
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.storage.download_timeout_secs, 12);
        // Untouched keys keep their defaults
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.performance.max_concurrent_sessions, 32);
        assert!(config.validate().is_ok());
    }
}
