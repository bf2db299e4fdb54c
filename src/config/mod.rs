use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::HomeFixError;
use crate::logging::LoggingConfig;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub scraping: ScrapingConfig,
    pub images: ImageConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Left empty in the file; normally supplied through `OPENAI_API_KEY`
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub vision_model: String,
    pub question_model: String,
    pub max_tokens: u32,
    pub question_max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingConfig {
    pub retail_timeout_seconds: u64,
    pub video_timeout_seconds: u64,
    pub thumbnail_timeout_seconds: u64,
    pub user_agents: Vec<String>,
    /// Replaces the built-in product keyword tables when set
    pub keywords_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    pub upload_dir: PathBuf,
    pub max_upload_mb: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = get_data_directory();

        Self {
            database: DatabaseConfig {
                path: data_dir.join("homefix.db"),
            },
            llm: LlmConfig {
                api_key: String::new(),
                base_url: "https://api.openai.com/v1".to_string(),
                vision_model: "gpt-4o-mini".to_string(),
                question_model: "gpt-4".to_string(),
                max_tokens: 2000,
                question_max_tokens: 800,
                temperature: 0.3,
                request_timeout_seconds: 60,
            },
            scraping: ScrapingConfig {
                retail_timeout_seconds: 8,
                video_timeout_seconds: 3,
                thumbnail_timeout_seconds: 5,
                user_agents: vec![
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
                ],
                keywords_path: None,
            },
            images: ImageConfig {
                max_width: 1920,
                max_height: 1080,
                jpeg_quality: 85,
            },
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 4000,
                cors_origin: "http://localhost:5173".to_string(),
                upload_dir: PathBuf::from("uploads"),
                max_upload_mb: 25,
            },
            logging: LoggingConfig {
                log_directory: data_dir.join("logs"),
                ..LoggingConfig::default()
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, writing defaults on first run
    pub async fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            info!("No configuration file found, using defaults");
            let config = Self::default();
            config.save_to(&config_path).await?;
            Ok(config)
        }
    }

    /// Load configuration from specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config {}: {}", path.as_ref().display(), e)
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            anyhow::Error::new(e).context(HomeFixError::InvalidConfig {
                path: path.as_ref().display().to_string(),
            })
        })?;

        config.validate()?;

        info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.llm.max_tokens == 0 || self.llm.question_max_tokens == 0 {
            return Err(anyhow::anyhow!("LLM max_tokens must be > 0"));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow::anyhow!("LLM temperature must be between 0.0 and 2.0"));
        }

        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("LLM base_url must not be empty"));
        }

        if self.scraping.user_agents.is_empty() {
            return Err(anyhow::anyhow!("At least one user agent must be configured"));
        }

        if self.scraping.retail_timeout_seconds == 0 || self.scraping.video_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Scraping timeouts must be > 0"));
        }

        if self.images.max_width == 0 || self.images.max_height == 0 {
            return Err(anyhow::anyhow!("Image bounds must be > 0"));
        }

        if !(1..=100).contains(&self.images.jpeg_quality) {
            return Err(anyhow::anyhow!("JPEG quality must be between 1 and 100"));
        }

        if self.api.port == 0 {
            return Err(anyhow::anyhow!("API port must be > 0"));
        }

        if self.api.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("API max_upload_mb must be > 0"));
        }

        Ok(())
    }

    /// Get data directory path
    pub fn get_data_dir(&self) -> PathBuf {
        self.database.path.parent()
            .unwrap_or(Path::new("."))
            .to_path_buf()
    }

    /// Ensure all required directories exist
    pub async fn ensure_directories(&self) -> Result<()> {
        for dir in [self.get_data_dir(), self.api.upload_dir.clone()] {
            if !dir.exists() {
                tokio::fs::create_dir_all(&dir).await?;
                info!("Created directory: {}", dir.display());
            }
        }

        Ok(())
    }
}

/// Get the default data directory
fn get_data_directory() -> PathBuf {
    directories::ProjectDirs::from("com", "homefix", "assist")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("data"))
}

/// Get the configuration file path
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "homefix", "assist")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        Self::apply_from(config, |key| std::env::var(key).ok());
        info!("Applied environment variable overrides");
    }

    fn apply_from(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = lookup("HOMEFIX_DB_PATH") {
            config.database.path = PathBuf::from(db_path);
        }

        // LLM overrides
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            config.llm.api_key = api_key;
        }

        if let Some(model) = lookup("OPENAI_VISION_MODEL") {
            config.llm.vision_model = model;
        }

        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            config.llm.base_url = base_url;
        }

        // Scraping overrides
        if let Some(path) = lookup("HOMEFIX_KEYWORDS_PATH") {
            config.scraping.keywords_path = Some(PathBuf::from(path));
        }

        // API overrides
        if let Some(host) = lookup("HOMEFIX_HOST") {
            config.api.host = host;
        }

        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            config.api.port = port;
        }

        if let Some(upload_dir) = lookup("UPLOAD_DIR") {
            config.api.upload_dir = PathBuf::from(upload_dir);
        }

        if let Some(origin) = lookup("CORS_ORIGIN") {
            config.api.cors_origin = origin;
        }

        if let Some(log_level) = lookup("HOMEFIX_LOG_LEVEL") {
            config.logging.level = log_level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.port, 4000);
        assert_eq!(config.llm.vision_model, "gpt-4o-mini");
        assert_eq!(config.images.jpeg_quality, 85);
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = AppConfig::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_from_environment() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("PORT", "8088"),
            ("UPLOAD_DIR", "/tmp/up"),
            ("CORS_ORIGIN", "https://app.example"),
            ("OPENAI_VISION_MODEL", "gpt-4o"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        ConfigOverrides::apply_from(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.api.port, 8088);
        assert_eq!(config.api.upload_dir, PathBuf::from("/tmp/up"));
        assert_eq!(config.api.cors_origin, "https://app.example");
        assert_eq!(config.llm.vision_model, "gpt-4o");
    }

    #[test]
    fn test_invalid_port_override_is_ignored() {
        let mut config = AppConfig::default();
        ConfigOverrides::apply_from(&mut config, |k| (k == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.api.port, 4000);
    }

    #[tokio::test]
    async fn test_unparsable_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[api\nport = \"four thousand\"").await.unwrap();

        let err = AppConfig::load_from_file(&path).await.unwrap_err();
        match err.downcast_ref::<HomeFixError>() {
            Some(HomeFixError::InvalidConfig { path: reported }) => {
                assert_eq!(reported, &path.display().to_string())
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.downcast_ref::<HomeFixError>().map(|e| e.category()), Some("configuration"));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.api.port = 4100;
        config.save_to(&path).await.unwrap();

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.api.port, 4100);
        assert_eq!(loaded.scraping.keywords_path, None);
    }
}
