//! Application configuration management
//!
//! JSON configuration file stored under the user config directory, created
//! with defaults on first run. Holds the default prompt templates, the
//! classifier endpoint settings, the ledger file location and logging
//! options. Operator-supplied per-run parameters live in `JobConfig`, not
//! here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_RENAMER_PROMPT: &str = "\
Voce e um especialista em nomenclatura de produtos para um aplicativo de supermercado.

IMPORTANTE: Sua tarefa e SEMPRE MELHORAR o nome do produto. NUNCA retorne o nome original inalterado.

Regras:
- Corrija abreviacoes e erros de digitacao.
- Inclua marca, variedade e quantidade quando presentes no nome original.
- Nao invente informacoes que nao estejam no nome original.
- Responda APENAS com o nome melhorado, sem explicacoes.";

pub const DEFAULT_CATEGORIZER_SYSTEM_PROMPT: &str = "\
Voce e um especialista em categorizacao de produtos de supermercado. \
Responda APENAS com o ID solicitado, sem explicacoes, sem pontuacao extra.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub prompts: PromptConfig,
    pub classifier: ClassifierConfig,
    pub logging: LoggingConfig,
    /// Where the daily usage ledger lives. Defaults to the app data
    /// directory.
    pub ledger_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub renamer_template: String,
    pub categorizer_system: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
    pub file_output: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prompts: PromptConfig::default(),
            classifier: ClassifierConfig::default(),
            logging: LoggingConfig::default(),
            ledger_path: None,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            renamer_template: DEFAULT_RENAMER_PROMPT.to_string(),
            categorizer_system: DEFAULT_CATEGORIZER_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
        }
    }
}

impl AppConfig {
    /// Resolved ledger file location.
    pub fn ledger_file(&self) -> Result<PathBuf> {
        match &self.ledger_path {
            Some(path) => Ok(path.clone()),
            None => Ok(ConfigManager::get_app_data_dir()?.join("daily_stats.json")),
        }
    }
}

pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory.
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("catalog-automator");
        Ok(config_dir)
    }

    /// Get application data directory (ledger, logs).
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join("catalog-automator");
        Ok(data_dir)
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("catalog_automator_config.json");
        Ok(Self { config_path })
    }

    #[must_use]
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Initialize configuration on first run, or load the existing file.
    pub async fn initialize_on_first_run(&self) -> Result<AppConfig> {
        let config_dir = self
            .config_path
            .parent()
            .context("Failed to get config directory")?;

        if !config_dir.exists() {
            fs::create_dir_all(config_dir)
                .await
                .context("Failed to create config directory")?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if self.config_path.exists() {
            self.load_config().await
        } else {
            info!("First run detected - initializing default configuration");
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            Ok(default_config)
        }
    }

    /// Load configuration from file. A corrupted file is moved aside and
    /// replaced with defaults rather than aborting startup.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Configuration file corrupted ({e}), backing up and using defaults");
                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(backup_err) = fs::rename(&self.config_path, &backup_path).await {
                    warn!("Failed to back up corrupted config: {backup_err}");
                }
                let default_config = AppConfig::default();
                self.save_config(&default_config).await?;
                Ok(default_config)
            }
        }
    }

    /// Save configuration to file.
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }
}
