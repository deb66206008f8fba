use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub database_path: Option<PathBuf>,
    pub workers: usize,
    pub rescan_interval_secs: u64,
    pub claim_reset_interval_secs: u64,
    pub settle_delay_ms: u64,
    pub extensions: Vec<String>,
    pub parser: ParserConfig,
    pub detector: DetectorConfig,
}

/// How to launch the external log parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub executable: PathBuf,
    /// Leading arguments, e.g. the assembly path when the tool runs under a host runtime.
    pub args: Vec<String>,
    pub config_file: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum quickness or alacrity generation (percent) for the boon DPS board.
    pub boon_threshold: f64,
    /// Encounter tracked for progression on failed attempts. Disabled when unset.
    pub progression_trigger_id: Option<i64>,
    pub progression_legendary: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./data"),
            database_path: None,
            workers: 4,
            rescan_interval_secs: 60,
            claim_reset_interval_secs: 600,
            settle_delay_ms: 500,
            extensions: vec!["evtc".into(), "zevtc".into(), "evtc.zip".into()],
            parser: ParserConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("GuildWars2EliteInsights-CLI"),
            args: Vec::new(),
            config_file: PathBuf::from("./parser.conf"),
            timeout_secs: 300,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            boon_threshold: 20.0,
            progression_trigger_id: None,
            progression_legendary: true,
        }
    }
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.storage_root.join("raidlog.db"))
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs.max(1))
    }

    pub fn claim_reset_interval(&self) -> Duration {
        Duration::from_secs(self.claim_reset_interval_secs.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Message("workers must be at least 1".into()));
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::Message(
                "at least one log extension must be configured".into(),
            ));
        }
        Ok(())
    }
}

pub fn has_recognized_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    extensions.iter().any(|ext| {
        let suffix = format!(".{}", ext.trim_start_matches('.').to_ascii_lowercase());
        name.len() > suffix.len() && name.ends_with(&suffix)
    })
}

/// Load settings from defaults, an optional TOML file and `RAIDLOG__*` environment variables.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, Error> {
    let file_source = match path {
        Some(p) => ConfigFile::from(p).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };

    let builder = Config::builder()
        .add_source(file_source)
        .add_source(
            Environment::with_prefix("RAIDLOG")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("extensions")
                .with_list_parse_key("parser.args"),
        )
        .build()?;

    let config = builder.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}
