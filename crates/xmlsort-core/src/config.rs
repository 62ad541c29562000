use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = ".xmlsort-merge.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub canonical: CanonicalSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Child element names consulted, in order, for the secondary sort key.
    #[serde(default = "default_secondary_keys")]
    pub secondary_keys: Vec<String>,
    #[serde(default)]
    pub validator: ValidatorSettings,
}

impl Default for CanonicalSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            secondary_keys: default_secondary_keys(),
            validator: ValidatorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorKind {
    #[default]
    Builtin,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSettings {
    #[serde(default)]
    pub kind: ValidatorKind,
    #[serde(default = "default_validator_command")]
    pub command: String,
    #[serde(default = "default_validator_args")]
    pub args: Vec<String>,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            kind: ValidatorKind::default(),
            command: default_validator_command(),
            args: default_validator_args(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeEngine {
    #[default]
    Builtin,
    Git,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSettings {
    #[serde(default)]
    pub engine: MergeEngine,
    #[serde(default = "default_git_program")]
    pub git_program: String,
    #[serde(default = "default_marker_size")]
    pub marker_size: usize,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            engine: MergeEngine::default(),
            git_program: default_git_program(),
            marker_size: default_marker_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// When set, logs are also appended to `xmlsort-merge.log` in this directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            dir: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_secondary_keys() -> Vec<String> {
    vec!["fullName".into(), "name".into()]
}
fn default_validator_command() -> String {
    "xmllint".into()
}
fn default_validator_args() -> Vec<String> {
    vec!["--noout".into()]
}
fn default_git_program() -> String {
    "git".into()
}
fn default_marker_size() -> usize {
    merge_engine::DEFAULT_MARKER_SIZE
}
fn default_log_filter() -> String {
    "warn".into()
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
