//! Configuration loading and parsing
//!
//! Paths under `[input]` are relative to `data_dir` and may contain `{stem}`, which is
//! replaced by the recording stem of each video, e.g. `frames = "frames/{stem}"`.

use anyhow::{Context, Result};
use annotation_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Templates, logged series and (by default) exports live here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub videos: Vec<PathBuf>,
    /// Directory of extracted frame images per video
    pub frames: Option<String>,
    /// Frame rate of the image sequences
    pub fps: Option<f32>,
    /// Logged series and first-minute files, ingested in order
    #[serde(default)]
    pub logged: Vec<String>,
    pub hook_log: Option<String>,
    pub accessibility_log: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RulesConfig {
    /// Rule definitions, one per entry
    #[serde(default)]
    pub definitions: Vec<String>,
    /// File with one rule per line
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginConfig {
    /// Dynamic library providing template matching and text recognition
    pub library: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            videos: Vec::new(),
            frames: None,
            fps: None,
            logged: Vec::new(),
            hook_log: None,
            accessibility_log: None,
        }
    }
}

impl InputConfig {
    /// Resolves a configured path for one recording
    pub fn resolve(&self, template: &str, stem: &str) -> PathBuf {
        self.data_dir.join(template.replace("{stem}", stem))
    }

    /// Frame rate for image sequences: `[input] fps`, else the engine fallback
    pub fn frame_rate(&self, engine: &EngineConfig) -> Option<f32> {
        self.fps.or(engine.fps)
    }
}

impl AppConfig {
    /// Checks values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.engine.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("Threshold {} is outside [0, 1]", threshold);
        }
        Ok(())
    }

    /// All rule definitions: inline ones first, then the rules file
    pub fn rule_definitions(&self) -> Result<Vec<String>> {
        let mut rules = self.rules.definitions.clone();
        if let Some(path) = &self.rules.file {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read rules file: {:?}", path))?;
            rules.extend(annotation_engine::split_rule_text(&content));
        }
        Ok(rules)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}
