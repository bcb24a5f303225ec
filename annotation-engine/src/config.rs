//! Engine configuration types
//!
//! This module defines the knobs the engine needs for one session: the gating threshold,
//! a fallback frame rate, where exports go and which exports are produced. Collaborators
//! (frame sources, recognisers) are not configuration; they are handed to the session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default confidence cutoff above which a numeric series counts as "true"
pub const DEFAULT_THRESHOLD: f32 = 0.99;

/// Configuration for one annotation session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Cutoff above which a numeric value is considered true
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Frame rate used when no frame source is attached
    #[serde(default)]
    pub fps: Option<f32>,

    /// Directory receiving all exports (default: the session data directory)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Processor tag written into exported timelines
    #[serde(default = "default_processor")]
    pub processor: String,

    /// Binarise search regions at mid-grey before text/time recognition
    #[serde(default = "default_true")]
    pub binarize_text: bool,

    /// Maximum number of per-frame warnings logged per rule before suppression
    #[serde(default = "default_max_warnings")]
    pub max_warnings: usize,

    /// Which artifacts to write
    #[serde(default)]
    pub export: ExportConfig,
}

/// Selects which artifacts a session writes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportConfig {
    /// Combined and per-rule per-frame tables
    #[serde(default = "default_true")]
    pub tables: bool,

    /// Segment timelines
    #[serde(default = "default_true")]
    pub timelines: bool,

    /// Overlay timelines for positioned annotations
    #[serde(default = "default_true")]
    pub overlays: bool,

    /// Re-export timelines for ingested logged series
    #[serde(default = "default_true")]
    pub logged_timelines: bool,
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_processor() -> String {
    format!("annotation-engine {}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

fn default_max_warnings() -> usize {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            fps: None,
            output_dir: None,
            processor: default_processor(),
            binarize_text: true,
            max_warnings: default_max_warnings(),
            export: ExportConfig::default(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            tables: true,
            timelines: true,
            overlays: true,
            logged_timelines: true,
        }
    }
}

impl ExportConfig {
    /// Disables every export
    pub fn none() -> Self {
        Self {
            tables: false,
            timelines: false,
            overlays: false,
            logged_timelines: false,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the gating threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Builder method: set the fallback frame rate
    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = Some(fps);
        self
    }

    /// Builder method: write exports into `dir` instead of the data directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Builder method: set the processor tag
    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = processor.into();
        self
    }

    /// Builder method: enable or disable binarisation before text recognition
    pub fn with_text_binarization(mut self, enabled: bool) -> Self {
        self.binarize_text = enabled;
        self
    }

    /// Builder method: replace the export selection
    pub fn with_exports(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    /// Builder method: limit per-rule warnings
    pub fn with_max_warnings(mut self, max_warnings: usize) -> Self {
        self.max_warnings = max_warnings;
        self
    }
}
