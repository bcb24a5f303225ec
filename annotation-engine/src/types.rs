//! Core types for the annotation engine
//!
//! This module defines the error taxonomy shared by every layer of the engine and the
//! small value types (rectangles, per-frame samples, match results) that flow between
//! the scheduler, the recognition collaborators and the exporters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::expression::ExpressionError;
use crate::rules::CompileError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Placeholder stored in textual series when nothing was recognised
pub const BLANK: &str = " ";

/// Returns true when a textual value carries no recognised content
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Errors that can occur while compiling rules or processing a session
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Rule compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Expression failed: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Unresolved dependency in rule '{rule}': '{name}' is neither a logged series nor a registrable template")]
    UnresolvedDependency { rule: String, name: String },

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Duplicate segment in rule '{rule}' starting at frame {frame}")]
    DuplicateSegment { rule: String, frame: usize },

    #[error("Series consistency violated: {0}")]
    Consistency(String),

    #[error("Template '{name}' unavailable: {reason}")]
    Template { name: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing collaborator: {0}")]
    MissingCollaborator(String),

    #[error("Failed to write export {path:?}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Wraps an IO error with the export path it happened on
    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Export {
            path: path.into(),
            source,
        }
    }
}

/// Axis-aligned rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whole-frame rectangle
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i64, height as i64)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Clamps the rectangle to a `width` x `height` frame, returning `None` when nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.x.saturating_add(self.width).min(width as i64);
        let y1 = self.y.saturating_add(self.height).min(height as i64);
        let clamped = Rect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0));
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }

    /// Returns true if the point lies inside the rectangle
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x as f32
            && y >= self.y as f32
            && x < self.x.saturating_add(self.width) as f32
            && y < self.y.saturating_add(self.height) as f32
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// Value recorded for one annotation at one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sample {
    /// Threshold-gated numeric value (match confidence, click pulse)
    Numeric(f32),
    /// Recognised text, or [`BLANK`]
    Text(String),
}

impl Sample {
    pub fn blank() -> Self {
        Sample::Text(BLANK.to_string())
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Numeric(v) => write!(f, "{}", v),
            Sample::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One per-frame row for an annotation: position plus value
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub x: f32,
    pub y: f32,
    pub sample: Sample,
}

impl Observation {
    pub fn new(x: f32, y: f32, sample: Sample) -> Self {
        Self { x, y, sample }
    }

    /// Default row used when a rule is not triggered or its frame could not be decoded
    pub fn default_for(kind: SeriesKind) -> Self {
        match kind {
            SeriesKind::Numeric => Self::new(0.0, 0.0, Sample::Numeric(0.0)),
            SeriesKind::Text => Self::new(0.0, 0.0, Sample::blank()),
        }
    }
}

/// Whether a series holds numbers or text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesKind {
    Numeric,
    Text,
}

/// Result of one template-matching call, in the coordinates of the searched region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchLocation {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}
