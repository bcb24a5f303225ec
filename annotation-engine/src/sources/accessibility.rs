//! Accessibility snapshots
//!
//! A snapshot log is a JSON array of per-frame snapshots recording which user interface
//! element was under the pointer and which one had keyboard focus:
//!
//! ```json
//! [{"frame": 0, "hovered": {"role": "button", "label": "Save", "x": 10, "y": 5, "w": 40, "h": 20}, "focused": null}]
//! ```
//!
//! Snapshots are sparse: the snapshot in effect at a frame is the latest one at or before it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::types::{Rect, Result};

/// One user interface element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxElement {
    pub role: String,
    #[serde(default)]
    pub label: String,
    pub x: f32,
    pub y: f32,
    #[serde(rename = "w")]
    pub width: f32,
    #[serde(rename = "h")]
    pub height: f32,
}

impl AxElement {
    /// Text recorded for the element: its label, or its role when unlabelled
    pub fn text(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.role
        } else {
            &self.label
        }
    }

    pub fn centre(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// True when the element's centre lies inside `rect`
    pub fn is_inside(&self, rect: &Rect) -> bool {
        let (cx, cy) = self.centre();
        rect.contains(cx, cy)
    }
}

/// Accessibility state at one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxSnapshot {
    pub frame: usize,
    #[serde(default)]
    pub hovered: Option<AxElement>,
    #[serde(default)]
    pub focused: Option<AxElement>,
}

/// Source of per-frame accessibility snapshots
pub trait AccessibilitySource {
    fn snapshot(&mut self, frame: usize) -> Option<AxSnapshot>;
}

/// Snapshots loaded from a JSON log
#[derive(Debug, Clone, Default)]
pub struct SnapshotLog {
    snapshots: BTreeMap<usize, AxSnapshot>,
}

impl SnapshotLog {
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = AxSnapshot>) -> Self {
        Self {
            snapshots: snapshots.into_iter().map(|s| (s.frame, s)).collect(),
        }
    }

    /// Loads a JSON snapshot log
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading accessibility snapshots: {:?}", path);
        let reader = BufReader::new(File::open(path)?);
        let snapshots: Vec<AxSnapshot> = serde_json::from_reader(reader)?;
        log::debug!("Loaded {} accessibility snapshots", snapshots.len());
        Ok(Self::from_snapshots(snapshots))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl AccessibilitySource for SnapshotLog {
    fn snapshot(&mut self, frame: usize) -> Option<AxSnapshot> {
        self.snapshots
            .range(..=frame)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone())
    }
}
