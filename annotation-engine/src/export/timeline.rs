//! Segment and overlay timelines
//!
//! Timelines are written as JSON documents with one top-level localisation spanning the
//! whole recording and one sub-localisation per segment or overlay. Documents carry no
//! wall-clock data, so exporting the same timeline twice yields identical bytes.

use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::timecode::SessionClock;
use crate::types::{EngineError, Result};

/// Timeline document format version
pub const TIMELINE_VERSION: u32 = 1;

/// `[start, end)` interval with a label, in frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

impl Segment {
    pub fn new(start: usize, end: usize, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }
}

/// Positioned marker: an ellipse centred on a point, in normalised coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub frame: usize,
    pub centre: (f32, f32),
    pub radius: (f32, f32),
    pub label: String,
}

/// Where an annotation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    ComputerVision,
    Accessibility,
    InputHook,
    Conversion,
}

/// Provenance written into every timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Producing rule (or logged annotation) name
    pub rule: String,
    /// Algorithm tag, e.g. the action that produced the annotation
    pub algorithm: String,
    pub source: SourceTag,
}

impl Provenance {
    pub fn new(rule: impl Into<String>, algorithm: impl Into<String>, source: SourceTag) -> Self {
        Self {
            rule: rule.into(),
            algorithm: algorithm.into(),
            source,
        }
    }
}

#[derive(Debug, Serialize)]
struct Point {
    x: f32,
    y: f32,
}

#[derive(Debug, Serialize)]
struct Shape {
    t: &'static str,
    c: Point,
    rx: f32,
    ry: f32,
    o: f32,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Entry {
    Segment {
        label: String,
        tcin: String,
        tcout: String,
        tclevel: f32,
    },
    Overlay {
        label: String,
        tc: String,
        tclevel: f32,
        shape: Shape,
    },
}

#[derive(Debug, Serialize)]
struct Sublocalisations {
    localisation: Vec<Entry>,
}

#[derive(Debug, Serialize)]
struct Localisation {
    sublocalisations: Sublocalisations,
    #[serde(rename = "type")]
    kind: &'static str,
    tcin: String,
    tcout: String,
    tclevel: f32,
}

/// Serialisable timeline document
#[derive(Debug, Serialize)]
pub struct TimelineDocument {
    localisation: Vec<Localisation>,
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    algorithm: String,
    processor: String,
    source: SourceTag,
    rule: String,
    version: u32,
}

impl TimelineDocument {
    /// Builds a segment timeline covering frames `[0, frames)`
    pub fn segments(
        id: &str,
        segments: &[Segment],
        frames: usize,
        clock: &SessionClock,
        provenance: &Provenance,
        processor: &str,
    ) -> Self {
        let entries = segments
            .iter()
            .map(|segment| Entry::Segment {
                label: segment.label.clone(),
                tcin: clock.timecode(segment.start),
                tcout: clock.timecode(segment.end),
                tclevel: 1.0,
            })
            .collect();
        Self::build(id, "segments", entries, frames, clock, provenance, processor)
    }

    /// Builds an overlay timeline covering frames `[0, frames)`
    pub fn overlays(
        id: &str,
        overlays: &[Overlay],
        frames: usize,
        clock: &SessionClock,
        provenance: &Provenance,
        processor: &str,
    ) -> Self {
        let entries = overlays
            .iter()
            .map(|overlay| Entry::Overlay {
                label: overlay.label.clone(),
                tc: clock.timecode(overlay.frame),
                tclevel: 1.0,
                shape: Shape {
                    t: "rectangle",
                    c: Point {
                        x: overlay.centre.0,
                        y: overlay.centre.1,
                    },
                    rx: overlay.radius.0,
                    ry: overlay.radius.1,
                    o: 0.0,
                },
            })
            .collect();
        Self::build(id, "visual_tracking", entries, frames, clock, provenance, processor)
    }

    fn build(
        id: &str,
        kind: &'static str,
        entries: Vec<Entry>,
        frames: usize,
        clock: &SessionClock,
        provenance: &Provenance,
        processor: &str,
    ) -> Self {
        let suffix = if kind == "segments" { "segments" } else { "overlays" };
        Self {
            localisation: vec![Localisation {
                sublocalisations: Sublocalisations {
                    localisation: entries,
                },
                kind,
                tcin: clock.timecode(0),
                tcout: clock.timecode(frames),
                tclevel: 0.0,
            }],
            id: format!("{}-{}", id, suffix),
            kind,
            algorithm: provenance.algorithm.clone(),
            processor: processor.to_string(),
            source: provenance.source,
            rule: provenance.rule.clone(),
            version: TIMELINE_VERSION,
        }
    }

    pub fn len(&self) -> usize {
        self.localisation
            .first()
            .map_or(0, |l| l.sublocalisations.localisation.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the document as pretty-printed JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| EngineError::export(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| EngineError::export(path, e))?;
        log::info!("Exported {} entries to {:?}", self.len(), path);
        Ok(())
    }
}
