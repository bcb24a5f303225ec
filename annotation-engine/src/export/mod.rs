//! Export artifacts
//!
//! Every file a session writes goes through an [`ExportContext`], which knows the output
//! directory, the recording stem and the session clock:
//! - `<stem>+<a>+<b>.csv`: combined per-frame table of all extraction targets
//! - `<stem>_<name>.csv`: per-rule table
//! - `<stem>-<name>-segments.json` / `<stem>-<name>-overlays.json`: timelines

mod table;
mod timecode;
mod timeline;

pub use table::{observation_columns, quote_text, TableWriter};
pub use timecode::{frames_to_timecode, seconds_to_timecode, SessionClock};
pub use timeline::{Overlay, Provenance, Segment, SourceTag, TimelineDocument, TIMELINE_VERSION};

use std::path::{Path, PathBuf};

use crate::config::ExportConfig;
use crate::store::Track;
use crate::types::Result;

/// Radius, in normalised units, of overlays for point-like annotations
pub const POINT_RADIUS: f32 = 0.01;

/// Where and how a session writes its artifacts
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub dir: PathBuf,
    pub stem: String,
    pub clock: SessionClock,
    pub processor: String,
    pub config: ExportConfig,
}

impl ExportContext {
    pub fn new(
        dir: impl Into<PathBuf>,
        stem: impl Into<String>,
        clock: SessionClock,
        processor: impl Into<String>,
        config: ExportConfig,
    ) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            clock,
            processor: processor.into(),
            config,
        }
    }

    pub fn combined_table_path<S: AsRef<str>>(&self, names: &[S]) -> PathBuf {
        let mut file = self.stem.clone();
        for name in names {
            file.push('+');
            file.push_str(name.as_ref());
        }
        file.push_str(".csv");
        self.dir.join(file)
    }

    pub fn rule_table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", self.stem, name))
    }

    pub fn start_end_table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_{}StartEnd.csv", self.stem, name))
    }

    pub fn segments_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}-{}-segments.json", self.stem, name))
    }

    pub fn overlays_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}-{}-overlays.json", self.stem, name))
    }

    fn timeline_id(&self, name: &str) -> String {
        format!("{}-{}", self.stem, name)
    }

    /// Writes a segment timeline unless timelines are disabled
    pub fn write_segments(
        &self,
        name: &str,
        segments: &[Segment],
        frames: usize,
        provenance: &Provenance,
    ) -> Result<Option<PathBuf>> {
        if !self.config.timelines {
            return Ok(None);
        }
        let path = self.segments_path(name);
        TimelineDocument::segments(
            &self.timeline_id(name),
            segments,
            frames,
            &self.clock,
            provenance,
            &self.processor,
        )
        .write(&path)?;
        Ok(Some(path))
    }

    /// Writes an overlay timeline unless overlays are disabled
    pub fn write_overlays(
        &self,
        name: &str,
        overlays: &[Overlay],
        frames: usize,
        provenance: &Provenance,
    ) -> Result<Option<PathBuf>> {
        if !self.config.overlays {
            return Ok(None);
        }
        let path = self.overlays_path(name);
        TimelineDocument::overlays(
            &self.timeline_id(name),
            overlays,
            frames,
            &self.clock,
            provenance,
            &self.processor,
        )
        .write(&path)?;
        Ok(Some(path))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Half-open runs of consecutive `true` values
pub fn true_runs(gate: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (frame, on) in gate.iter().enumerate() {
        match (start, *on) {
            (None, true) => start = Some(frame),
            (Some(s), false) => {
                runs.push((s, frame));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, gate.len()));
    }
    runs
}

/// Half-open runs of identical, non-blank text values
pub fn text_runs(values: &[String]) -> Vec<(usize, usize, String)> {
    let mut runs: Vec<(usize, usize, String)> = Vec::new();
    for (frame, value) in values.iter().enumerate() {
        if crate::types::is_blank(value) {
            continue;
        }
        if let Some((_, end, text)) = runs.last_mut() {
            if *end == frame && text.as_str() == value.as_str() {
                *end = frame + 1;
                continue;
            }
        }
        runs.push((frame, frame + 1, value.clone()));
    }
    runs
}

/// Segments of a track: one per true run, labelled with the value at the run start
pub fn track_segments(track: &Track, threshold: f32, label: &str) -> Vec<Segment> {
    match &track.series {
        crate::store::Series::Text(values) => text_runs(values)
            .into_iter()
            .map(|(start, end, text)| Segment::new(start, end, text))
            .collect(),
        crate::store::Series::Numeric(_) => true_runs(&track.series.gate(track.len(), threshold))
            .into_iter()
            .map(|(start, end)| Segment::new(start, end, label))
            .collect(),
    }
}

/// One overlay per frame where the track is true, centred on the recorded position
///
/// `size` is the marked area in pixels (template size); point annotations use
/// [`POINT_RADIUS`]. Frames of unknown size yield no overlays.
pub fn track_overlays(
    track: &Track,
    threshold: f32,
    frame_size: (u32, u32),
    label: &str,
) -> Vec<Overlay> {
    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);
    if width <= 0.0 || height <= 0.0 {
        return Vec::new();
    }
    (0..track.len())
        .filter(|&frame| track.series.is_true_at(frame, threshold))
        .map(|frame| {
            let (x, y) = track.position_at(frame);
            let (centre, radius) = match track.size {
                Some((w, h)) => {
                    let (rx, ry) = (w as f32 / 2.0, h as f32 / 2.0);
                    (((x + rx) / width, (y + ry) / height), (rx / width, ry / height))
                }
                None => ((x / width, y / height), (POINT_RADIUS, POINT_RADIUS)),
            };
            Overlay {
                frame,
                centre,
                radius,
                label: label.to_string(),
            }
        })
        .collect()
}
