//! Annotation store
//!
//! Per-frame series keyed by annotation name. Series are append-only while a run is in
//! progress; derived series produced after the run are inserted whole. Every track also
//! keeps the `(x, y)` position recorded with each row so later rules can anchor search
//! regions on it.

use std::collections::{BTreeMap, BTreeSet};

use crate::expression::{Resolver, Value};
use crate::types::{is_blank, EngineError, Observation, Result, Sample, SeriesKind, BLANK};

/// Per-frame values of one annotation
#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    Numeric(Vec<f32>),
    Text(Vec<String>),
}

impl Series {
    pub fn empty(kind: SeriesKind) -> Self {
        match kind {
            SeriesKind::Numeric => Series::Numeric(Vec::new()),
            SeriesKind::Text => Series::Text(Vec::new()),
        }
    }

    pub fn kind(&self) -> SeriesKind {
        match self {
            Series::Numeric(_) => SeriesKind::Numeric,
            Series::Text(_) => SeriesKind::Text,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Series::Numeric(values) => values.len(),
            Series::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `frame`, or `None` past the end of the series
    pub fn sample_at(&self, frame: usize) -> Option<Sample> {
        match self {
            Series::Numeric(values) => values.get(frame).map(|v| Sample::Numeric(*v)),
            Series::Text(values) => values.get(frame).map(|s| Sample::Text(s.clone())),
        }
    }

    /// Gate used by triggers and guards: numeric above threshold, text not blank
    pub fn is_true_at(&self, frame: usize, threshold: f32) -> bool {
        match self {
            Series::Numeric(values) => values.get(frame).is_some_and(|v| *v > threshold),
            Series::Text(values) => values.get(frame).is_some_and(|s| !is_blank(s)),
        }
    }

    /// Per-frame gate over the first `frames` frames; frames past the end are false
    pub fn gate(&self, frames: usize, threshold: f32) -> Vec<bool> {
        (0..frames).map(|f| self.is_true_at(f, threshold)).collect()
    }

    /// Label of the value at `frame`: text as-is, numbers thresholded to `1`/`0`
    pub fn label_at(&self, frame: usize, threshold: f32) -> String {
        match self {
            Series::Numeric(values) => {
                let on = values.get(frame).is_some_and(|v| *v > threshold);
                let label = if on { "1" } else { "0" };
                label.to_string()
            }
            Series::Text(values) => values
                .get(frame)
                .cloned()
                .unwrap_or_else(|| BLANK.to_string()),
        }
    }

    fn push(&mut self, sample: Sample) -> std::result::Result<(), Sample> {
        match (self, sample) {
            (Series::Numeric(values), Sample::Numeric(v)) => values.push(v),
            (Series::Text(values), Sample::Text(s)) => values.push(s),
            (_, sample) => return Err(sample),
        }
        Ok(())
    }
}

/// Where a track came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Ingested from a previous run's export before this run started
    Logged,
    /// Computed frame by frame during this run
    Extracted,
    /// Produced after the run by a conversion rule or input hook analysis
    Derived,
}

/// One annotation: its series plus the per-frame positions
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub series: Series,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub origin: Origin,
    /// Template size in pixels, when the annotation is a template match
    pub size: Option<(u32, u32)>,
}

impl Track {
    pub fn new(kind: SeriesKind, origin: Origin) -> Self {
        Self {
            series: Series::empty(kind),
            x: Vec::new(),
            y: Vec::new(),
            origin,
            size: None,
        }
    }

    /// Builds a track from a complete series with zeroed positions
    pub fn from_series(series: Series, origin: Origin) -> Self {
        let len = series.len();
        Self {
            series,
            x: vec![0.0; len],
            y: vec![0.0; len],
            origin,
            size: None,
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Position at `frame`, zero past the end
    pub fn position_at(&self, frame: usize) -> (f32, f32) {
        (
            self.x.get(frame).copied().unwrap_or(0.0),
            self.y.get(frame).copied().unwrap_or(0.0),
        )
    }
}

/// Summary counts for a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub logged: usize,
    pub extracted: usize,
    pub derived: usize,
    pub longest: usize,
}

/// All annotations known to a session
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    tracks: BTreeMap<String, Track>,
    threshold: f32,
}

impl AnnotationStore {
    /// Create an empty store gating numeric values at `threshold`
    pub fn new(threshold: f32) -> Self {
        Self {
            tracks: BTreeMap::new(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Insert or replace a complete track
    pub fn insert(&mut self, name: impl Into<String>, track: Track) {
        let name = name.into();
        if let Some(previous) = self.tracks.get(&name) {
            log::debug!(
                "Replacing {:?} track '{}' with {:?} track",
                previous.origin,
                name,
                track.origin
            );
        }
        self.tracks.insert(name, track);
    }

    /// Start an empty track that will be appended to frame by frame
    pub fn begin(&mut self, name: impl Into<String>, kind: SeriesKind, origin: Origin) {
        self.insert(name, Track::new(kind, origin));
    }

    /// Append one row to an existing track
    pub fn append(&mut self, name: &str, observation: Observation) -> Result<()> {
        let track = self
            .tracks
            .get_mut(name)
            .ok_or_else(|| EngineError::Consistency(format!("no track named '{}'", name)))?;

        track.series.push(observation.sample).map_err(|sample| {
            EngineError::Consistency(format!(
                "cannot append {:?} to {:?} series '{}'",
                sample,
                track.series.kind(),
                name
            ))
        })?;
        track.x.push(observation.x);
        track.y.push(observation.y);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Track> {
        self.tracks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Track> {
        self.tracks.get_mut(name)
    }

    pub fn series(&self, name: &str) -> Option<&Series> {
        self.tracks.get(name).map(|t| &t.series)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tracks.contains_key(name)
    }

    /// Names of all tracks ingested before the run
    pub fn logged_names(&self) -> BTreeSet<String> {
        self.tracks
            .iter()
            .filter(|(_, t)| t.origin == Origin::Logged)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tracks.keys().map(String::as_str)
    }

    /// Gate value of `name` at `frame`; `None` if the name is unknown
    pub fn is_true_at(&self, name: &str, frame: usize) -> Option<bool> {
        self.series(name)
            .map(|series| series.is_true_at(frame, self.threshold))
    }

    /// Length of the longest track
    pub fn max_len(&self) -> usize {
        self.tracks.values().map(Track::len).max().unwrap_or(0)
    }

    /// Checks that the named tracks all hold exactly `expected` rows
    pub fn check_lockstep<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        expected: usize,
    ) -> Result<()> {
        for name in names {
            let len = self.get(name).map(Track::len).unwrap_or(0);
            if len != expected {
                return Err(EngineError::Consistency(format!(
                    "series '{}' holds {} rows after {} processed frames",
                    name, len, expected
                )));
            }
        }
        Ok(())
    }

    /// Checks that no two of the named tracks differ in length by more than one frame
    pub fn check_aligned<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut shortest: Option<(&str, usize)> = None;
        let mut longest: Option<(&str, usize)> = None;
        for name in names {
            let len = self.get(name).map(Track::len).unwrap_or(0);
            if shortest.map_or(true, |(_, l)| len < l) {
                shortest = Some((name, len));
            }
            if longest.map_or(true, |(_, l)| len > l) {
                longest = Some((name, len));
            }
        }
        if let (Some((short_name, short)), Some((long_name, long))) = (shortest, longest) {
            if long - short > 1 {
                return Err(EngineError::Consistency(format!(
                    "series '{}' has {} frames but '{}' has {}",
                    short_name, short, long_name, long
                )));
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            longest: self.max_len(),
            ..StoreStats::default()
        };
        for track in self.tracks.values() {
            match track.origin {
                Origin::Logged => stats.logged += 1,
                Origin::Extracted => stats.extracted += 1,
                Origin::Derived => stats.derived += 1,
            }
        }
        stats
    }
}

impl Resolver for AnnotationStore {
    fn resolve(&self, name: &str, frame: usize) -> Option<Value> {
        let series = self.series(name)?;
        Some(match series.sample_at(frame) {
            Some(Sample::Numeric(v)) => Value::Number(v as f64),
            Some(Sample::Text(s)) => Value::Text(s),
            None => match series.kind() {
                SeriesKind::Numeric => Value::Number(0.0),
                SeriesKind::Text => Value::Text(BLANK.to_string()),
            },
        })
    }
}
