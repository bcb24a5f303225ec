//! Session driver
//!
//! A [`Session`] owns everything that belongs to one recording: the annotation store,
//! the collaborators, the status surface and the abort token. It is created fresh for
//! each video stem and consumed by nothing else, so two sessions never share state.
//!
//! A run goes through these phases in order: compile, prepare templates, scan frames,
//! apply input hooks, derive intervals.

use chrono::NaiveDateTime;
use image::{imageops, GrayImage};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::derivation::{DerivationEngine, DerivationReport};
use crate::export::{
    track_overlays, track_segments, ExportContext, Provenance, Segment, SessionClock, SourceTag,
};
use crate::rules::{Action, CompiledRules, Rule, RuleCompiler, RuleKind, Test};
use crate::scheduler::{ScanReport, Scheduler, Stage};
use crate::sources::{
    typed_words, AccessibilitySource, FirstMinute, FrameSource, FrameSourceProvider, InputEvent,
    InputEventKind, InputEventSource, LoggedFile, TemplateMatcher, TextRecognizer,
};
use crate::status::{AbortToken, Phase, StatusHandle};
use crate::store::{AnnotationStore, Origin, Series, StoreStats, Track};
use crate::types::{EngineError, Result, BLANK};

/// External collaborators of a session; any of them may be absent
#[derive(Default)]
pub struct Collaborators {
    pub frames: Option<Box<dyn FrameSource>>,
    /// Opens other recordings, for template definitions
    pub provider: Option<Box<dyn FrameSourceProvider>>,
    pub matcher: Option<Box<dyn TemplateMatcher>>,
    pub recognizer: Option<Box<dyn TextRecognizer>>,
    pub accessibility: Option<Box<dyn AccessibilitySource>>,
    pub input_events: Option<Box<dyn InputEventSource>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(mut self, frames: impl FrameSource + 'static) -> Self {
        self.frames = Some(Box::new(frames));
        self
    }

    pub fn with_provider(mut self, provider: impl FrameSourceProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    pub fn with_matcher(mut self, matcher: impl TemplateMatcher + 'static) -> Self {
        self.matcher = Some(Box::new(matcher));
        self
    }

    pub fn with_recognizer(mut self, recognizer: impl TextRecognizer + 'static) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    pub fn with_accessibility(mut self, source: impl AccessibilitySource + 'static) -> Self {
        self.accessibility = Some(Box::new(source));
        self
    }

    pub fn with_input_events(mut self, source: impl InputEventSource + 'static) -> Self {
        self.input_events = Some(Box::new(source));
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("frames", &self.frames.is_some())
            .field("provider", &self.provider.is_some())
            .field("matcher", &self.matcher.is_some())
            .field("recognizer", &self.recognizer.is_some())
            .field("accessibility", &self.accessibility.is_some())
            .field("input_events", &self.input_events.is_some())
            .finish()
    }
}

/// Outcome of one session run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub stem: String,
    pub frames: usize,
    pub fps: f32,
    pub rules: usize,
    pub scan: ScanReport,
    pub hook_segments: usize,
    pub derivation: DerivationReport,
    /// Every file written, tables and timelines
    pub files: Vec<PathBuf>,
    pub aborted: bool,
    pub stats: StoreStats,
}

/// Recording stem of a video path: the file stem cut at the first `_`
pub fn recording_stem(video: &Path) -> String {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem.split_once('_') {
        Some((head, _)) => head.to_string(),
        None => stem.to_string(),
    }
}

/// All state of one recording
pub struct Session {
    config: EngineConfig,
    data_dir: PathBuf,
    stem: String,
    store: AnnotationStore,
    collaborators: Collaborators,
    first_minute: Option<FirstMinute>,
    status: StatusHandle,
    abort: AbortToken,
}

impl Session {
    /// Creates an empty session for one recording
    ///
    /// # Arguments
    /// * `config` - Engine configuration
    /// * `data_dir` - Directory holding templates and logged series
    /// * `video` - Path (or name) of the recording; only its stem is used
    pub fn new(config: EngineConfig, data_dir: impl Into<PathBuf>, video: &Path) -> Self {
        let stem = recording_stem(video);
        log::info!("New session for '{}'", stem);
        Self {
            store: AnnotationStore::new(config.threshold),
            config,
            data_dir: data_dir.into(),
            stem,
            collaborators: Collaborators::new(),
            first_minute: None,
            status: StatusHandle::new(),
            abort: AbortToken::new(),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn collaborators_mut(&mut self) -> &mut Collaborators {
        &mut self.collaborators
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    /// Handle for observing this session from another thread
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Token for aborting this session from another thread
    pub fn abort_token(&self) -> AbortToken {
        self.abort.clone()
    }

    fn output_dir(&self) -> PathBuf {
        self.config
            .output_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.clone())
    }

    /// Ingests one logged file before the run
    ///
    /// Annotation tables add logged series (template sizes are read from
    /// `<data>/<name>.png` when present); first-minute files refine the session clock.
    pub fn ingest_log(&mut self, path: &Path) -> Result<()> {
        self.status.set_phase(Phase::Ingesting);
        match LoggedFile::read(path, self.config.threshold)? {
            LoggedFile::Annotations(table) => {
                let names: Vec<String> = table.annotations.iter().map(|a| a.name.clone()).collect();
                for annotation in table.annotations {
                    let mut track = annotation.track;
                    let template = self.data_dir.join(format!("{}.png", annotation.name));
                    if template.exists() {
                        track.size = Some(image::image_dimensions(&template)?);
                    }
                    log::debug!(
                        "Logged '{}' ({:?}): {} frames",
                        annotation.name,
                        annotation.column,
                        track.len()
                    );
                    self.store.insert(annotation.name, track);
                }
                let logged = self.store.logged_names();
                self.store.check_aligned(logged.iter().map(String::as_str))?;
                log::info!("Ingested {} logged series from {:?}", names.len(), path);
            }
            LoggedFile::FirstMinute(first) => {
                log::info!(
                    "Recording started in minute {:02}:{:02} ({} frames)",
                    first.hour,
                    first.minute,
                    first.frames
                );
                self.first_minute = Some(first);
            }
        }
        Ok(())
    }

    /// Runs the whole pipeline over `rules`
    ///
    /// A fatal error sets the status to failed with progress `-1` and is returned;
    /// files already written stay on disk.
    pub fn run<S: AsRef<str>>(&mut self, rules: &[S]) -> Result<RunSummary> {
        match self.run_phases(rules) {
            Ok(summary) => {
                let message = format!(
                    "{}: {} frames, {} files",
                    self.stem,
                    summary.frames,
                    summary.files.len()
                );
                let phase = if summary.aborted {
                    Phase::Aborted
                } else {
                    Phase::Done
                };
                self.status.succeed(phase, message);
                Ok(summary)
            }
            Err(e) => {
                let phase = self.status.snapshot().phase;
                log::error!("Session '{}' failed while {}: {}", self.stem, phase, e);
                self.status.fail(phase, e.to_string());
                Err(e)
            }
        }
    }

    fn run_phases<S: AsRef<str>>(&mut self, rules: &[S]) -> Result<RunSummary> {
        self.status.set_phase(Phase::Compiling);
        let compiled = RuleCompiler::compile(rules, &self.store.logged_names())?;

        let (fps, frames, frame_size) = self.geometry()?;
        let mut clock = SessionClock::from_stem(&self.stem, fps);
        if let Some(first) = &self.first_minute {
            clock = clock.with_first_minute(first);
        }
        let out = self.output_dir();
        fs::create_dir_all(&out).map_err(|e| EngineError::export(&out, e))?;
        let ctx = ExportContext::new(
            out,
            self.stem.clone(),
            clock,
            self.config.processor.clone(),
            self.config.export.clone(),
        );
        log::info!(
            "Session '{}': {} frames at {} fps, {} rules",
            self.stem,
            frames,
            fps,
            compiled.rules.len()
        );

        let mut summary = RunSummary {
            stem: self.stem.clone(),
            frames,
            fps,
            rules: compiled.rules.len(),
            ..RunSummary::default()
        };

        if self.config.export.logged_timelines {
            summary.files.extend(self.export_logged(&ctx, frames, frame_size)?);
        }

        self.status.set_phase(Phase::Preparing);
        self.cut_templates(&compiled)?;
        let templates = self.load_templates(&compiled)?;

        let scheduler = Scheduler::new(
            &compiled,
            &self.config,
            &templates,
            &self.status,
            &self.abort,
        );
        summary.scan = scheduler.run(&mut self.store, &mut self.collaborators, frames, Some(&ctx))?;
        summary.files.extend(summary.scan.tables.iter().cloned());

        for target in scheduler.targets() {
            let Some(track) = self.store.get(&target.name) else {
                continue;
            };
            let (source, overlays) = match target.stage() {
                Stage::Accessibility => (SourceTag::Accessibility, false),
                Stage::Template => (SourceTag::ComputerVision, true),
                Stage::Text(_) => (SourceTag::ComputerVision, false),
            };
            let rule = target.rule.map_or_else(|| target.name.clone(), Rule::label);
            let provenance = Provenance::new(rule, target.action.as_str(), source);
            let segments = track_segments(track, self.config.threshold, &target.name);
            summary.files.extend(ctx.write_segments(&target.name, &segments, frames, &provenance)?);
            if overlays {
                let marks = track_overlays(track, self.config.threshold, frame_size, &target.name);
                summary.files.extend(ctx.write_overlays(&target.name, &marks, frames, &provenance)?);
            }
        }

        if summary.scan.aborted {
            log::warn!("Session '{}' aborted; skipping hooks and derivation", self.stem);
            summary.aborted = true;
            summary.stats = self.store.stats();
            return Ok(summary);
        }

        self.status.set_phase(Phase::InputHooks);
        let (hook_segments, hook_files) = self.apply_input_hooks(&compiled, &ctx, frames, frame_size)?;
        summary.hook_segments = hook_segments;
        summary.files.extend(hook_files);

        let derivation = DerivationEngine::new(&self.config, &self.status);
        summary.derivation = derivation.run(&mut self.store, &compiled, frames, Some(&ctx))?;
        summary.files.extend(summary.derivation.files.iter().cloned());

        self.status.set_progress(1.0);
        summary.stats = self.store.stats();
        log::info!(
            "Session '{}' done: {} frames, {} derived segments, {} files",
            self.stem,
            summary.frames,
            summary.derivation.segments,
            summary.files.len()
        );
        Ok(summary)
    }

    /// Frame rate, frame count and frame size of the session
    fn geometry(&self) -> Result<(f32, usize, (u32, u32))> {
        match self.collaborators.frames.as_deref() {
            Some(source) => Ok((source.fps(), source.frame_count(), source.dimensions())),
            None => {
                let fps = self.config.fps.ok_or_else(|| {
                    EngineError::InvalidInput(
                        "no frame source and no fallback frame rate configured".to_string(),
                    )
                })?;
                Ok((fps, self.store.max_len(), (0, 0)))
            }
        }
    }

    fn export_logged(
        &self,
        ctx: &ExportContext,
        frames: usize,
        frame_size: (u32, u32),
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for name in self.store.logged_names() {
            let Some(track) = self.store.get(&name) else {
                continue;
            };
            let provenance = Provenance::new(name.clone(), "logged", SourceTag::ComputerVision);
            let segments = track_segments(track, self.config.threshold, &name);
            files.extend(ctx.write_segments(&name, &segments, frames, &provenance)?);
            if track.size.is_some() {
                let marks = track_overlays(track, self.config.threshold, frame_size, &name);
                files.extend(ctx.write_overlays(&name, &marks, frames, &provenance)?);
            }
        }
        Ok(files)
    }

    /// Cuts every `template(...)` definition out of its source recording
    fn cut_templates(&self, compiled: &CompiledRules) -> Result<()> {
        let definitions: Vec<&Rule> = compiled
            .of_kind(RuleKind::Extraction)
            .filter(|rule| rule.action == Action::Template)
            .collect();
        for rule in definitions {
            let name = rule.name.as_deref().unwrap_or_default();
            let path = self.data_dir.join(format!("{}.png", name));
            let Some(provider) = self.collaborators.provider.as_deref() else {
                if path.exists() {
                    log::debug!("No frame source provider; reusing {:?}", path);
                    continue;
                }
                return Err(EngineError::MissingCollaborator(format!(
                    "template '{}' must be cut from a recording, but no frame source provider is attached",
                    name
                )));
            };
            let image = cut_template(provider, &self.data_dir, rule)?;
            image.save(&path).map_err(|e| EngineError::Template {
                name: name.to_string(),
                reason: format!("cannot save {:?}: {}", path, e),
            })?;
            log::info!(
                "Cut template '{}' ({}x{}) to {:?}",
                name,
                image.width(),
                image.height(),
                path
            );
        }
        Ok(())
    }

    fn load_templates(&self, compiled: &CompiledRules) -> Result<BTreeMap<String, GrayImage>> {
        let mut templates = BTreeMap::new();
        for name in &compiled.templates {
            let path = self.data_dir.join(format!("{}.png", name));
            if !path.exists() {
                continue;
            }
            let image = image::open(&path)?.to_luma8();
            log::debug!(
                "Loaded template '{}' ({}x{})",
                name,
                image.width(),
                image.height()
            );
            templates.insert(name.clone(), image);
        }
        Ok(templates)
    }

    fn apply_input_hooks(
        &mut self,
        compiled: &CompiledRules,
        ctx: &ExportContext,
        frames: usize,
        frame_size: (u32, u32),
    ) -> Result<(usize, Vec<PathBuf>)> {
        let rules: Vec<&Rule> = compiled.of_kind(RuleKind::InputHook).collect();
        if rules.is_empty() {
            return Ok((0, Vec::new()));
        }
        let source = self.collaborators.input_events.as_deref_mut().ok_or_else(|| {
            EngineError::MissingCollaborator(
                "input hook rules need an input event source".to_string(),
            )
        })?;
        let events = source.events()?;
        if ctx.clock.start.is_none() {
            log::warn!(
                "Recording start of '{}' unknown; input events cannot be placed on frames",
                self.stem
            );
        }

        let mut segments_total = 0;
        let mut files = Vec::new();
        for rule in rules {
            let name = rule.variables[0].clone();
            let gate = match (rule.test, rule.dependencies.first()) {
                (Some(Test::During), Some(guard)) => Some(
                    self.store
                        .series(guard)
                        .ok_or_else(|| EngineError::UnresolvedDependency {
                            rule: rule.source.clone(),
                            name: guard.clone(),
                        })?
                        .gate(frames, self.config.threshold),
                ),
                _ => None,
            };
            let allowed = |frame: usize| gate.as_ref().map_or(true, |g| g.get(frame) == Some(&true));

            let (track, segments) = match rule.action {
                Action::TypedWords => typed_word_track(&events, &ctx.clock, frames, &allowed),
                Action::MouseClicks => {
                    let track = click_track(&events, &ctx.clock, frames, &allowed);
                    let segments = track_segments(&track, self.config.threshold, &name);
                    (track, segments)
                }
                other => {
                    return Err(EngineError::InvalidInput(format!(
                        "'{}' is not an input hook action",
                        other
                    )))
                }
            };
            log::info!("Input hook '{}' ({}): {} segments", name, rule.action, segments.len());

            let provenance = Provenance::new(rule.label(), rule.action.as_str(), SourceTag::InputHook);
            files.extend(ctx.write_segments(&name, &segments, frames, &provenance)?);
            if rule.action == Action::MouseClicks {
                let marks = track_overlays(&track, self.config.threshold, frame_size, &name);
                files.extend(ctx.write_overlays(&name, &marks, frames, &provenance)?);
            }
            segments_total += segments.len();
            self.store.insert(name, track);
        }
        Ok((segments_total, files))
    }
}

fn template_error(rule: &Rule, reason: impl Into<String>) -> EngineError {
    EngineError::Template {
        name: rule.label(),
        reason: reason.into(),
    }
}

/// Opens the recording named by a `template(x,y,w,h,source,seconds)` rule and crops it
fn cut_template(provider: &dyn FrameSourceProvider, data_dir: &Path, rule: &Rule) -> Result<GrayImage> {
    let number = |i: usize| -> Result<f32> {
        rule.variables[i]
            .parse::<f32>()
            .map_err(|_| template_error(rule, format!("'{}' is not a number", rule.variables[i])))
    };
    let (x, y, w, h) = (number(0)?, number(1)?, number(2)?, number(3)?);
    let seconds = number(5)?;

    let mut source = provider.open(&data_dir.join(&rule.variables[4]))?;
    let frame = (seconds * source.fps()).round().max(0.0) as usize;
    if !source.seek(frame) {
        return Err(template_error(rule, format!("cannot seek to frame {}", frame)));
    }
    let decoded = source
        .read()
        .ok_or_else(|| template_error(rule, format!("cannot decode frame {}", frame)))?;

    let gray = imageops::grayscale(&decoded.image);
    let (width, height) = (gray.width() as f32, gray.height() as f32);
    let rect = crate::types::Rect::new(
        (x * width).round() as i64,
        (y * height).round() as i64,
        (w * width).round() as i64,
        (h * height).round() as i64,
    );
    let clamped = rect
        .clamp_to(gray.width(), gray.height())
        .ok_or_else(|| template_error(rule, format!("region {} lies outside the frame", rect)))?;
    Ok(imageops::crop_imm(
        &gray,
        clamped.x as u32,
        clamped.y as u32,
        clamped.width as u32,
        clamped.height as u32,
    )
    .to_image())
}

fn event_frame(clock: &SessionClock, time: NaiveDateTime, frames: usize) -> Option<usize> {
    clock.frame_at(time).filter(|&frame| frame < frames)
}

/// Text series of typed words, one segment per word
fn typed_word_track(
    events: &[InputEvent],
    clock: &SessionClock,
    frames: usize,
    allowed: &dyn Fn(usize) -> bool,
) -> (Track, Vec<Segment>) {
    let mut values = vec![BLANK.to_string(); frames];
    let mut segments = Vec::new();
    for word in typed_words(events) {
        let Some(start) = event_frame(clock, word.start, frames) else {
            continue;
        };
        if !allowed(start) {
            continue;
        }
        let end = event_frame(clock, word.end, frames).map_or(frames, |f| f + 1).max(start + 1);
        for slot in &mut values[start..end] {
            slot.clone_from(&word.text);
        }
        segments.push(Segment::new(start, end, word.text));
    }
    (Track::from_series(Series::Text(values), Origin::Extracted), segments)
}

/// Pulse series of mouse clicks with click positions
fn click_track(
    events: &[InputEvent],
    clock: &SessionClock,
    frames: usize,
    allowed: &dyn Fn(usize) -> bool,
) -> Track {
    let mut track = Track::from_series(Series::Numeric(vec![0.0; frames]), Origin::Extracted);
    for event in events {
        let InputEventKind::MouseClicked { x, y, .. } = event.kind else {
            continue;
        };
        let Some(frame) = event_frame(clock, event.time, frames) else {
            continue;
        };
        if !allowed(frame) {
            continue;
        }
        if let Series::Numeric(values) = &mut track.series {
            values[frame] = 1.0;
        }
        track.x[frame] = x;
        track.y[frame] = y;
    }
    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::{CallLog, MockFrames, MockMatcher};
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 3, 15)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    struct FixedEvents(Vec<InputEvent>);

    impl InputEventSource for FixedEvents {
        fn events(&mut self) -> Result<Vec<InputEvent>> {
            Ok(self.0.clone())
        }
    }

    fn key(time: NaiveDateTime, kind: InputEventKind) -> InputEvent {
        InputEvent { time, kind }
    }

    #[test]
    fn test_recording_stem() {
        assert_eq!(
            recording_stem(Path::new("/v/lecture-2016-03-15-14-00-00_screen.mp4")),
            "lecture-2016-03-15-14-00-00"
        );
        assert_eq!(recording_stem(Path::new("plain.avi")), "plain");
    }

    #[test]
    fn test_ingest_log_and_derive_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("rec_logo.csv");
        fs::write(
            &log,
            "\"Frame\",\"logo_x\",\"logo_y\",\"logo_val\"\n0,0,0,0\n1,0,0,0.995\n2,0,0,1\n3,0,0,0\n",
        )
        .unwrap();

        let config = EngineConfig::default().with_fps(10.0);
        let mut session = Session::new(config, dir.path(), Path::new("rec.mp4"));
        session.ingest_log(&log).unwrap();
        let summary = session.run(&["during(logo){shown=eval(True)}"]).unwrap();

        assert_eq!(summary.frames, 4);
        assert_eq!(summary.derivation.segments, 1);
        assert!(dir.path().join("rec-shown-segments.json").exists());
        assert!(dir.path().join("rec-logo-segments.json").exists());
        assert_eq!(session.status().snapshot().phase, Phase::Done);
    }

    #[test]
    fn test_missing_frame_rate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(EngineConfig::default(), dir.path(), Path::new("rec.mp4"));
        let result = session.run(&["x=eval(True)"]);
        assert_matches!(result, Err(EngineError::InvalidInput(_)));

        let status = session.status().snapshot();
        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.progress, -1.0);
    }

    #[test]
    fn test_compile_error_reported_in_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default().with_fps(10.0);
        let mut session = Session::new(config, dir.path(), Path::new("rec.mp4"));
        assert_matches!(session.run(&["if(a){explode(b)}"]), Err(EngineError::Compile(_)));
        let status = session.status().snapshot();
        assert!(status.last_error.unwrap().starts_with("compiling"));
    }

    #[test]
    fn test_template_scan_writes_overlays() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::new(4, 4).save(dir.path().join("logo.png")).unwrap();
        let calls = CallLog::default();
        let collaborators = Collaborators::new()
            .with_frames(MockFrames::new(3, &calls))
            .with_matcher(MockMatcher::new(&[(1, 0.995)], &calls));

        let mut session = Session::new(EngineConfig::default(), dir.path(), Path::new("rec.mp4"))
            .with_collaborators(collaborators);
        let summary = session.run(&["matchTemplate(logo)"]).unwrap();

        assert_eq!(summary.scan.frames_processed, 3);
        assert!(dir.path().join("rec+logo.csv").exists());
        let overlays: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("rec-logo-overlays.json")).unwrap(),
        )
        .unwrap();
        let entries = &overlays["localisation"][0]["sublocalisations"]["localisation"];
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(overlays["source"], "computer_vision");
    }

    #[test]
    fn test_missing_template_image() {
        let dir = tempfile::tempdir().unwrap();
        let calls = CallLog::default();
        let collaborators = Collaborators::new()
            .with_frames(MockFrames::new(3, &calls))
            .with_matcher(MockMatcher::new(&[], &calls));
        let mut session = Session::new(EngineConfig::default(), dir.path(), Path::new("rec.mp4"))
            .with_collaborators(collaborators);
        assert_matches!(
            session.run(&["matchTemplate(logo)"]),
            Err(EngineError::Template { .. })
        );
    }

    #[test]
    fn test_template_definition_is_cut() {
        struct Provider(CallLog);
        impl FrameSourceProvider for Provider {
            fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
                Ok(Box::new(MockFrames::new(20, &self.0)))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let calls = CallLog::default();
        let collaborators = Collaborators::new()
            .with_frames(MockFrames::new(2, &calls))
            .with_provider(Provider(calls.clone()))
            .with_matcher(MockMatcher::new(&[], &calls));
        let mut session = Session::new(EngineConfig::default(), dir.path(), Path::new("rec.mp4"))
            .with_collaborators(collaborators);

        session
            .run(&["logo=template(0.25,0.25,0.5,0.5,other.mp4,1)", "matchTemplate(logo)"])
            .unwrap();
        let template = image::open(dir.path().join("logo.png")).unwrap().to_luma8();
        assert_eq!(template.dimensions(), (32, 24));
        // Frame 10 at 10 fps has grey level 10
        assert_eq!(template.get_pixel(0, 0).0, [10]);
    }

    #[test]
    fn test_input_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let events = vec![
            key(at(14, 0, 0, 100), InputEventKind::KeyPressed { keycode: 30 }),
            key(at(14, 0, 0, 110), InputEventKind::KeyTyped { keychar: 'h' }),
            key(at(14, 0, 0, 310), InputEventKind::KeyTyped { keychar: 'i' }),
            key(at(14, 0, 0, 400), InputEventKind::MouseClicked { x: 5.0, y: 6.0, button: 1 }),
            key(at(13, 59, 0, 0), InputEventKind::MouseClicked { x: 1.0, y: 1.0, button: 1 }),
        ];
        let config = EngineConfig::default().with_fps(10.0);
        let collaborators = Collaborators::new().with_input_events(FixedEvents(events));
        let mut session = Session::new(
            config,
            dir.path(),
            Path::new("rec-2016-03-15-14-00-00.mp4"),
        )
        .with_collaborators(collaborators);

        // The session is 6 frames long through a logged series
        let log = dir.path().join("log.csv");
        fs::write(&log, "Frame,on_x,on_y,on_val\n0,0,0,1\n1,0,0,1\n2,0,0,1\n3,0,0,1\n4,0,0,1\n5,0,0,0\n").unwrap();
        session.ingest_log(&log).unwrap();

        let summary = session
            .run(&["typedWords(typed)", "during(on){mouseClicks(clicks)}"])
            .unwrap();
        assert_eq!(summary.hook_segments, 2);

        let typed = session.store().series("typed").unwrap();
        assert_eq!(
            typed,
            &Series::Text(
                [" ", "hi", "hi", "hi", " ", " "]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            )
        );
        let clicks = session.store().get("clicks").unwrap();
        assert_eq!(clicks.series, Series::Numeric(vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0]));
        assert_eq!(clicks.position_at(4), (5.0, 6.0));
    }

    #[test]
    fn test_abort_skips_derivation() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::new(4, 4).save(dir.path().join("logo.png")).unwrap();
        let calls = CallLog::default();
        let collaborators = Collaborators::new()
            .with_frames(MockFrames::new(5, &calls))
            .with_matcher(MockMatcher::new(&[], &calls));
        let mut session = Session::new(EngineConfig::default(), dir.path(), Path::new("rec.mp4"))
            .with_collaborators(collaborators);
        session.abort_token().abort();

        let summary = session
            .run(&["matchTemplate(logo)", "during(logo){seen=eval(True)}"])
            .unwrap();
        assert!(summary.aborted);
        assert_eq!(summary.derivation.rules, 0);
        assert!(session.store().get("seen").is_none());
        assert_eq!(session.status().snapshot().phase, Phase::Aborted);
    }
}
