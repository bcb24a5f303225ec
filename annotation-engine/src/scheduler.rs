//! Frame-incremental scheduler
//!
//! Drives per-frame extraction once over a session. For every frame the scheduler
//! evaluates each target's trigger, decodes the frame only when some triggered target
//! needs pixels, calls the recognition primitives and appends exactly one row per target
//! to the annotation store (a default row when the target is not triggered or the frame
//! could not be decoded).
//!
//! Within a frame, targets are computed in dependency order: a target gated on another
//! target produced in this run always sees that target's value for the same frame.
//! Targets that do not depend on each other go template matches first, then text
//! recognition, then accessibility snapshots.
//!
//! The scheduler publishes its per-frame state (`Scanning`, `Computing`, `Defaulting`,
//! `Advancing`) on the session's [`StatusHandle`].

use image::{imageops, GrayImage, Luma};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::export::{observation_columns, ExportContext, TableWriter};
use crate::rules::{Action, CompiledRules, DependencyGraph, Rule, RuleKind, Test};
use crate::session::Collaborators;
use crate::sources::{AxElement, CharsetHint, FrameSource};
use crate::status::{AbortToken, Phase, StatusHandle, WarningCounter};
use crate::store::{AnnotationStore, Origin};
use crate::types::{EngineError, Observation, Rect, Result, Sample, SeriesKind, BLANK};

/// Grey level separating ink from background when binarising text regions
const BINARIZE_LEVEL: u8 = 127;

/// Which pass of a frame computes a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Template,
    Text(CharsetHint),
    Accessibility,
}

/// One per-frame annotation the scheduler produces
#[derive(Debug, Clone)]
pub struct Target<'r> {
    pub name: String,
    pub action: Action,
    /// Producing rule; `None` for auto-registered templates
    pub rule: Option<&'r Rule>,
}

impl Stage {
    /// Tie-break between targets that are ready at the same time
    fn rank(&self) -> u8 {
        match self {
            Stage::Template => 0,
            Stage::Text(_) => 1,
            Stage::Accessibility => 2,
        }
    }
}

impl Target<'_> {
    pub fn stage(&self) -> Stage {
        match self.action {
            Action::DetectText => Stage::Text(CharsetHint::Alphabetic),
            Action::DetectNumber => Stage::Text(CharsetHint::Digits),
            Action::DetectTime => Stage::Text(CharsetHint::Time),
            Action::AccessibilityHover | Action::AccessibilityFocus => Stage::Accessibility,
            _ => Stage::Template,
        }
    }

    pub fn kind(&self) -> SeriesKind {
        self.action.series_kind()
    }

    fn test(&self) -> Option<Test> {
        self.rule.and_then(|rule| rule.test)
    }

    fn needs_frames(&self) -> bool {
        self.stage() != Stage::Accessibility
    }
}

/// Collects the per-frame targets of a compiled rule set in registration order
///
/// Auto-registered templates come first: nothing constrains them and rules in the set
/// depend on them.
pub fn collect_targets(compiled: &CompiledRules) -> Vec<Target<'_>> {
    let mut targets: Vec<Target<'_>> = compiled
        .templates
        .iter()
        .filter(|name| compiled.is_auto_registered(name))
        .map(|name| Target {
            name: name.clone(),
            action: Action::MatchTemplate,
            rule: None,
        })
        .collect();

    for rule in &compiled.rules {
        let per_frame = matches!(rule.kind, RuleKind::Extraction | RuleKind::Accessibility);
        if !per_frame || rule.action == Action::Template {
            continue;
        }
        for variable in &rule.variables {
            targets.push(Target {
                name: variable.clone(),
                action: rule.action,
                rule: Some(rule),
            });
        }
    }
    targets
}

/// Order in which the targets of a frame are computed
///
/// Every target comes after the targets among its `new` predecessors. Among targets
/// that are ready together, the stage rank and then registration order decide.
pub fn processing_order(targets: &[Target<'_>], graph: &DependencyGraph) -> Vec<usize> {
    let index: BTreeMap<&str, usize> = targets
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); targets.len()];
    let mut waiting = vec![0usize; targets.len()];
    for (i, target) in targets.iter().enumerate() {
        let Some(predecessors) = graph.predecessors(&target.name) else {
            continue;
        };
        for name in &predecessors.new {
            if let Some(&producer) = index.get(name.as_str()) {
                dependents[producer].push(i);
                waiting[i] += 1;
            }
        }
    }

    let mut ready: BTreeSet<(u8, usize)> = (0..targets.len())
        .filter(|&i| waiting[i] == 0)
        .map(|i| (targets[i].stage().rank(), i))
        .collect();
    let mut order = Vec::with_capacity(targets.len());
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            waiting[dependent] -= 1;
            if waiting[dependent] == 0 {
                ready.insert((targets[dependent].stage().rank(), dependent));
            }
        }
    }

    // Cycles are rejected by the compiler; anything left keeps registration order
    let rest: Vec<usize> = (0..targets.len()).filter(|i| !order.contains(i)).collect();
    order.extend(rest);
    order
}

/// Position of the scheduler in the session
///
/// `target_frame` is the row being finalised; logged series are read at the same row.
/// `last_decoded_frame` records where the frame source stands, so a seek is only issued
/// when the frame to decode does not directly follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameCursor {
    pub target_frame: usize,
    pub last_decoded_frame: Option<usize>,
    /// A failed seek or read leaves the source position unknown
    source_lost: bool,
}

impl FrameCursor {
    pub fn new() -> Self {
        Self::default()
    }

    fn needs_seek(&self) -> bool {
        let next = self.last_decoded_frame.map_or(0, |frame| frame + 1);
        self.source_lost || next != self.target_frame
    }

    fn advance(&mut self) {
        self.target_frame += 1;
    }
}

/// Decode state of the frame being processed
enum Decoded {
    NotAttempted,
    Ready(GrayImage),
    Failed,
}

/// Counters collected while scanning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub frames_processed: usize,
    pub decoded: usize,
    pub seeks: usize,
    pub decode_failures: usize,
    /// Frames where no target was triggered
    pub idle_frames: usize,
    pub aborted: bool,
    pub tables: Vec<PathBuf>,
}

struct Tables {
    combined: TableWriter,
    per_target: Vec<TableWriter>,
}

impl Tables {
    fn create(ctx: &ExportContext, targets: &[Target<'_>]) -> Result<Self> {
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        let mut header = vec!["Frame".to_string()];
        let mut per_target = Vec::with_capacity(targets.len());
        for target in targets {
            let columns = observation_columns(&target.name, target.action.value_suffix());
            header.extend(columns.iter().cloned());

            let mut own = vec!["Frame".to_string()];
            own.extend(columns);
            per_target.push(TableWriter::create(&ctx.rule_table_path(&target.name), &own)?);
        }
        let combined = TableWriter::create(&ctx.combined_table_path(&names), &header)?;
        Ok(Self {
            combined,
            per_target,
        })
    }

    fn write(&mut self, frame: usize, row: &[Observation]) -> Result<()> {
        self.combined.write_observations(frame, row)?;
        for (table, observation) in self.per_target.iter_mut().zip(row) {
            table.write_observations(frame, std::slice::from_ref(observation))?;
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<PathBuf>> {
        let mut paths = vec![self.combined.finish()?];
        for table in self.per_target {
            paths.push(table.finish()?);
        }
        Ok(paths)
    }
}

/// Runs the per-frame extraction of one session
pub struct Scheduler<'a> {
    compiled: &'a CompiledRules,
    config: &'a EngineConfig,
    templates: &'a BTreeMap<String, GrayImage>,
    status: &'a StatusHandle,
    abort: &'a AbortToken,
    targets: Vec<Target<'a>>,
    /// Indices into `targets`, producers first
    order: Vec<usize>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        compiled: &'a CompiledRules,
        config: &'a EngineConfig,
        templates: &'a BTreeMap<String, GrayImage>,
        status: &'a StatusHandle,
        abort: &'a AbortToken,
    ) -> Self {
        let targets = collect_targets(compiled);
        let order = processing_order(&targets, &compiled.graph);
        Self {
            compiled,
            config,
            templates,
            status,
            abort,
            targets,
            order,
        }
    }

    pub fn targets(&self) -> &[Target<'a>] {
        &self.targets
    }

    /// Checks that every collaborator the targets need is present
    pub fn check_collaborators(&self, collaborators: &Collaborators) -> Result<()> {
        let needs = |stage: fn(Stage) -> bool| self.targets.iter().any(|t| stage(t.stage()));
        if self.targets.iter().any(Target::needs_frames) && collaborators.frames.is_none() {
            return Err(EngineError::MissingCollaborator(
                "extraction rules need a frame source".to_string(),
            ));
        }
        if needs(|s| s == Stage::Template) && collaborators.matcher.is_none() {
            return Err(EngineError::MissingCollaborator(
                "template rules need a template matcher".to_string(),
            ));
        }
        if needs(|s| matches!(s, Stage::Text(_))) && collaborators.recognizer.is_none() {
            return Err(EngineError::MissingCollaborator(
                "text rules need a text recogniser".to_string(),
            ));
        }
        if needs(|s| s == Stage::Accessibility) && collaborators.accessibility.is_none() {
            return Err(EngineError::MissingCollaborator(
                "accessibility rules need an accessibility snapshot source".to_string(),
            ));
        }
        for target in self.targets.iter().filter(|t| t.stage() == Stage::Template) {
            if !self.templates.contains_key(&target.name) {
                return Err(EngineError::Template {
                    name: target.name.clone(),
                    reason: "template image not loaded".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Processes frames `0..frames`, appending one row per target per frame
    ///
    /// # Arguments
    /// * `store` - Annotation store receiving the rows
    /// * `collaborators` - Frame source and recognition primitives
    /// * `frames` - Number of frames in the session
    /// * `export` - Where per-frame tables go; `None` writes no tables
    ///
    /// # Returns
    /// * `Result<ScanReport>` - Counters for the run; fatal errors abort the run
    pub fn run(
        &self,
        store: &mut AnnotationStore,
        collaborators: &mut Collaborators,
        frames: usize,
        export: Option<&ExportContext>,
    ) -> Result<ScanReport> {
        self.check_collaborators(collaborators)?;

        let mut report = ScanReport::default();
        if self.targets.is_empty() {
            log::info!("No per-frame targets; skipping frame scan");
            return Ok(report);
        }

        for target in &self.targets {
            store.begin(target.name.clone(), target.kind(), Origin::Extracted);
            if let Some(template) = self.templates.get(&target.name) {
                if let Some(track) = store.get_mut(&target.name) {
                    track.size = Some(template.dimensions());
                }
            }
        }

        let mut tables = match export {
            Some(ctx) if ctx.config.tables => Some(Tables::create(ctx, &self.targets)?),
            _ => None,
        };

        let mut warnings: Vec<WarningCounter> = self
            .targets
            .iter()
            .map(|t| {
                WarningCounter::new(format!("target '{}'", t.name), self.config.max_warnings)
                    .with_status(self.status)
            })
            .collect();

        log::info!(
            "Scanning {} frames for {} targets",
            frames,
            self.targets.len()
        );
        let mut cursor = FrameCursor::new();
        while cursor.target_frame < frames {
            if self.abort.is_aborted() {
                log::warn!("Abort requested at frame {}", cursor.target_frame);
                report.aborted = true;
                break;
            }

            let row = self.process_frame(&mut cursor, store, collaborators, &mut warnings, &mut report)?;
            if let Some(tables) = tables.as_mut() {
                tables.write(cursor.target_frame, &row)?;
            }

            store.check_lockstep(
                self.targets.iter().map(|t| t.name.as_str()),
                cursor.target_frame + 1,
            )?;

            log::trace!("Frame {}: advancing", cursor.target_frame);
            self.status.set_phase(Phase::Advancing);
            cursor.advance();
            report.frames_processed = cursor.target_frame;
            self.status
                .set_progress(cursor.target_frame as f32 / frames as f32);
        }

        if let Some(tables) = tables {
            report.tables = tables.finish()?;
        }

        log::info!(
            "Scanned {} frames: {} decoded, {} seeks, {} decode failures, {} idle",
            report.frames_processed,
            report.decoded,
            report.seeks,
            report.decode_failures,
            report.idle_frames
        );
        Ok(report)
    }

    fn process_frame(
        &self,
        cursor: &mut FrameCursor,
        store: &mut AnnotationStore,
        collaborators: &mut Collaborators,
        warnings: &mut [WarningCounter],
        report: &mut ScanReport,
    ) -> Result<Vec<Observation>> {
        let frame = cursor.target_frame;
        let mut decoded = Decoded::NotAttempted;
        let mut row: Vec<Option<Observation>> = vec![None; self.targets.len()];
        let mut triggered_any = false;

        log::trace!("Frame {}: scanning", frame);
        self.status.set_phase(Phase::Scanning);
        for &index in &self.order {
            let target = &self.targets[index];
            let observation = if self.is_triggered(target, store, cursor)? {
                triggered_any = true;
                log::trace!("Frame {}: computing '{}'", frame, target.name);
                self.status.set_phase(Phase::Computing);
                self.compute(
                    target,
                    store,
                    collaborators,
                    cursor,
                    &mut decoded,
                    &mut warnings[index],
                    report,
                )?
            } else {
                None
            };

            let observation = match observation {
                Some(observation) => observation,
                None => {
                    log::trace!("Frame {}: defaulting '{}'", frame, target.name);
                    self.status.set_phase(Phase::Defaulting);
                    Observation::default_for(target.kind())
                }
            };
            store.append(&target.name, observation.clone())?;
            row[index] = Some(observation);
        }

        if !triggered_any {
            report.idle_frames += 1;
        }
        Ok(row
            .into_iter()
            .zip(&self.targets)
            .map(|(o, t)| o.unwrap_or_else(|| Observation::default_for(t.kind())))
            .collect())
    }

    /// Trigger of a target at the cursor
    ///
    /// `inrect` rules and unconstrained targets always fire. Otherwise every predecessor,
    /// logged or computed earlier in this frame, must be true at the target frame.
    fn is_triggered(
        &self,
        target: &Target<'_>,
        store: &AnnotationStore,
        cursor: &FrameCursor,
    ) -> Result<bool> {
        if target.test() == Some(Test::InRect) || self.compiled.graph.is_unconstrained(&target.name) {
            return Ok(true);
        }
        let Some(predecessors) = self.compiled.graph.predecessors(&target.name) else {
            return Ok(true);
        };

        let frame = cursor.target_frame;
        for name in &predecessors.logged {
            match store.is_true_at(name, frame) {
                Some(true) => {}
                Some(false) => return Ok(false),
                None => return Err(unresolved(target, name)),
            }
        }

        for name in &predecessors.new {
            let track = store.get(name).ok_or_else(|| unresolved(target, name))?;
            if !track.series.is_true_at(frame, store.threshold()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn compute(
        &self,
        target: &Target<'_>,
        store: &AnnotationStore,
        collaborators: &mut Collaborators,
        cursor: &mut FrameCursor,
        decoded: &mut Decoded,
        warnings: &mut WarningCounter,
        report: &mut ScanReport,
    ) -> Result<Option<Observation>> {
        if target.stage() == Stage::Accessibility {
            return Ok(self.snapshot_element(target, collaborators, cursor.target_frame)
                .map(|e| Observation::new(e.x, e.y, Sample::Text(e.text().to_string()))));
        }

        if let Decoded::NotAttempted = decoded {
            let Some(source) = collaborators.frames.as_deref_mut() else {
                return Err(EngineError::MissingCollaborator("frame source".to_string()));
            };
            *decoded = match decode(source, cursor, report) {
                Ok(image) => Decoded::Ready(image),
                Err(e) => {
                    // Also recorded as the session's last error
                    warnings.warn(e);
                    report.decode_failures += 1;
                    Decoded::Failed
                }
            };
        }
        let image = match decoded {
            Decoded::Ready(image) => &*image,
            Decoded::Failed => return Ok(None),
            Decoded::NotAttempted => return Ok(None),
        };

        let Some(region) = self.search_region(target, store, cursor, image.dimensions())? else {
            log::debug!(
                "Frame {}: empty search region for '{}'",
                cursor.target_frame,
                target.name
            );
            return Ok(None);
        };

        match target.stage() {
            Stage::Template => {
                let template = self.templates.get(&target.name).ok_or_else(|| {
                    EngineError::Template {
                        name: target.name.clone(),
                        reason: "template image not loaded".to_string(),
                    }
                })?;
                let (tw, th) = template.dimensions();
                if (region.width as u32) < tw || (region.height as u32) < th {
                    log::debug!(
                        "Frame {}: region {} smaller than template '{}'",
                        cursor.target_frame,
                        region,
                        target.name
                    );
                    return Ok(None);
                }
                let Some(matcher) = collaborators.matcher.as_deref_mut() else {
                    return Err(EngineError::MissingCollaborator("template matcher".to_string()));
                };
                let found = matcher.match_template(&crop(image, &region), template);
                Ok(Some(Observation::new(
                    found.x + region.x as f32,
                    found.y + region.y as f32,
                    Sample::Numeric(found.confidence),
                )))
            }
            Stage::Text(hint) => {
                let Some(recognizer) = collaborators.recognizer.as_deref_mut() else {
                    return Err(EngineError::MissingCollaborator("text recogniser".to_string()));
                };
                let mut patch = crop(image, &region);
                if self.config.binarize_text && target.action != Action::DetectNumber {
                    binarize(&mut patch);
                }
                let raw = recognizer.recognize(&patch, hint);
                let text = clean_text(&raw, target.action);
                Ok(Some(Observation::new(
                    region.x as f32,
                    region.y as f32,
                    Sample::Text(text),
                )))
            }
            Stage::Accessibility => Ok(None),
        }
    }

    fn snapshot_element(
        &self,
        target: &Target<'_>,
        collaborators: &mut Collaborators,
        frame: usize,
    ) -> Option<AxElement> {
        let snapshot = collaborators.accessibility.as_deref_mut()?.snapshot(frame)?;
        let element = match target.action {
            Action::AccessibilityFocus => snapshot.focused,
            _ => snapshot.hovered,
        }?;
        match target.rule.and_then(Rule::rect) {
            Some(rect) if !element.is_inside(&rect) => None,
            _ => Some(element),
        }
    }

    /// Region of the frame searched for a target, clamped to the frame
    fn search_region(
        &self,
        target: &Target<'_>,
        store: &AnnotationStore,
        cursor: &FrameCursor,
        (width, height): (u32, u32),
    ) -> Result<Option<Rect>> {
        let (w, h) = (width as i64, height as i64);
        let region = match (target.test(), target.rule) {
            (Some(Test::InRect), Some(rule)) => rule.rect().unwrap_or_else(|| Rect::full(width, height)),
            (Some(Test::Below), Some(rule)) => {
                let anchor = self.anchor(target, store, cursor, &rule.dependencies[0])?;
                let bottom = anchor.y.saturating_add(anchor.height);
                Rect::new(anchor.x, bottom, anchor.width, h.saturating_sub(bottom))
            }
            (Some(Test::RightOf), Some(rule)) => {
                let anchor = self.anchor(target, store, cursor, &rule.dependencies[0])?;
                let right = anchor.x.saturating_add(anchor.width);
                Rect::new(right, anchor.y, w.saturating_sub(right), anchor.height)
            }
            (Some(Test::Between), Some(rule)) => {
                let a = self.anchor(target, store, cursor, &rule.dependencies[0])?;
                let b = self.anchor(target, store, cursor, &rule.dependencies[1])?;
                let (left, right) = if a.x <= b.x { (a, b) } else { (b, a) };
                let x0 = left.x.saturating_add(left.width);
                let y0 = left.y.max(right.y);
                let y1 = left
                    .y
                    .saturating_add(left.height)
                    .min(right.y.saturating_add(right.height));
                Rect::new(x0, y0, right.x.saturating_sub(x0), y1.saturating_sub(y0))
            }
            _ => Rect::full(width, height),
        };
        log::debug!(
            "Frame {}: '{}' searches {}",
            cursor.target_frame,
            target.name,
            region
        );
        Ok(region.clamp_to(width, height))
    }

    /// Matched rectangle of an anchor annotation at the current frame
    fn anchor(
        &self,
        target: &Target<'_>,
        store: &AnnotationStore,
        cursor: &FrameCursor,
        name: &str,
    ) -> Result<Rect> {
        let track = store.get(name).ok_or_else(|| unresolved(target, name))?;
        let (width, height) = track.size.ok_or_else(|| unresolved(target, name))?;
        let (x, y) = track.position_at(cursor.target_frame);
        Ok(Rect::new(
            x.round() as i64,
            y.round() as i64,
            width as i64,
            height as i64,
        ))
    }
}

fn unresolved(target: &Target<'_>, name: &str) -> EngineError {
    EngineError::UnresolvedDependency {
        rule: target
            .rule
            .map(|r| r.source.clone())
            .unwrap_or_else(|| target.name.clone()),
        name: name.to_string(),
    }
}

/// Positions the source on the cursor's frame and decodes it as greyscale
fn decode(
    source: &mut dyn FrameSource,
    cursor: &mut FrameCursor,
    report: &mut ScanReport,
) -> Result<GrayImage> {
    let frame = cursor.target_frame;
    if cursor.needs_seek() {
        log::debug!(
            "Seeking to frame {} (last decoded: {:?})",
            frame,
            cursor.last_decoded_frame
        );
        report.seeks += 1;
        if !source.seek(frame) {
            cursor.source_lost = true;
            return Err(EngineError::Decode(format!("seek to frame {} failed", frame)));
        }
    }
    match source.read() {
        Some(decoded) => {
            cursor.source_lost = false;
            cursor.last_decoded_frame = Some(frame);
            report.decoded += 1;
            Ok(imageops::grayscale(&decoded.image))
        }
        None => {
            cursor.source_lost = true;
            Err(EngineError::Decode(format!("frame {} could not be read", frame)))
        }
    }
}

fn crop(image: &GrayImage, region: &Rect) -> GrayImage {
    imageops::crop_imm(
        image,
        region.x as u32,
        region.y as u32,
        region.width as u32,
        region.height as u32,
    )
    .to_image()
}

fn binarize(image: &mut GrayImage) {
    for pixel in image.pixels_mut() {
        *pixel = if pixel.0[0] > BINARIZE_LEVEL {
            Luma([255])
        } else {
            Luma([0])
        };
    }
}

/// Normalises recogniser output: no newlines or commas, trimmed, blank when empty
///
/// `detectNumber` keeps the text only when exactly one word was recognised.
pub fn clean_text(raw: &str, action: Action) -> String {
    let text: String = raw
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | ','))
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return BLANK.to_string();
    }
    if action == Action::DetectNumber && text.split_whitespace().count() != 1 {
        return BLANK.to_string();
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleCompiler;
    use crate::sources::mock::{CallLog, MockFrames, MockMatcher, MockRecognizer};
    use crate::sources::{AxSnapshot, SnapshotLog, TemplateMatcher};
    use crate::store::{Series, Track};
    use crate::types::MatchLocation;
    use assert_matches::assert_matches;
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    struct Fixture {
        compiled: CompiledRules,
        config: EngineConfig,
        templates: BTreeMap<String, GrayImage>,
        status: StatusHandle,
        abort: AbortToken,
    }

    impl Fixture {
        fn new(rules: &[&str], logged: &[&str]) -> Self {
            let logged: BTreeSet<String> = logged.iter().map(|s| s.to_string()).collect();
            let compiled = RuleCompiler::compile(rules, &logged).unwrap();
            let templates = compiled
                .templates
                .iter()
                .map(|name| (name.clone(), GrayImage::new(4, 4)))
                .collect();
            Self {
                compiled,
                config: EngineConfig::default().with_threshold(0.5),
                templates,
                status: StatusHandle::new(),
                abort: AbortToken::new(),
            }
        }

        fn scheduler(&self) -> Scheduler<'_> {
            Scheduler::new(
                &self.compiled,
                &self.config,
                &self.templates,
                &self.status,
                &self.abort,
            )
        }
    }

    fn collaborators(calls: &CallLog, frames: MockFrames, confidences: &[(usize, f32)]) -> Collaborators {
        Collaborators::new()
            .with_frames(frames)
            .with_matcher(MockMatcher::new(confidences, calls))
            .with_recognizer(MockRecognizer::new(&[], calls))
    }

    fn logged_track(values: &[f32]) -> Track {
        Track::from_series(Series::Numeric(values.to_vec()), Origin::Logged)
    }

    fn values(store: &AnnotationStore, name: &str) -> Vec<f32> {
        match store.series(name) {
            Some(Series::Numeric(values)) => values.clone(),
            other => panic!("unexpected series {:?}", other),
        }
    }

    fn run_rules(
        rules: &[&str],
        frames: usize,
        confidences: &[(usize, f32)],
        texts: &[(usize, &str)],
    ) -> AnnotationStore {
        let fixture = Fixture::new(rules, &[]);
        let calls = CallLog::default();
        let mut collab = Collaborators::new()
            .with_frames(MockFrames::new(frames, &calls))
            .with_matcher(MockMatcher::new(confidences, &calls))
            .with_recognizer(MockRecognizer::new(texts, &calls));
        let mut store = AnnotationStore::new(0.5);
        fixture
            .scheduler()
            .run(&mut store, &mut collab, frames, None)
            .unwrap();
        store
    }

    /// Matcher that records the published phase at each call
    struct PhaseRecorder {
        status: StatusHandle,
        seen: Rc<RefCell<Vec<Phase>>>,
    }

    impl TemplateMatcher for PhaseRecorder {
        fn match_template(&mut self, _region: &GrayImage, _template: &GrayImage) -> MatchLocation {
            self.seen.borrow_mut().push(self.status.snapshot().phase);
            MatchLocation {
                x: 0.0,
                y: 0.0,
                confidence: 0.9,
            }
        }
    }

    #[test]
    fn test_unconstrained_target_decodes_every_frame() {
        let fixture = Fixture::new(&["matchTemplate(logo)"], &[]);
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(4, &calls), &[(1, 0.9), (2, 0.2)]);
        let mut store = AnnotationStore::new(0.5);

        let report = fixture
            .scheduler()
            .run(&mut store, &mut collab, 4, None)
            .unwrap();

        assert_eq!(report.frames_processed, 4);
        assert_eq!(report.decoded, 4);
        assert_eq!(report.seeks, 0);
        assert_eq!(values(&store, "logo"), vec![0.0, 0.9, 0.2, 0.0]);
        assert_eq!(calls.borrow().matches, vec![0, 1, 2, 3]);
        assert_eq!(store.get("logo").unwrap().size, Some((4, 4)));
        assert_eq!(fixture.status.snapshot().progress, 1.0);
    }

    #[test]
    fn test_logged_trigger_gates_decoding() {
        let fixture = Fixture::new(&["if(menu){matchTemplate(logo)}"], &["menu"]);
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(6, &calls), &[(3, 0.8), (4, 0.7)]);
        let mut store = AnnotationStore::new(0.5);
        store.insert("menu", logged_track(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0]));

        let report = fixture
            .scheduler()
            .run(&mut store, &mut collab, 6, None)
            .unwrap();

        // Only frames 3 and 4 are decoded; reaching frame 3 needs one seek
        assert_eq!(calls.borrow().reads, vec![3, 4]);
        assert_eq!(calls.borrow().seeks, vec![3]);
        assert_eq!(report.idle_frames, 4);
        assert_eq!(values(&store, "logo"), vec![0.0, 0.0, 0.0, 0.8, 0.7, 0.0]);
    }

    #[test]
    fn test_all_logged_dependencies_required() {
        let fixture = Fixture::new(&["if(a,b){matchTemplate(logo)}"], &["a", "b"]);
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(3, &calls), &[(0, 0.9), (1, 0.9), (2, 0.9)]);
        let mut store = AnnotationStore::new(0.5);
        store.insert("a", logged_track(&[1.0, 1.0, 0.0]));
        store.insert("b", logged_track(&[1.0, 0.0, 1.0]));

        fixture
            .scheduler()
            .run(&mut store, &mut collab, 3, None)
            .unwrap();
        assert_eq!(values(&store, "logo"), vec![0.9, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_failure_defaults_frame() {
        let fixture = Fixture::new(&["matchTemplate(logo)"], &[]);
        let calls = CallLog::default();
        let frames = MockFrames::new(4, &calls).failing_at(&[1]);
        let mut collab = collaborators(&calls, frames, &[(0, 0.9), (1, 0.9), (2, 0.9), (3, 0.9)]);
        let mut store = AnnotationStore::new(0.5);

        let report = fixture
            .scheduler()
            .run(&mut store, &mut collab, 4, None)
            .unwrap();

        assert_eq!(report.decode_failures, 1);
        assert_eq!(values(&store, "logo"), vec![0.9, 0.0, 0.9, 0.9]);
        let last_error = fixture.status.snapshot().last_error.unwrap();
        assert!(last_error.contains("frame 1 could not be read"), "{}", last_error);
        // The failed read leaves the position unknown, so frame 2 is sought
        assert_eq!(calls.borrow().seeks, vec![2]);
    }

    #[test]
    fn test_new_dependency_uses_current_frame() {
        let fixture = Fixture::new(
            &["matchTemplate(logo)", "if(logo){detectNumber(count)}"],
            &[],
        );
        let calls = CallLog::default();
        let mut collab = Collaborators::new()
            .with_frames(MockFrames::new(3, &calls))
            .with_matcher(MockMatcher::new(&[(1, 0.9)], &calls))
            .with_recognizer(MockRecognizer::new(&[(1, " 42\n")], &calls));
        let mut store = AnnotationStore::new(0.5);

        fixture
            .scheduler()
            .run(&mut store, &mut collab, 3, None)
            .unwrap();

        assert_eq!(
            store.series("count"),
            Some(&Series::Text(vec![" ".into(), "42".into(), " ".into()]))
        );
        assert_eq!(calls.borrow().recognitions, vec![(1, CharsetHint::Digits)]);
        // The text pass reuses the frame decoded for the template pass
        assert_eq!(calls.borrow().reads, vec![0, 1, 2]);
    }

    #[test]
    fn test_declaration_order_does_not_change_series() {
        let forward = ["matchTemplate(logo)", "if(logo){matchTemplate(icon)}"];
        let mut reversed = forward;
        reversed.reverse();

        let a = run_rules(&forward, 4, &[(1, 0.9)], &[]);
        let b = run_rules(&reversed, 4, &[(1, 0.9)], &[]);
        assert_eq!(values(&a, "icon"), vec![0.0, 0.9, 0.0, 0.0]);
        assert_eq!(values(&b, "icon"), values(&a, "icon"));
        assert_eq!(values(&b, "logo"), values(&a, "logo"));
    }

    #[test]
    fn test_template_gated_on_text_sees_same_frame() {
        let rules = ["if(count){matchTemplate(icon)}", "detectNumber(count)"];
        let store = run_rules(&rules, 3, &[(2, 0.8)], &[(2, "7")]);
        assert_eq!(
            store.series("count"),
            Some(&Series::Text(vec![" ".into(), " ".into(), "7".into()]))
        );
        assert_eq!(values(&store, "icon"), vec![0.0, 0.0, 0.8]);
    }

    #[test]
    fn test_processing_order_puts_producers_first() {
        let fixture = Fixture::new(
            &[
                "if(count){matchTemplate(icon)}",
                "detectNumber(count)",
                "matchTemplate(logo)",
            ],
            &[],
        );
        let scheduler = fixture.scheduler();
        let targets = scheduler.targets();
        let names: Vec<&str> = processing_order(targets, &fixture.compiled.graph)
            .into_iter()
            .map(|i| targets[i].name.as_str())
            .collect();
        assert_eq!(names, vec!["logo", "count", "icon"]);
    }

    #[test]
    fn test_frame_states_published() {
        let fixture = Fixture::new(&["if(menu){matchTemplate(logo)}"], &["menu"]);
        let calls = CallLog::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut collab = Collaborators::new()
            .with_frames(MockFrames::new(2, &calls))
            .with_matcher(PhaseRecorder {
                status: fixture.status.clone(),
                seen: Rc::clone(&seen),
            });
        let mut store = AnnotationStore::new(0.5);
        store.insert("menu", logged_track(&[1.0, 0.0]));

        fixture
            .scheduler()
            .run(&mut store, &mut collab, 2, None)
            .unwrap();
        assert_eq!(*seen.borrow(), vec![Phase::Computing]);
        assert_eq!(fixture.status.snapshot().phase, Phase::Advancing);
    }

    #[test]
    fn test_below_region_and_offsets() {
        let fixture = Fixture::new(&["below(header){matchTemplate(logo)}"], &["header"]);
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(1, &calls), &[(0, 0.9)]);
        let mut store = AnnotationStore::new(0.5);
        let mut header = logged_track(&[1.0]);
        header.x = vec![10.0];
        header.y = vec![5.0];
        header.size = Some((20, 8));
        store.insert("header", header);

        fixture
            .scheduler()
            .run(&mut store, &mut collab, 1, None)
            .unwrap();

        // Region starts at (10, 13); the mock reports (2, 3) inside it
        assert_eq!(store.get("logo").unwrap().position_at(0), (12.0, 16.0));
    }

    #[test]
    fn test_anchor_without_size_is_fatal() {
        let fixture = Fixture::new(&["below(header){matchTemplate(logo)}"], &["header"]);
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(2, &calls), &[]);
        let mut store = AnnotationStore::new(0.5);
        store.insert("header", logged_track(&[1.0, 1.0]));

        let result = fixture.scheduler().run(&mut store, &mut collab, 2, None);
        assert_matches!(
            result,
            Err(EngineError::UnresolvedDependency { name, .. }) if name == "header"
        );
    }

    #[test]
    fn test_region_smaller_than_template_defaults() {
        let fixture = Fixture::new(&["inrect(0,0,2,2){matchTemplate(logo)}"], &[]);
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(2, &calls), &[(0, 0.9)]);
        let mut store = AnnotationStore::new(0.5);

        fixture
            .scheduler()
            .run(&mut store, &mut collab, 2, None)
            .unwrap();
        assert_eq!(values(&store, "logo"), vec![0.0, 0.0]);
        assert!(calls.borrow().matches.is_empty());
    }

    #[test]
    fn test_abort_stops_at_frame_boundary() {
        let fixture = Fixture::new(&["matchTemplate(logo)"], &[]);
        fixture.abort.abort();
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(5, &calls), &[]);
        let mut store = AnnotationStore::new(0.5);

        let report = fixture
            .scheduler()
            .run(&mut store, &mut collab, 5, None)
            .unwrap();
        assert!(report.aborted);
        assert_eq!(report.frames_processed, 0);
    }

    #[test]
    fn test_missing_matcher() {
        let fixture = Fixture::new(&["matchTemplate(logo)"], &[]);
        let calls = CallLog::default();
        let mut collab = Collaborators::new().with_frames(MockFrames::new(2, &calls));
        let mut store = AnnotationStore::new(0.5);

        let result = fixture.scheduler().run(&mut store, &mut collab, 2, None);
        assert_matches!(result, Err(EngineError::MissingCollaborator(_)));
    }

    #[test]
    fn test_accessibility_inrect_filter() {
        let fixture = Fixture::new(&["inrect(0,0,50,50){accessibilityHover(hover)}"], &[]);
        let element = |x: f32| AxElement {
            role: "button".into(),
            label: "Save".into(),
            x,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let log = SnapshotLog::from_snapshots(vec![
            AxSnapshot {
                frame: 0,
                hovered: Some(element(0.0)),
                focused: None,
            },
            AxSnapshot {
                frame: 1,
                hovered: Some(element(100.0)),
                focused: None,
            },
        ]);
        let mut collab = Collaborators::new().with_accessibility(log);
        let mut store = AnnotationStore::new(0.5);

        fixture
            .scheduler()
            .run(&mut store, &mut collab, 2, None)
            .unwrap();
        assert_eq!(
            store.series("hover"),
            Some(&Series::Text(vec!["Save".into(), " ".into()]))
        );
    }

    #[test]
    fn test_tables_written_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(&["matchTemplate(logo)"], &[]);
        let ctx = ExportContext::new(
            dir.path(),
            "rec",
            crate::export::SessionClock::new(10.0, None),
            "test",
            crate::config::ExportConfig::default(),
        );
        let calls = CallLog::default();
        let mut collab = collaborators(&calls, MockFrames::new(2, &calls), &[(1, 0.75)]);
        let mut store = AnnotationStore::new(0.5);

        let report = fixture
            .scheduler()
            .run(&mut store, &mut collab, 2, Some(&ctx))
            .unwrap();
        assert_eq!(report.tables.len(), 2);

        let combined = std::fs::read_to_string(dir.path().join("rec+logo.csv")).unwrap();
        let lines: Vec<&str> = combined.lines().collect();
        assert_eq!(lines[0], r#""Frame","logo_x","logo_y","logo_val""#);
        assert_eq!(lines[1], "0,2,3,0");
        assert_eq!(lines[2], "1,2,3,0.75");
        assert!(dir.path().join("rec_logo.csv").exists());
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(" Intro,\n", Action::DetectText), "Intro");
        assert_eq!(clean_text("\n", Action::DetectText), BLANK);
        assert_eq!(clean_text("12 34", Action::DetectNumber), BLANK);
        assert_eq!(clean_text("12:05", Action::DetectTime), "12:05");
    }
}
