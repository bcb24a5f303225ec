//! Interval derivation
//!
//! Runs once, after the frame scan, over the completed series. Each conversion rule is
//! applied in declaration order and its derived series is written back into the store
//! under the rule's name, so later conversion rules can use earlier ones.
//!
//! The four operations are pure functions over the store; [`DerivationEngine`] applies
//! them and writes their exports.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::export::{
    quote_text, text_runs, true_runs, ExportContext, Provenance, Segment, SourceTag, TableWriter,
};
use crate::expression::Evaluator;
use crate::rules::{Action, CompiledRules, Rule, RuleKind, Test};
use crate::status::{Phase, StatusHandle, WarningCounter};
use crate::store::{AnnotationStore, Origin, Series, Track};
use crate::types::{EngineError, Result, BLANK};

/// Series and segments produced by one conversion rule
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub name: String,
    pub track: Track,
    pub segments: Vec<Segment>,
    /// Frames where the expression could not be evaluated
    pub failures: usize,
}

/// One run of a nested variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRun {
    pub start: usize,
    pub end: usize,
    /// Text of the run, for text variables
    pub value: Option<String>,
}

/// One run of the last variable with the runs of the other variables aligned to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedRow {
    pub start: usize,
    pub end: usize,
    /// Per variable, in rule order, the latest run overlapping this row
    pub members: Vec<Option<VariableRun>>,
}

/// Output of `nestByLastVariable`
#[derive(Debug, Clone, PartialEq)]
pub struct Nested {
    pub derived: Derived,
    pub variables: Vec<String>,
    /// Whether each variable is a text series
    pub text: Vec<bool>,
    pub rows: Vec<NestedRow>,
}

fn rule_name(rule: &Rule) -> Result<&str> {
    rule.name.as_deref().ok_or_else(|| {
        EngineError::InvalidInput(format!("conversion rule '{}' has no name", rule.source))
    })
}

fn lookup<'s>(store: &'s AnnotationStore, rule: &Rule, name: &str) -> Result<&'s Series> {
    store
        .series(name)
        .ok_or_else(|| EngineError::UnresolvedDependency {
            rule: rule.source.clone(),
            name: name.to_string(),
        })
}

/// Per-frame guard of a rule: its `during` dependency, or always true
fn guard(store: &AnnotationStore, rule: &Rule, frames: usize) -> Result<Vec<bool>> {
    match (rule.test, rule.dependencies.first()) {
        (Some(Test::During), Some(name)) => {
            Ok(lookup(store, rule, name)?.gate(frames, store.threshold()))
        }
        _ => Ok(vec![true; frames]),
    }
}

fn numeric_track(values: Vec<f32>) -> Track {
    Track::from_series(Series::Numeric(values), Origin::Derived)
}

/// `eval`: segments where the guard holds and the expression is true
///
/// Expression failures are logged through `warnings` and count as false for the frame.
pub fn eval(
    store: &AnnotationStore,
    rule: &Rule,
    frames: usize,
    evaluator: &Evaluator<'_>,
    warnings: &mut WarningCounter,
) -> Result<Derived> {
    let name = rule_name(rule)?;
    let gate = guard(store, rule, frames)?;
    let source = rule.variables.first().map(String::as_str).unwrap_or_default();

    let mut failures = 0;
    let parsed = match evaluator.parse(source) {
        Ok(expr) => Some(expr),
        Err(e) => {
            warnings.warn(&e);
            None
        }
    };

    let on: Vec<bool> = gate
        .iter()
        .enumerate()
        .map(|(frame, guarded)| {
            if !guarded {
                return false;
            }
            let Some(expr) = &parsed else {
                failures += 1;
                return false;
            };
            match evaluator.evaluate_expr(expr, store, frame) {
                Ok(value) => evaluator.coercion().truthy(&value),
                Err(e) => {
                    failures += 1;
                    warnings.warn(format_args!("frame {}: {}", frame, e));
                    false
                }
            }
        })
        .collect();

    let mut starts = BTreeSet::new();
    let mut segments = Vec::new();
    for (start, end) in true_runs(&on) {
        if !starts.insert(start) {
            return Err(EngineError::DuplicateSegment {
                rule: rule.source.clone(),
                frame: start,
            });
        }
        segments.push(Segment::new(start, end, name));
    }

    Ok(Derived {
        name: name.to_string(),
        track: numeric_track(on.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()),
        segments,
        failures,
    })
}

/// `matchFirstValueOf`: broadcasts the target's first set value over each guard run
///
/// Runs in which the target never holds a value keep the blank default and produce no
/// segment. Numeric targets contribute `1` when they exceed the threshold.
pub fn match_first_value_of(store: &AnnotationStore, rule: &Rule, frames: usize) -> Result<Derived> {
    let name = rule_name(rule)?;
    let gate = guard(store, rule, frames)?;
    let target = lookup(store, rule, &rule.variables[0])?;
    let threshold = store.threshold();

    let mut values = vec![BLANK.to_string(); frames];
    let mut segments = Vec::new();
    for (start, end) in true_runs(&gate) {
        let Some(first) = (start..end).find(|&f| target.is_true_at(f, threshold)) else {
            log::debug!("'{}': no value of '{}' in [{}, {})", name, rule.variables[0], start, end);
            continue;
        };
        let value = target.label_at(first, threshold);
        for slot in &mut values[start..end] {
            slot.clone_from(&value);
        }
        segments.push(Segment::new(start, end, value));
    }

    Ok(Derived {
        name: name.to_string(),
        track: Track::from_series(Series::Text(values), Origin::Derived),
        segments,
        failures: 0,
    })
}

/// `triggerBySegmentsOf`: pulses where guard and target become true together
///
/// The series is `1` only on the first frame of each run of `guard && target`. Segments
/// start at each pulse and end at the next pulse or at the end of the guard run, and are
/// numbered `<name> #1`, `<name> #2`, ...
pub fn trigger_by_segments_of(store: &AnnotationStore, rule: &Rule, frames: usize) -> Result<Derived> {
    let name = rule_name(rule)?;
    let gate = guard(store, rule, frames)?;
    let target = lookup(store, rule, &rule.variables[0])?.gate(frames, store.threshold());

    let both: Vec<bool> = gate.iter().zip(&target).map(|(g, t)| *g && *t).collect();
    let pulses: Vec<bool> = (0..frames)
        .map(|f| both[f] && (f == 0 || !both[f - 1]))
        .collect();

    let mut segments = Vec::new();
    let mut open: Option<usize> = None;
    let close = |start: usize, end: usize, segments: &mut Vec<Segment>| {
        let label = format!("{} #{}", name, segments.len() + 1);
        segments.push(Segment::new(start, end, label));
    };
    for frame in 0..frames {
        if pulses[frame] {
            if let Some(start) = open.take() {
                close(start, frame, &mut segments);
            }
            open = Some(frame);
        } else if !gate[frame] {
            if let Some(start) = open.take() {
                close(start, frame, &mut segments);
            }
        }
    }
    if let Some(start) = open {
        close(start, frames, &mut segments);
    }

    Ok(Derived {
        name: name.to_string(),
        track: numeric_track(pulses.iter().map(|&p| if p { 1.0 } else { 0.0 }).collect()),
        segments,
        failures: 0,
    })
}

fn variable_runs(series: &Series, gate: &[bool], threshold: f32) -> Vec<VariableRun> {
    match series {
        Series::Text(values) => {
            let masked: Vec<String> = gate
                .iter()
                .enumerate()
                .map(|(f, on)| match values.get(f) {
                    Some(value) if *on => value.clone(),
                    _ => BLANK.to_string(),
                })
                .collect();
            text_runs(&masked)
                .into_iter()
                .map(|(start, end, value)| VariableRun {
                    start,
                    end,
                    value: Some(value),
                })
                .collect()
        }
        Series::Numeric(_) => {
            let on: Vec<bool> = gate
                .iter()
                .enumerate()
                .map(|(f, g)| *g && series.is_true_at(f, threshold))
                .collect();
            true_runs(&on)
                .into_iter()
                .map(|(start, end)| VariableRun {
                    start,
                    end,
                    value: None,
                })
                .collect()
        }
    }
}

/// `nestByLastVariable`: one row per run of the last variable
///
/// Runs are found per variable (numeric runs above threshold, text runs of one
/// non-blank value), restricted to the guard when there is one. Each row pairs a run of
/// the last variable with the latest overlapping run of every variable.
pub fn nest_by_last_variable(store: &AnnotationStore, rule: &Rule, frames: usize) -> Result<Nested> {
    let name = rule_name(rule)?;
    let gate = guard(store, rule, frames)?;
    let threshold = store.threshold();

    let mut runs = Vec::with_capacity(rule.variables.len());
    let mut text = Vec::with_capacity(rule.variables.len());
    for variable in &rule.variables {
        let series = lookup(store, rule, variable)?;
        text.push(matches!(series, Series::Text(_)));
        runs.push(variable_runs(series, &gate, threshold));
    }

    let nest_runs = runs.last().cloned().unwrap_or_default();
    let rows: Vec<NestedRow> = nest_runs
        .iter()
        .map(|nest| NestedRow {
            start: nest.start,
            end: nest.end,
            members: runs
                .iter()
                .map(|own| {
                    own.iter()
                        .filter(|r| r.start < nest.end && r.end > nest.start)
                        .last()
                        .cloned()
                })
                .collect(),
        })
        .collect();

    let mut indicator = vec![0.0; frames];
    let mut segments = Vec::with_capacity(nest_runs.len());
    for run in &nest_runs {
        for slot in &mut indicator[run.start..run.end] {
            *slot = 1.0;
        }
        let label = run.value.clone().unwrap_or_else(|| name.to_string());
        segments.push(Segment::new(run.start, run.end, label));
    }

    Ok(Nested {
        derived: Derived {
            name: name.to_string(),
            track: numeric_track(indicator),
            segments,
            failures: 0,
        },
        variables: rule.variables.clone(),
        text,
        rows,
    })
}

/// Summary of a derivation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationReport {
    pub rules: usize,
    pub segments: usize,
    pub expression_failures: usize,
    pub files: Vec<PathBuf>,
}

/// Applies conversion rules to a completed store
pub struct DerivationEngine<'a> {
    config: &'a EngineConfig,
    status: &'a StatusHandle,
    evaluator: Evaluator<'static>,
}

impl<'a> DerivationEngine<'a> {
    pub fn new(config: &'a EngineConfig, status: &'a StatusHandle) -> Self {
        Self {
            config,
            status,
            evaluator: Evaluator::new(config.threshold),
        }
    }

    /// Applies every conversion rule in declaration order
    ///
    /// # Arguments
    /// * `store` - Completed store; derived series are inserted into it
    /// * `compiled` - Compiled rule set
    /// * `frames` - Session length in frames
    /// * `export` - Where segments and nest tables go; `None` writes nothing
    ///
    /// # Returns
    /// * `Result<DerivationReport>` - Counts and written files
    pub fn run(
        &self,
        store: &mut AnnotationStore,
        compiled: &CompiledRules,
        frames: usize,
        export: Option<&ExportContext>,
    ) -> Result<DerivationReport> {
        let mut report = DerivationReport::default();
        let rules: Vec<&Rule> = compiled.of_kind(RuleKind::Conversion).collect();
        if rules.is_empty() {
            return Ok(report);
        }
        self.status.set_phase(Phase::Deriving);
        log::info!("Deriving {} conversion rules over {} frames", rules.len(), frames);

        for rule in rules {
            let mut warnings =
                WarningCounter::new(format!("rule '{}'", rule.label()), self.config.max_warnings)
                    .with_status(self.status);
            let (derived, nested) = match rule.action {
                Action::Eval => (eval(store, rule, frames, &self.evaluator, &mut warnings)?, None),
                Action::MatchFirstValueOf => (match_first_value_of(store, rule, frames)?, None),
                Action::TriggerBySegmentsOf => (trigger_by_segments_of(store, rule, frames)?, None),
                Action::NestByLastVariable => {
                    let nested = nest_by_last_variable(store, rule, frames)?;
                    (nested.derived.clone(), Some(nested))
                }
                other => {
                    return Err(EngineError::InvalidInput(format!(
                        "'{}' is not a conversion action",
                        other
                    )))
                }
            };
            log::info!(
                "Rule '{}' ({}): {} segments",
                derived.name,
                rule.action,
                derived.segments.len()
            );

            if let Some(ctx) = export {
                let provenance =
                    Provenance::new(derived.name.clone(), rule.action.as_str(), SourceTag::Conversion);
                if let Some(path) =
                    ctx.write_segments(&derived.name, &derived.segments, frames, &provenance)?
                {
                    report.files.push(path);
                }
                if let Some(nested) = &nested {
                    if ctx.config.tables {
                        report.files.extend(write_nest_tables(ctx, nested)?);
                    }
                }
            }

            report.rules += 1;
            report.segments += derived.segments.len();
            report.expression_failures += derived.failures;
            store.insert(derived.name, derived.track);
        }
        Ok(report)
    }
}

/// Writes `<stem>_<name>.csv` and `<stem>_<name>StartEnd.csv`
fn write_nest_tables(ctx: &ExportContext, nested: &Nested) -> Result<Vec<PathBuf>> {
    let clock = &ctx.clock;
    let name = &nested.derived.name;
    let columns = nested.variables.iter().zip(&nested.text);

    let mut header = Vec::new();
    for (variable, is_text) in columns.clone() {
        header.push(format!("{}Start", variable));
        if *is_text {
            header.push(format!("{}Value", variable));
        }
    }
    header.extend(["Duration", "tcin", "tcout"].map(String::from));
    let mut starts = TableWriter::create(&ctx.rule_table_path(name), &header)?;

    let mut header = Vec::new();
    for (variable, is_text) in columns.clone() {
        header.push(format!("{}Start", variable));
        header.push(format!("{}End", variable));
        if *is_text {
            header.push(format!("{}Value", variable));
        }
    }
    let mut start_end = TableWriter::create(&ctx.start_end_table_path(name), &header)?;

    for row in &nested.rows {
        let mut fields = Vec::new();
        let mut spans = Vec::new();
        for (member, is_text) in row.members.iter().zip(&nested.text) {
            let start = member
                .as_ref()
                .map(|r| clock.dated_timecode(r.start))
                .unwrap_or_default();
            let end = member
                .as_ref()
                .map(|r| clock.dated_timecode(r.end))
                .unwrap_or_default();
            let value = member
                .as_ref()
                .and_then(|r| r.value.as_deref())
                .map(quote_text)
                .unwrap_or_default();

            fields.push(start.clone());
            spans.push(start);
            spans.push(end);
            if *is_text {
                fields.push(value.clone());
                spans.push(value);
            }
        }
        let duration = clock.seconds(row.end - row.start);
        fields.push(format!("{}", duration));
        fields.push(clock.timecode(row.start));
        fields.push(clock.timecode(row.end));

        starts.write_record(&fields)?;
        start_end.write_record(&spans)?;
    }

    Ok(vec![starts.finish()?, start_end.finish()?])
}
