//! Annotation Engine CLI Application
//!
//! This is the command-line interface for the annotation engine.
//! It uses the annotation-engine library and adds:
//! - TOML configuration with command-line overrides
//! - A recognition plug-in loaded from a dynamic library
//! - Parallel processing of several recordings, one session each
//! - Dry runs that only compile the rules
//! - A text summary report

use anyhow::{Context, Result};
use annotation_engine::session::recording_stem;
use annotation_engine::{
    Collaborators, HookLog, ImageSequenceProvider, ImageSequenceSource, LoggedFile, RuleCompiler,
    RunSummary, Session, SnapshotLog,
};
use clap::Parser;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod plugin;
mod report;

use config::AppConfig;
use plugin::{Plugin, PluginMatcher, PluginRecognizer};

/// Annotation Engine - Rule-driven annotation of screen recordings
#[derive(Parser, Debug)]
#[command(name = "annotation-cli")]
#[command(about = "Annotate screen recordings with rule-driven extraction and interval derivation", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Recording to process (can be repeated; replaces [input] videos)
    #[arg(long, value_name = "FILE")]
    video: Vec<PathBuf>,

    /// Directory with templates and logged series
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Directory of extracted frames (`{stem}` is replaced per recording)
    #[arg(long, value_name = "DIR")]
    frames: Option<String>,

    /// Frame rate of the extracted frames
    #[arg(long, value_name = "FPS")]
    fps: Option<f32>,

    /// Rule definition (can be repeated)
    #[arg(short, long, value_name = "RULE")]
    rule: Vec<String>,

    /// File with one rule per line
    #[arg(long, value_name = "FILE")]
    rules_file: Option<PathBuf>,

    /// Logged series or first-minute file (can be repeated)
    #[arg(long, value_name = "FILE")]
    logged: Vec<String>,

    /// Recognition plug-in library
    #[arg(long, value_name = "FILE")]
    plugin: Option<PathBuf>,

    /// Output directory for tables and timelines (default: data directory)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Gating threshold for numeric series
    #[arg(long, value_name = "VALUE")]
    threshold: Option<f32>,

    /// Compile the rules and print them without processing frames
    #[arg(long)]
    dry_run: bool,

    /// Number of recordings processed in parallel (default: one per core)
    #[arg(short, long, value_name = "COUNT")]
    jobs: Option<usize>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Annotation Engine CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using engine library v{}", annotation_engine::VERSION);

    let config = build_config(&args)?;
    let rules = config.rule_definitions()?;
    if rules.is_empty() {
        println!("Annotation Engine - No rules specified");
        println!("\nQuick Start:");
        println!("  annotation-cli --video talk.mp4 --frames frames/{{stem}} --fps 25 \\");
        println!("      --rule 'matchTemplate(logo)' --plugin libocr.so");
        println!("\nFor all options:");
        println!("  annotation-cli --config config.toml");
        println!("\nUse --help for more options");
        return Ok(());
    }

    if args.dry_run {
        return dry_run(&config, &rules);
    }

    if config.input.videos.is_empty() {
        anyhow::bail!("No recordings to process; pass --video or set [input] videos");
    }

    let plugin = match &config.plugin.library {
        Some(path) => Some(Arc::new(
            Plugin::load(path).with_context(|| format!("Failed to load plug-in: {:?}", path))?,
        )),
        None => None,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.unwrap_or(0))
        .build()
        .context("Failed to start worker pool")?;

    let results: Vec<(PathBuf, std::result::Result<RunSummary, String>)> = pool.install(|| {
        config
            .input
            .videos
            .par_iter()
            .map(|video| {
                let result = process_video(&config, &rules, video, plugin.clone())
                    .map_err(|e| format!("{:#}", e));
                if let Err(message) = &result {
                    log::error!("{:?}: {}", video, message);
                }
                (video.clone(), result)
            })
            .collect()
    });

    let failed = report::print_summary(&results);
    if failed > 0 {
        anyhow::bail!("{} of {} recordings failed", failed, results.len());
    }
    Ok(())
}

/// Loads the configuration file (if any) and applies command-line overrides
fn build_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    if !args.video.is_empty() {
        config.input.videos = args.video.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.input.data_dir = dir.clone();
    }
    if let Some(frames) = &args.frames {
        config.input.frames = Some(frames.clone());
    }
    if let Some(fps) = args.fps {
        config.input.fps = Some(fps);
    }
    config.input.logged.extend(args.logged.iter().cloned());
    config.rules.definitions.extend(args.rule.iter().cloned());
    if let Some(file) = &args.rules_file {
        config.rules.file = Some(file.clone());
    }
    if let Some(library) = &args.plugin {
        config.plugin.library = Some(library.clone());
    }
    if let Some(dir) = &args.output {
        config.engine.output_dir = Some(dir.clone());
    }
    if let Some(threshold) = args.threshold {
        config.engine.threshold = threshold;
    }

    config.validate()?;
    log::debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Compiles the rules against the logged names of the first recording and prints them
fn dry_run(config: &AppConfig, rules: &[String]) -> Result<()> {
    let stem = config
        .input
        .videos
        .first()
        .map(|video| recording_stem(video))
        .unwrap_or_default();

    let mut logged = BTreeSet::new();
    for file in &config.input.logged {
        let path = config.input.resolve(file, &stem);
        let parsed = LoggedFile::read(&path, config.engine.threshold)
            .with_context(|| format!("Failed to read logged series: {:?}", path))?;
        if let LoggedFile::Annotations(table) = parsed {
            logged.extend(table.annotations.into_iter().map(|a| a.name));
        }
    }

    let compiled = RuleCompiler::compile(rules, &logged).context("Failed to compile rules")?;
    report::print_compiled(&compiled);
    Ok(())
}

/// Runs one session over one recording
fn process_video(
    config: &AppConfig,
    rules: &[String],
    video: &Path,
    plugin: Option<Arc<Plugin>>,
) -> Result<RunSummary> {
    let input = &config.input;
    let stem = recording_stem(video);
    let fps = input.frame_rate(&config.engine);

    let mut collaborators = Collaborators::new();
    if let Some(frames) = &input.frames {
        let dir = input.resolve(frames, &stem);
        let fps = fps.context("Image sequences need a frame rate (--fps or [input] fps)")?;
        let source = ImageSequenceSource::open(&dir, fps)
            .with_context(|| format!("Failed to open frames: {:?}", dir))?;
        collaborators = collaborators
            .with_frames(source)
            .with_provider(ImageSequenceProvider::new(fps));
    }
    if let Some(plugin) = plugin {
        log::debug!("{}: recognition through {:?}", stem, plugin.path());
        collaborators = collaborators
            .with_matcher(PluginMatcher(Arc::clone(&plugin)))
            .with_recognizer(PluginRecognizer(plugin));
    }
    if let Some(log) = &input.accessibility_log {
        let path = input.resolve(log, &stem);
        let snapshots = SnapshotLog::load(&path)
            .with_context(|| format!("Failed to load accessibility snapshots: {:?}", path))?;
        collaborators = collaborators.with_accessibility(snapshots);
    }
    if let Some(log) = &input.hook_log {
        collaborators = collaborators.with_input_events(HookLog::new(input.resolve(log, &stem)));
    }

    let mut engine = config.engine.clone();
    if engine.fps.is_none() {
        engine.fps = input.fps;
    }
    let mut session = Session::new(engine, &input.data_dir, video).with_collaborators(collaborators);
    for file in &input.logged {
        let path = input.resolve(file, &stem);
        session
            .ingest_log(&path)
            .with_context(|| format!("Failed to ingest logged series: {:?}", path))?;
    }

    let summary = session
        .run(rules)
        .with_context(|| format!("Session '{}' failed", stem))?;
    Ok(summary)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_override_is_validated() {
        let args = Args::try_parse_from(["annotation-cli", "--threshold", "1.5"]).unwrap();
        assert!(build_config(&args).is_err());

        let args = Args::try_parse_from(["annotation-cli", "--threshold", "0.9"]).unwrap();
        assert_eq!(build_config(&args).unwrap().engine.threshold, 0.9);
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[input]\nvideos = [\"a.mp4\"]\n\n[engine]\nthreshold = 0.95\n").unwrap();

        let args = Args::try_parse_from([
            "annotation-cli",
            "--config",
            path.to_str().unwrap(),
            "--video",
            "b.mp4",
            "-r",
            "matchTemplate(logo)",
        ])
        .unwrap();
        let config = build_config(&args).unwrap();
        assert_eq!(config.input.videos, vec![PathBuf::from("b.mp4")]);
        assert_eq!(config.rules.definitions, vec!["matchTemplate(logo)"]);
        assert_eq!(config.engine.threshold, 0.95);
    }
}
