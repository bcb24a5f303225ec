//! Annotation Engine Library
//!
//! A rule-driven engine that annotates screen recordings frame by frame and derives
//! labelled time intervals from the resulting series.
//!
//! # Architecture
//!
//! A run is driven by a [`Session`], created fresh for each recording:
//! - Rule text is compiled into classified rules and a dependency graph
//! - The scheduler walks the frames once, triggering each extraction rule only when
//!   its prerequisites hold, and appends one row per rule per frame to the store
//! - Input hook rules place recorded keyboard and mouse events on frames
//! - Conversion rules derive interval series (`eval`, `matchFirstValueOf`,
//!   `triggerBySegmentsOf`, `nestByLastVariable`) from the completed store
//! - Per-frame tables and segment/overlay timelines are written along the way
//!
//! The library does NOT decode video or recognise pixels. Frame sources, template
//! matchers and text recognisers are collaborators handed to the session.
//!
//! # Example Usage
//!
//! ```no_run
//! use annotation_engine::{Collaborators, EngineConfig, ImageSequenceSource, Session};
//! use std::path::Path;
//!
//! let frames = ImageSequenceSource::open(Path::new("frames/"), 25.0).unwrap();
//! let config = EngineConfig::new().with_threshold(0.99);
//!
//! let mut session = Session::new(config, "data/", Path::new("lecture-2016-03-15-14-00-00.mp4"))
//!     .with_collaborators(Collaborators::new().with_frames(frames));
//! session.ingest_log(Path::new("data/lecture_slides.csv")).unwrap();
//!
//! let summary = session
//!     .run(&["during(slide){shown=eval(True)}"])
//!     .unwrap();
//! println!("{} frames, {} files", summary.frames, summary.files.len());
//! ```

// Public modules
pub mod config;
pub mod derivation;
pub mod export;
pub mod expression;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod sources;
pub mod status;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{EngineConfig, ExportConfig, DEFAULT_THRESHOLD};
pub use derivation::{DerivationEngine, DerivationReport};
pub use export::{ExportContext, Segment, SessionClock, SourceTag};
pub use expression::{Evaluator, ExpressionError, Resolver, Value};
pub use rules::{split_rule_text, CompileError, CompiledRules, Rule, RuleCompiler, RuleKind};
pub use scheduler::{ScanReport, Scheduler};
pub use session::{Collaborators, RunSummary, Session};
pub use sources::{
    CharsetHint, Frame, FrameSource, FrameSourceProvider, HookLog, ImageSequenceProvider,
    ImageSequenceSource, LoggedFile, SnapshotLog, TemplateMatcher, TextRecognizer,
};
pub use status::{AbortToken, Phase, Status, StatusHandle};
pub use store::{AnnotationStore, Origin, Series, StoreStats, Track};
pub use types::{EngineError, MatchLocation, Rect, Result, Sample};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
