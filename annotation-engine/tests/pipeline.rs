//! End-to-end runs of a session over scripted collaborators

use annotation_engine::{
    AbortToken, CharsetHint, Collaborators, EngineConfig, EngineError, Frame, FrameSource,
    MatchLocation, Phase, Series, Session, TemplateMatcher, TextRecognizer,
};
use image::{GrayImage, Rgb, RgbImage};
use std::fs;
use std::path::Path;

/// Frames whose grey level is the frame number
struct LevelFrames {
    count: usize,
    position: usize,
    abort_at: Option<(usize, AbortToken)>,
}

impl LevelFrames {
    fn new(count: usize) -> Self {
        Self {
            count,
            position: 0,
            abort_at: None,
        }
    }
}

impl FrameSource for LevelFrames {
    fn frame_count(&self) -> usize {
        self.count
    }

    fn fps(&self) -> f32 {
        10.0
    }

    fn dimensions(&self) -> (u32, u32) {
        (80, 60)
    }

    fn seek(&mut self, frame: usize) -> bool {
        self.position = frame;
        frame < self.count
    }

    fn read(&mut self) -> Option<Frame> {
        let number = self.position;
        self.position += 1;
        if let Some((at, token)) = &self.abort_at {
            if number == *at {
                token.abort();
            }
        }
        let level = number as u8;
        Some(Frame {
            number,
            image: RgbImage::from_pixel(80, 60, Rgb([level, level, level])),
        })
    }
}

/// Finds the logo on frames 2..=4
struct LogoMatcher;

impl TemplateMatcher for LogoMatcher {
    fn match_template(&mut self, region: &GrayImage, _template: &GrayImage) -> MatchLocation {
        let frame = region.get_pixel(0, 0).0[0];
        MatchLocation {
            x: 10.0,
            y: 5.0,
            confidence: if (2..=4).contains(&frame) { 0.999 } else { 0.1 },
        }
    }
}

/// Reads a title on frames 3 and 4
struct TitleReader;

impl TextRecognizer for TitleReader {
    fn recognize(&mut self, region: &GrayImage, hint: CharsetHint) -> String {
        assert_eq!(hint, CharsetHint::Alphabetic);
        match region.get_pixel(0, 0).0[0] {
            3 | 4 => "Intro\n".to_string(),
            _ => String::new(),
        }
    }
}

fn collaborators(frames: LevelFrames) -> Collaborators {
    Collaborators::new()
        .with_frames(frames)
        .with_matcher(LogoMatcher)
        .with_recognizer(TitleReader)
}

/// Keeps the frame level readable in text regions
fn config() -> EngineConfig {
    EngineConfig::default().with_text_binarization(false)
}

fn data_dir() -> tempfile::TempDir {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    GrayImage::new(20, 10).save(dir.path().join("logo.png")).unwrap();
    dir
}

const RULES: &str = r#"
# slide title sits under the logo
"matchTemplate(logo)"
"below(logo){detectText(title)}"
during(logo){shown=eval(True)}
during(logo){heading=matchFirstValueOf(title)}
"#;

#[test]
fn test_full_run() {
    let dir = data_dir();
    let rules = annotation_engine::split_rule_text(RULES);
    assert_eq!(rules.len(), 4);

    let mut session = Session::new(
        config(),
        dir.path(),
        Path::new("talk-2016-03-15-14-00-00_cam.mp4"),
    )
    .with_collaborators(collaborators(LevelFrames::new(6)));
    let summary = session.run(&rules).unwrap();

    assert_eq!(summary.stem, "talk-2016-03-15-14-00-00");
    assert_eq!(summary.frames, 6);
    assert_eq!(summary.scan.frames_processed, 6);
    assert_eq!(summary.derivation.rules, 2);

    let store = session.store();
    assert_eq!(
        store.series("logo"),
        Some(&Series::Numeric(vec![0.1, 0.1, 0.999, 0.999, 0.999, 0.1]))
    );
    let title: Vec<String> = [" ", " ", " ", "Intro", "Intro", " "]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(store.series("title"), Some(&Series::Text(title)));
    assert_eq!(
        store.series("shown"),
        Some(&Series::Numeric(vec![0.0, 0.0, 1.0, 1.0, 1.0, 0.0]))
    );

    let combined = fs::read_to_string(dir.path().join("talk-2016-03-15-14-00-00+logo+title.csv")).unwrap();
    let lines: Vec<&str> = combined.lines().collect();
    assert_eq!(
        lines[0],
        r#""Frame","logo_x","logo_y","logo_val","title_x","title_y","title_txt""#
    );
    assert_eq!(lines.len(), 7);

    let heading: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("talk-2016-03-15-14-00-00-heading-segments.json")).unwrap(),
    )
    .unwrap();
    let entry = &heading["localisation"][0]["sublocalisations"]["localisation"][0];
    assert_eq!(entry["label"], "Intro");
    assert_eq!(entry["tcin"], "00:00:00.2000");
    assert_eq!(entry["tcout"], "00:00:00.5000");
    assert_eq!(heading["source"], "conversion");
    assert_eq!(session.status().snapshot().phase, Phase::Done);
}

#[test]
fn test_rerun_is_byte_identical() {
    let rules = annotation_engine::split_rule_text(RULES);
    let mut outputs = Vec::new();
    for _ in 0..2 {
        let dir = data_dir();
        let mut session = Session::new(config(), dir.path(), Path::new("rec.mp4"))
            .with_collaborators(collaborators(LevelFrames::new(6)));
        session.run(&rules).unwrap();
        outputs.push(fs::read(dir.path().join("rec-shown-segments.json")).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_abort_mid_run_leaves_closed_tables() {
    let dir = data_dir();
    let mut frames = LevelFrames::new(10);
    let mut session = Session::new(config(), dir.path(), Path::new("rec.mp4"));
    frames.abort_at = Some((3, session.abort_token()));
    session.collaborators_mut().frames = Some(Box::new(frames));
    session.collaborators_mut().matcher = Some(Box::new(LogoMatcher));
    session.collaborators_mut().recognizer = Some(Box::new(TitleReader));

    let rules = annotation_engine::split_rule_text(RULES);
    let summary = session.run(&rules).unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.scan.frames_processed, 4);
    assert_eq!(session.status().snapshot().phase, Phase::Aborted);

    let table = fs::read_to_string(dir.path().join("rec_logo.csv")).unwrap();
    assert_eq!(table.lines().count(), 5);
}

#[test]
fn test_unknown_dependency_is_reported() {
    let dir = data_dir();
    let mut session = Session::new(config(), dir.path(), Path::new("rec.mp4"))
        .with_collaborators(collaborators(LevelFrames::new(3)));
    let result = session.run(&["during(nothing){x=eval(True)}"]);
    assert!(matches!(
        result,
        Err(EngineError::UnresolvedDependency { ref name, .. }) if name == "nothing"
    ));
    assert_eq!(session.status().snapshot().progress, -1.0);
}

#[test]
fn test_declaration_order_does_not_change_outputs() {
    let forward = annotation_engine::split_rule_text(RULES);
    let mut reversed = forward.clone();
    reversed.reverse();

    let mut runs = Vec::new();
    for rules in [&forward, &reversed] {
        let dir = data_dir();
        let mut session = Session::new(config(), dir.path(), Path::new("rec.mp4"))
            .with_collaborators(collaborators(LevelFrames::new(6)));
        session.run(rules).unwrap();

        let series: Vec<Option<Series>> = ["logo", "title", "shown", "heading"]
            .iter()
            .map(|name| session.store().series(name).cloned())
            .collect();
        let files: Vec<Vec<u8>> = ["rec_logo.csv", "rec_title.csv", "rec-heading-segments.json"]
            .iter()
            .map(|file| fs::read(dir.path().join(file)).unwrap())
            .collect();
        runs.push((series, files));
    }

    assert!(runs[0].0.iter().all(Option::is_some));
    assert_eq!(runs[0], runs[1]);
}
