//! Recorded keyboard and mouse events
//!
//! Hook logs hold one event per line as comma-separated `key=value` pairs, always
//! starting with `id=<event type>,when=<milliseconds since epoch>`:
//!
//! ```text
//! id=4,when=1458050525123,mask=0,keycode=30,rawcode=65
//! id=3,when=1458050525124,mask=0,keychar=a,rawcode=65
//! id=6,when=1458050526001,mask=0,x=640,y=360,button=1,clicks=1
//! ```
//!
//! Event type numbers follow the usual global hook convention (3 key typed, 4 key
//! pressed, 5 key released, 6 to 11 mouse clicked/pressed/released/moved/dragged/wheel).

use chrono::{DateTime, Local, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{EngineError, Result};

/// Kind of one recorded input event
#[derive(Debug, Clone, PartialEq)]
pub enum InputEventKind {
    KeyTyped { keychar: char },
    KeyPressed { keycode: u16 },
    KeyReleased { keycode: u16 },
    MouseClicked { x: f32, y: f32, button: u16 },
    MousePressed { x: f32, y: f32, button: u16 },
    MouseReleased { x: f32, y: f32, button: u16 },
    MouseMoved { x: f32, y: f32 },
    MouseDragged { x: f32, y: f32 },
    MouseWheel { x: f32, y: f32 },
}

impl InputEventKind {
    pub fn is_mouse(&self) -> bool {
        !matches!(
            self,
            InputEventKind::KeyTyped { .. }
                | InputEventKind::KeyPressed { .. }
                | InputEventKind::KeyReleased { .. }
        )
    }
}

/// One recorded input event with its local wall-clock time
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub time: NaiveDateTime,
    pub kind: InputEventKind,
}

/// Source of recorded input events
pub trait InputEventSource {
    /// All events, in recording order
    fn events(&mut self) -> Result<Vec<InputEvent>>;
}

/// Hook log file reader
#[derive(Debug, Clone)]
pub struct HookLog {
    path: PathBuf,
}

impl HookLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses hook log content; lines that are not events are skipped
    pub fn parse(content: &str) -> Result<Vec<InputEvent>> {
        let mut lines = content.lines().filter(|line| !line.trim().is_empty()).peekable();
        if let Some(first) = lines.peek() {
            if !first.trim_start().starts_with("id=") {
                return Err(EngineError::InvalidInput(
                    "hook log rows must start with 'id='".to_string(),
                ));
            }
        }

        let mut events = Vec::new();
        let mut skipped = 0usize;
        for line in lines {
            match parse_line(line) {
                Some(event) => events.push(event),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            log::debug!("Skipped {} unrecognised hook log rows", skipped);
        }
        Ok(events)
    }
}

impl InputEventSource for HookLog {
    fn events(&mut self) -> Result<Vec<InputEvent>> {
        log::info!("Reading hook log: {:?}", self.path);
        let content = fs::read_to_string(&self.path)?;
        Self::parse(&content)
    }
}

fn parse_line(line: &str) -> Option<InputEvent> {
    let fields: HashMap<&str, &str> = line
        .split(',')
        .filter_map(|pair| pair.trim().split_once('='))
        .collect();

    let id: u16 = fields.get("id")?.parse().ok()?;
    let millis: i64 = fields.get("when")?.parse().ok()?;
    let time = DateTime::from_timestamp_millis(millis)?
        .with_timezone(&Local)
        .naive_local();

    let number = |key: &str| -> Option<f32> { fields.get(key)?.parse().ok() };
    let code = |key: &str| -> Option<u16> { fields.get(key)?.parse().ok() };
    let position = || Some((number("x")?, number("y")?));

    let kind = match id {
        3 => InputEventKind::KeyTyped {
            keychar: fields.get("keychar")?.chars().next()?,
        },
        4 => InputEventKind::KeyPressed {
            keycode: code("keycode")?,
        },
        5 => InputEventKind::KeyReleased {
            keycode: code("keycode")?,
        },
        6..=8 => {
            let (x, y) = position()?;
            let button = code("button").unwrap_or(0);
            match id {
                6 => InputEventKind::MouseClicked { x, y, button },
                7 => InputEventKind::MousePressed { x, y, button },
                _ => InputEventKind::MouseReleased { x, y, button },
            }
        }
        9 => {
            let (x, y) = position()?;
            InputEventKind::MouseMoved { x, y }
        }
        10 => {
            let (x, y) = position()?;
            InputEventKind::MouseDragged { x, y }
        }
        11 => {
            let (x, y) = position()?;
            InputEventKind::MouseWheel { x, y }
        }
        _ => return None,
    };

    Some(InputEvent { time, kind })
}

/// Virtual key codes that can contribute to a typed word
pub fn can_form_word(keycode: u16) -> bool {
    matches!(
        keycode,
        // digits, minus, equals, backspace
        0x02..=0x0E
        // top letter row and brackets
        | 0x10..=0x1B
        // home row, semicolon, quote
        | 0x1E..=0x28
        // bottom row, comma, period, slash
        | 0x2C..=0x35
        // space
        | 0x39
    )
}

const BACKSPACE: char = '\u{8}';

/// A word typed between two word-breaking events
#[derive(Debug, Clone, PartialEq)]
pub struct TypedWord {
    pub text: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Groups keystrokes into words
///
/// Typed characters extend the current word while the last pressed key can form a word;
/// backspace removes the last character. Any other key press or any mouse event ends
/// the word. Whitespace-only words are dropped.
pub fn typed_words(events: &[InputEvent]) -> Vec<TypedWord> {
    let mut words = Vec::new();
    let mut current: Option<TypedWord> = None;
    let mut word_key = false;

    let mut flush = |current: &mut Option<TypedWord>| {
        if let Some(word) = current.take() {
            let text = word.text.trim().to_string();
            if !text.is_empty() {
                words.push(TypedWord { text, ..word });
            }
        }
    };

    for event in events {
        match &event.kind {
            InputEventKind::KeyPressed { keycode } => {
                word_key = can_form_word(*keycode);
                if !word_key {
                    flush(&mut current);
                }
            }
            InputEventKind::KeyTyped { keychar } if word_key => {
                let word = current.get_or_insert_with(|| TypedWord {
                    text: String::new(),
                    start: event.time,
                    end: event.time,
                });
                if *keychar == BACKSPACE {
                    word.text.pop();
                } else if keychar.is_whitespace() {
                    // A space ends the word
                    flush(&mut current);
                    continue;
                } else {
                    word.text.push(*keychar);
                }
                word.end = event.time;
            }
            InputEventKind::KeyTyped { .. } | InputEventKind::KeyReleased { .. } => {}
            _ => flush(&mut current),
        }
    }
    flush(&mut current);
    words
}
