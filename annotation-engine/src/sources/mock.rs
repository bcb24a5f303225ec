//! Scripted collaborators for unit tests
//!
//! Mock frames are filled with a grey level equal to the frame number, so the matcher
//! and recogniser can tell which frame a region came from.

use image::{GrayImage, Rgb, RgbImage};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::{CharsetHint, Frame, FrameSource, TemplateMatcher, TextRecognizer};
use crate::types::MatchLocation;

/// Calls observed by the mocks
#[derive(Debug, Default)]
pub struct Calls {
    pub reads: Vec<usize>,
    pub seeks: Vec<usize>,
    pub matches: Vec<usize>,
    pub recognitions: Vec<(usize, CharsetHint)>,
}

pub type CallLog = Rc<RefCell<Calls>>;

pub struct MockFrames {
    pub count: usize,
    pub fps: f32,
    pub width: u32,
    pub height: u32,
    pub failing: HashSet<usize>,
    position: usize,
    calls: CallLog,
}

impl MockFrames {
    pub fn new(count: usize, calls: &CallLog) -> Self {
        Self {
            count,
            fps: 10.0,
            width: 64,
            height: 48,
            failing: HashSet::new(),
            position: 0,
            calls: Rc::clone(calls),
        }
    }

    pub fn failing_at(mut self, frames: &[usize]) -> Self {
        self.failing.extend(frames.iter().copied());
        self
    }
}

impl FrameSource for MockFrames {
    fn frame_count(&self) -> usize {
        self.count
    }

    fn fps(&self) -> f32 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn seek(&mut self, frame: usize) -> bool {
        self.calls.borrow_mut().seeks.push(frame);
        if frame >= self.count || self.failing.contains(&frame) {
            return false;
        }
        self.position = frame;
        true
    }

    fn read(&mut self) -> Option<Frame> {
        let number = self.position;
        self.calls.borrow_mut().reads.push(number);
        self.position += 1;
        if number >= self.count || self.failing.contains(&number) {
            return None;
        }
        let level = (number % 256) as u8;
        Some(Frame {
            number,
            image: RgbImage::from_pixel(self.width, self.height, Rgb([level, level, level])),
        })
    }
}

fn frame_of(region: &GrayImage) -> usize {
    region.get_pixel(0, 0).0[0] as usize
}

/// Returns a scripted confidence per frame (0 when unscripted)
pub struct MockMatcher {
    pub confidences: HashMap<usize, f32>,
    calls: CallLog,
}

impl MockMatcher {
    pub fn new(confidences: &[(usize, f32)], calls: &CallLog) -> Self {
        Self {
            confidences: confidences.iter().copied().collect(),
            calls: Rc::clone(calls),
        }
    }
}

impl TemplateMatcher for MockMatcher {
    fn match_template(&mut self, region: &GrayImage, _template: &GrayImage) -> MatchLocation {
        let frame = frame_of(region);
        self.calls.borrow_mut().matches.push(frame);
        MatchLocation {
            x: 2.0,
            y: 3.0,
            confidence: self.confidences.get(&frame).copied().unwrap_or(0.0),
        }
    }
}

/// Returns scripted text per frame (empty when unscripted)
pub struct MockRecognizer {
    pub texts: HashMap<usize, String>,
    calls: CallLog,
}

impl MockRecognizer {
    pub fn new(texts: &[(usize, &str)], calls: &CallLog) -> Self {
        Self {
            texts: texts.iter().map(|(f, t)| (*f, t.to_string())).collect(),
            calls: Rc::clone(calls),
        }
    }
}

impl TextRecognizer for MockRecognizer {
    fn recognize(&mut self, region: &GrayImage, hint: CharsetHint) -> String {
        let frame = frame_of(region);
        self.calls.borrow_mut().recognitions.push((frame, hint));
        self.texts.get(&frame).cloned().unwrap_or_default()
    }
}
