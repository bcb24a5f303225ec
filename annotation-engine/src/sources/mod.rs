//! External collaborators and on-disk inputs
//!
//! The engine never decodes video or recognises pixels itself. This module defines the
//! interfaces it consumes (frame source, template matcher, text recogniser,
//! accessibility snapshots, input events) and the readers for the on-disk inputs it
//! understands: logged series tables, hook logs, accessibility snapshot logs and image
//! sequences.

use image::{GrayImage, RgbImage};
use std::path::Path;

use crate::types::{MatchLocation, Result};

pub mod accessibility;
pub mod hooks;
pub mod image_sequence;
pub mod logged;

#[cfg(test)]
pub(crate) mod mock;

// Re-export reader types
pub use accessibility::{AccessibilitySource, AxElement, AxSnapshot, SnapshotLog};
pub use hooks::{typed_words, HookLog, InputEvent, InputEventKind, InputEventSource, TypedWord};
pub use image_sequence::{ImageSequenceProvider, ImageSequenceSource};
pub use logged::{FirstMinute, LoggedAnnotation, LoggedColumn, LoggedFile, LoggedTable};

/// One decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame number in the source
    pub number: usize,
    pub image: RgbImage,
}

/// Seekable source of decoded frames
pub trait FrameSource {
    /// Total number of frames in the source
    fn frame_count(&self) -> usize;

    /// Frames per second
    fn fps(&self) -> f32;

    /// Frame width and height in pixels
    fn dimensions(&self) -> (u32, u32);

    /// Positions the source so the next `read` returns `frame`; false on failure
    fn seek(&mut self, frame: usize) -> bool;

    /// Decodes the frame at the current position and advances by one
    fn read(&mut self) -> Option<Frame>;
}

/// Opens frame sources by path (used to cut templates out of other recordings)
pub trait FrameSourceProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// Template-matching primitive
pub trait TemplateMatcher {
    /// Best match of `template` inside `region`, in region coordinates
    fn match_template(&mut self, region: &GrayImage, template: &GrayImage) -> MatchLocation;
}

/// Character set hint passed to the text recogniser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetHint {
    Digits,
    Time,
    Alphabetic,
}

impl CharsetHint {
    /// Characters the recogniser should restrict itself to
    pub fn whitelist(&self) -> &'static str {
        match self {
            CharsetHint::Digits => "0123456789",
            CharsetHint::Time => "0123456789:-.",
            CharsetHint::Alphabetic => "abcdefghijklmnopqrstuvwxyz",
        }
    }
}

/// Text-recognition primitive
pub trait TextRecognizer {
    fn recognize(&mut self, region: &GrayImage, hint: CharsetHint) -> String;
}
