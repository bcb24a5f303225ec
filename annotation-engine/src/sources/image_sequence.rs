//! Frame source over a directory of numbered still images
//!
//! Frames extracted from a recording (`frame_000001.png`, ...) are read in file name
//! order. Seeking is free; decoding opens one image.

use std::fs;
use std::path::{Path, PathBuf};

use super::{Frame, FrameSource, FrameSourceProvider};
use crate::types::{EngineError, Result};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Seekable frame source backed by image files
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    fps: f32,
    dimensions: (u32, u32),
    position: usize,
}

impl ImageSequenceSource {
    /// Opens the images in `dir`, played back at `fps`
    pub fn open(dir: &Path, fps: f32) -> Result<Self> {
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        let first = frames.first().ok_or_else(|| {
            EngineError::InvalidInput(format!("no frame images found in {:?}", dir))
        })?;
        let dimensions = image::image_dimensions(first)?;

        log::info!(
            "Opened image sequence {:?}: {} frames, {}x{} at {} fps",
            dir,
            frames.len(),
            dimensions.0,
            dimensions.1,
            fps
        );

        Ok(Self {
            frames,
            fps,
            dimensions,
            position: 0,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn fps(&self) -> f32 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn seek(&mut self, frame: usize) -> bool {
        if frame < self.frames.len() {
            self.position = frame;
            true
        } else {
            false
        }
    }

    fn read(&mut self) -> Option<Frame> {
        let path = self.frames.get(self.position)?;
        let number = self.position;
        self.position += 1;
        match image::open(path) {
            Ok(image) => Some(Frame {
                number,
                image: image.to_rgb8(),
            }),
            Err(e) => {
                log::warn!("Failed to decode frame {} from {:?}: {}", number, path, e);
                None
            }
        }
    }
}

/// Opens image-sequence directories at a fixed frame rate
#[derive(Debug, Clone, Copy)]
pub struct ImageSequenceProvider {
    pub fps: f32,
}

impl ImageSequenceProvider {
    pub fn new(fps: f32) -> Self {
        Self { fps }
    }
}

impl FrameSourceProvider for ImageSequenceProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(ImageSequenceSource::open(path, self.fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_sequence_seek_and_read() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3u8 {
            let image = RgbImage::from_pixel(8, 6, Rgb([i * 50, 0, 0]));
            image
                .save(dir.path().join(format!("frame_{:04}.png", i)))
                .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 25.0).unwrap();
        assert_eq!(source.frame_count(), 3);
        assert_eq!(source.dimensions(), (8, 6));

        let first = source.read().unwrap();
        assert_eq!(first.number, 0);

        assert!(source.seek(2));
        let third = source.read().unwrap();
        assert_eq!(third.number, 2);
        assert_eq!(third.image.get_pixel(0, 0), &Rgb([100, 0, 0]));
        assert!(source.read().is_none());
        assert!(!source.seek(3));
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path(), 25.0).is_err());
    }
}
