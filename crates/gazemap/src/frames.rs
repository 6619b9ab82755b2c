//! Sources of decoded scene-video frames.
//!
//! Decoding is sequential and stateful; registration of the decoded frames
//! happens elsewhere and in parallel.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::error::GazeMapError;

/// A sequential source of grayscale frames, in frame-index order.
pub trait FrameSource {
    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<GrayImage>, GazeMapError>;

    /// Number of frames left, when known.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Frames extracted to image files in one directory, ordered by file name.
#[derive(Debug)]
pub struct ImageSequence {
    paths: VecDeque<PathBuf>,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self, GazeMapError> {
        let entries = std::fs::read_dir(dir).map_err(|e| GazeMapError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| GazeMapError::io(dir, e))?.path();
            let is_frame = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_frame && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            return Err(GazeMapError::Config(format!(
                "no frame images ({}) in {}",
                FRAME_EXTENSIONS.join(", "),
                dir.display()
            )));
        }
        tracing::info!("Frame sequence: {} images in {}", paths.len(), dir.display());
        Ok(Self {
            paths: paths.into(),
        })
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into(),
        }
    }
}

/// Decode an image file to 8-bit grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, GazeMapError> {
    let img = image::open(path).map_err(|source| GazeMapError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_luma8())
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, GazeMapError> {
        match self.paths.pop_front() {
            Some(path) => load_gray(&path).map(Some),
            None => Ok(None),
        }
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}

/// Frames already decoded by the caller.
#[derive(Debug, Default)]
pub struct InMemoryFrames {
    frames: VecDeque<GrayImage>,
}

impl InMemoryFrames {
    pub fn new(frames: Vec<GrayImage>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameSource for InMemoryFrames {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, GazeMapError> {
        Ok(self.frames.pop_front())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.frames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn image_sequence_reads_frames_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, v) in [("frame_0002.png", 30u8), ("frame_0000.png", 10), ("frame_0001.png", 20)] {
            GrayImage::from_pixel(8, 6, Luma([v]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len_hint(), Some(3));
        let mut values = Vec::new();
        while let Some(frame) = seq.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (8, 6));
            values.push(frame.get_pixel(0, 0)[0]);
        }
        assert_eq!(values, vec![10, 20, 30]);
        assert_eq!(seq.len_hint(), Some(0));
    }

    #[test]
    fn empty_directory_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(dir.path()),
            Err(GazeMapError::Config(_))
        ));
    }

    #[test]
    fn undecodable_frame_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let mut seq = ImageSequence::from_paths(vec![path]);
        let err = seq.next_frame().unwrap_err();
        assert!(err.to_string().contains("broken.png"));
    }

    #[test]
    fn in_memory_frames_drain_in_order() {
        let mut src = InMemoryFrames::new(vec![GrayImage::new(2, 2), GrayImage::new(3, 3)]);
        assert_eq!(src.next_frame().unwrap().unwrap().width(), 2);
        assert_eq!(src.next_frame().unwrap().unwrap().width(), 3);
        assert!(src.next_frame().unwrap().is_none());
    }
}
