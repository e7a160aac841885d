//! Perception Sources
//!
//! The perception service turns camera images into landmark frames. Camera
//! drivers and landmark extraction live outside this crate; the cell only
//! sees the [`PerceptionSource`] trait.
//!
//! Two sources ship with the crate:
//! - [`ReplaySource`] replays a JSON-lines recording of per-image hand
//!   detections through slot assignment and calibration
//! - [`FrameListSource`] yields prepared frames from memory

use super::frame::{Calibration, HandLandmarks, LandmarkFrame, AXES, LANDMARKS_PER_HAND};
use super::hands::HandAssigner;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Upstream producer of normalized landmark frames
pub trait PerceptionSource: Send {
    /// Produce the next frame. `Ok(None)` means the stream has ended.
    fn next_frame_vector(&mut self) -> Result<Option<LandmarkFrame>>;

    /// Advance past one image without extracting landmarks.
    ///
    /// Returns false once the stream has ended.
    fn skip_frame(&mut self) -> Result<bool> {
        Ok(self.next_frame_vector()?.is_some())
    }

    /// Release the underlying device
    fn close(&mut self) {}
}

/// Replays recorded hand detections.
///
/// Each non-empty line holds the hands detected in one image as a JSON
/// array of hands, each hand being 21 `[x, y, z]` landmarks:
///
/// ```text
/// [[[0.41, 0.62, -0.01], ...], [[0.58, 0.60, 0.02], ...]]
/// ```
pub struct ReplaySource<R: BufRead + Send> {
    reader: R,
    assigner: HandAssigner,
    calibration: Calibration,
    line_number: usize,
    buffer: String,
}

impl ReplaySource<BufReader<File>> {
    /// Open a recording file
    pub fn open(path: &Path, calibration: Calibration) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::Perception(format!("cannot open recording {}: {}", path.display(), e))
        })?;
        Ok(Self::new(BufReader::new(file), calibration))
    }
}

impl<R: BufRead + Send> ReplaySource<R> {
    /// Replay from any buffered reader
    pub fn new(reader: R, calibration: Calibration) -> Self {
        Self {
            reader,
            assigner: HandAssigner::new(),
            calibration,
            line_number: 0,
            buffer: String::new(),
        }
    }

    /// Read the next non-empty line into the buffer. Returns false at EOF.
    fn read_line(&mut self) -> Result<bool> {
        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer)? == 0 {
                return Ok(false);
            }
            self.line_number += 1;
            if !self.buffer.trim().is_empty() {
                return Ok(true);
            }
        }
    }

    fn parse_detections(&self) -> Result<Vec<HandLandmarks>> {
        let raw: Vec<Vec<[f32; AXES]>> = serde_json::from_str(self.buffer.trim())
            .map_err(|e| Error::Perception(format!("line {}: {}", self.line_number, e)))?;

        raw.into_iter()
            .map(|hand| {
                let count = hand.len();
                let landmarks: HandLandmarks = hand.try_into().map_err(|_| {
                    Error::Perception(format!(
                        "line {}: hand has {} landmarks, expected {}",
                        self.line_number, count, LANDMARKS_PER_HAND
                    ))
                })?;
                Ok(landmarks)
            })
            .collect()
    }
}

impl<R: BufRead + Send> PerceptionSource for ReplaySource<R> {
    fn next_frame_vector(&mut self) -> Result<Option<LandmarkFrame>> {
        if !self.read_line()? {
            return Ok(None);
        }
        let detections = self.parse_detections()?;
        let frame = self.assigner.assign(&detections);
        Ok(Some(self.calibration.normalize(&frame)))
    }

    fn skip_frame(&mut self) -> Result<bool> {
        self.read_line()
    }
}

/// Yields prepared frames in order, then ends
#[derive(Debug, Default)]
pub struct FrameListSource {
    frames: VecDeque<LandmarkFrame>,
}

impl FrameListSource {
    pub fn new(frames: impl IntoIterator<Item = LandmarkFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Frames not yet produced
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl PerceptionSource for FrameListSource {
    fn next_frame_vector(&mut self) -> Result<Option<LandmarkFrame>> {
        Ok(self.frames.pop_front())
    }
}
