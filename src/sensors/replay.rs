//! Scripted collaborators that replay recorded detections.
//!
//! A replay script is JSON lines, one [`DetectionSnapshot`] per line with an
//! optional `hold` count repeating it for that many frames:
//!
//! ```text
//! {"objects": {"detected_labels": ["Person"], "counts": {"Person": 1}}, "hold": 10}
//! {"face": {"matched": true, "person_id": 7, "name": "Ada", "face_location": {"top": 0, "right": 10, "bottom": 10, "left": 0}}}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Frame `n` maps to
//! script entry `n`; with `repeat` the script wraps around.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{Camera, FaceRecognizer, Frame, ObjectDetector, SensorError, SensorProvider};
use crate::gate::{DetectionSnapshot, FaceResult, ObjectResult};

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

#[derive(Deserialize)]
struct ScriptLine {
    #[serde(flatten)]
    snapshot: DetectionSnapshot,
    #[serde(default = "default_hold")]
    hold: u32,
}

fn default_hold() -> u32 {
    1
}

/// Parsed replay script, one snapshot per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayScript {
    frames: Vec<DetectionSnapshot>,
    repeat: bool,
}

impl ReplayScript {
    /// Script from explicit per-frame snapshots.
    pub fn from_frames(frames: Vec<DetectionSnapshot>, repeat: bool) -> Self {
        Self { frames, repeat }
    }

    /// Parse JSON-lines script text.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first malformed line.
    pub fn parse(text: &str, repeat: bool) -> anyhow::Result<Self> {
        let mut frames = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed: ScriptLine = serde_json::from_str(trimmed)
                .with_context(|| format!("invalid replay line {}", index.saturating_add(1)))?;
            for _ in 0..parsed.hold {
                frames.push(parsed.snapshot.clone());
            }
        }
        Ok(Self { frames, repeat })
    }

    /// Load a script file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path, repeat: bool) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay script {}", path.display()))?;
        Self::parse(&text, repeat)
            .with_context(|| format!("failed to parse replay script {}", path.display()))
    }

    /// Number of frames before wrap-around.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the script has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn frame(&self, sequence: u64) -> Option<&DetectionSnapshot> {
        let len = u64::try_from(self.frames.len()).ok().filter(|len| *len > 0)?;
        let index = if self.repeat {
            sequence.checked_rem(len)?
        } else {
            sequence
        };
        usize::try_from(index).ok().and_then(|i| self.frames.get(i))
    }
}

/// [`SensorProvider`] serving a [`ReplayScript`].
#[derive(Debug, Clone)]
pub struct ReplaySensors {
    script: Arc<ReplayScript>,
}

impl ReplaySensors {
    /// Provider replaying `script`.
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script: Arc::new(script),
        }
    }
}

#[async_trait]
impl SensorProvider for ReplaySensors {
    async fn open_camera(&self) -> Result<Arc<dyn Camera>, SensorError> {
        if self.script.is_empty() {
            return Err(SensorError::Unavailable {
                resource: "camera",
                reason: "replay script has no frames".to_owned(),
            });
        }
        Ok(Arc::new(ReplayCamera {
            script: Arc::clone(&self.script),
            next: AtomicU64::new(0),
            released: AtomicBool::new(false),
        }))
    }

    async fn load_detector(&self) -> Result<Arc<dyn ObjectDetector>, SensorError> {
        Ok(Arc::new(ReplayDetector {
            script: Arc::clone(&self.script),
        }))
    }

    async fn load_recognizer(&self) -> Result<Arc<dyn FaceRecognizer>, SensorError> {
        Ok(Arc::new(ReplayRecognizer {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ReplayCamera {
    script: Arc<ReplayScript>,
    next: AtomicU64,
    released: AtomicBool,
}

#[async_trait]
impl Camera for ReplayCamera {
    async fn read_frame(&self) -> Result<Frame, SensorError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SensorError::Unavailable {
                resource: "camera",
                reason: "released".to_owned(),
            });
        }
        let sequence = self.next.fetch_add(1, Ordering::SeqCst);
        if self.script.frame(sequence).is_none() {
            return Err(SensorError::FrameRead(format!(
                "replay script exhausted after {} frames",
                self.script.len()
            )));
        }
        Ok(Frame {
            sequence,
            captured_at: Utc::now(),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            pixels: Vec::new(),
        })
    }

    fn release(&self) -> Result<(), SensorError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ReplayDetector {
    script: Arc<ReplayScript>,
}

#[async_trait]
impl ObjectDetector for ReplayDetector {
    async fn detect(&self, frame: &Frame) -> Result<ObjectResult, SensorError> {
        self.script
            .frame(frame.sequence)
            .map(|snapshot| snapshot.objects.clone())
            .ok_or_else(|| SensorError::Inference(format!("no script entry for frame {}", frame.sequence)))
    }
}

struct ReplayRecognizer {
    script: Arc<ReplayScript>,
}

#[async_trait]
impl FaceRecognizer for ReplayRecognizer {
    async fn identify(&self, frame: &Frame) -> Result<Option<FaceResult>, SensorError> {
        self.script
            .frame(frame.sequence)
            .map(|snapshot| snapshot.face.clone())
            .ok_or_else(|| SensorError::Inference(format!("no script entry for frame {}", frame.sequence)))
    }
}
