//! Perception collaborators: camera, object detector, face recognizer.
//!
//! The gate never looks at pixels. It asks a [`SensorProvider`] for handles
//! at start-up and pulls one frame plus recognizer outputs per cycle.
//! Acquisition may block for model loading; per-frame calls may be slow.

pub mod replay;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::gate::{FaceResult, ObjectResult};

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Monotonic frame number since the camera was opened.
    pub sequence: u64,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Raw pixel data in the camera's native layout.
    pub pixels: Vec<u8>,
}

/// Errors produced by perception collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// A resource could not be acquired or has been released.
    #[error("{resource} unavailable: {reason}")]
    Unavailable {
        /// Which resource.
        resource: &'static str,
        /// Why.
        reason: String,
    },
    /// A frame could not be read.
    #[error("failed to read frame: {0}")]
    FrameRead(String),
    /// A model call failed on a frame.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Frame source.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture the next frame.
    async fn read_frame(&self) -> Result<Frame, SensorError>;

    /// Release the device. Later reads fail with [`SensorError::Unavailable`].
    fn release(&self) -> Result<(), SensorError>;
}

/// Equipment and occupant detector.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect labelled objects in `frame`.
    async fn detect(&self, frame: &Frame) -> Result<ObjectResult, SensorError>;

    /// Free model resources.
    fn release(&self) {}
}

/// Face matcher.
#[async_trait]
pub trait FaceRecognizer: Send + Sync {
    /// Locate and match a face in `frame`. `Ok(None)` means no face.
    async fn identify(&self, frame: &Frame) -> Result<Option<FaceResult>, SensorError>;

    /// Free model resources.
    fn release(&self) {}
}

/// Factory for collaborator handles.
#[async_trait]
pub trait SensorProvider: Send + Sync {
    /// Open the camera.
    async fn open_camera(&self) -> Result<Arc<dyn Camera>, SensorError>;

    /// Load the object detector.
    async fn load_detector(&self) -> Result<Arc<dyn ObjectDetector>, SensorError>;

    /// Load the face recognizer.
    async fn load_recognizer(&self) -> Result<Arc<dyn FaceRecognizer>, SensorError>;
}
