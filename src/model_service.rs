use crate::cv_utils::{CvUtilsError, Frame};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Image transformation error: {0}")]
    Transform(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Annotation failed: {0}")]
    Annotation(#[from] CvUtilsError),
}

/// Raw model output for one object, in pixel coordinates of the input frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub class_id: u32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn as_xyxy(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

pub struct Inference {
    pub boxes: Vec<BoundingBox>,
    pub annotated: Frame,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// A loaded model shared by every request.
///
/// Implementations are called concurrently from the blocking pool and must not
/// keep per-request state.
pub trait ModelService: Send + Sync + 'static {
    fn infer(&self, frame: &Frame) -> Result<Inference, ModelError>;

    fn class_name(&self, class_id: u32) -> String;

    fn detections(&self, boxes: &[BoundingBox]) -> Vec<Detection> {
        boxes
            .iter()
            .map(|bbox| Detection {
                class_id: bbox.class_id,
                class_name: self.class_name(bbox.class_id),
                confidence: bbox.confidence,
                bbox: bbox.as_xyxy(),
            })
            .collect()
    }
}
