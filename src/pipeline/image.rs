use crate::{
    cv_utils::Frame,
    error::PredictError,
    media::Upload,
    model_service::{Detection, ModelService},
};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResponse {
    pub detections: Vec<Detection>,
    pub total_detections: usize,
    pub image_width: u32,
    pub image_height: u32,
    pub processing_time: f64,
}

/// Annotated JPEG plus the metadata sent as response headers.
#[derive(Debug)]
pub struct RenderedImage {
    pub jpeg: Vec<u8>,
    pub total_detections: usize,
    pub processing_time: Duration,
    pub image_width: u32,
    pub image_height: u32,
}

struct ImagePrediction {
    detections: Vec<Detection>,
    annotated: Frame,
    image_width: u32,
    image_height: u32,
    processing_time: Duration,
}

pub fn validate_image(upload: &Upload) -> Result<(), PredictError> {
    if !upload.declares_image() {
        return Err(PredictError::InvalidMediaType(
            "File must be an image".to_string(),
        ));
    }
    Ok(())
}

fn run(model: &dyn ModelService, upload: &Upload) -> Result<ImagePrediction, PredictError> {
    validate_image(upload)?;

    let frame = Frame::decode(&upload.bytes).map_err(|e| {
        tracing::debug!("Image decode failed: {}", e);
        PredictError::Decode("Invalid image file".to_string())
    })?;

    let start = Instant::now();
    let inference = model.infer(&frame).map_err(PredictError::processing_image)?;
    let processing_time = start.elapsed();

    let detections = model.detections(&inference.boxes);
    tracing::debug!(
        "Image {}x{}: {} detections in {:?}",
        frame.width(),
        frame.height(),
        detections.len(),
        processing_time
    );

    Ok(ImagePrediction {
        detections,
        annotated: inference.annotated,
        image_width: frame.width(),
        image_height: frame.height(),
        processing_time,
    })
}

#[instrument(skip(model, upload), fields(bytes = upload.bytes.len()))]
pub fn predict_structured(
    model: &dyn ModelService,
    upload: &Upload,
) -> Result<PredictionResponse, PredictError> {
    let prediction = run(model, upload)?;

    Ok(PredictionResponse {
        total_detections: prediction.detections.len(),
        detections: prediction.detections,
        image_width: prediction.image_width,
        image_height: prediction.image_height,
        processing_time: prediction.processing_time.as_secs_f64(),
    })
}

#[instrument(skip(model, upload), fields(bytes = upload.bytes.len()))]
pub fn predict_rendered(
    model: &dyn ModelService,
    upload: &Upload,
) -> Result<RenderedImage, PredictError> {
    let prediction = run(model, upload)?;
    let jpeg = prediction
        .annotated
        .to_jpg()
        .map_err(PredictError::processing_image)?;

    Ok(RenderedImage {
        jpeg,
        total_detections: prediction.detections.len(),
        processing_time: prediction.processing_time,
        image_width: prediction.image_width,
        image_height: prediction.image_height,
    })
}
