use crate::{
    error::PredictError,
    media::Upload,
    pipeline::{
        image::validate_image, predict_rendered, predict_structured, process_video,
        video::validate_video, PredictionResponse,
    },
    server::SharedState,
};
use axum::{
    body::Body,
    extract::{Multipart, State},
    http::header,
    response::Response,
    Json,
};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::instrument;

const IMAGE_ROUTE: &str = "/predict/image";
const IMAGE_JSON_ROUTE: &str = "/predict/image/json";
const VIDEO_ROUTE: &str = "/predict/video";

async fn read_upload(mut multipart: Multipart) -> Result<Upload, PredictError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictError::MalformedUpload(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| PredictError::MalformedUpload(format!("Failed to read file: {}", e)))?;

        return Ok(Upload {
            bytes,
            content_type,
            file_name,
        });
    }

    Err(PredictError::MalformedUpload(
        "No file field in request".to_string(),
    ))
}

/// Runs a pipeline on the blocking pool; inference and codec calls are CPU
/// bound and synchronous.
async fn run_blocking<T, F>(job: F) -> Result<T, PredictError>
where
    F: FnOnce() -> Result<T, PredictError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| PredictError::Processing(format!("Prediction task failed: {}", e)))?
}

pub async fn test() -> Json<Value> {
    Json(json!({ "message": "Test endpoint works!" }))
}

#[instrument(skip(state, multipart))]
pub async fn predict_image(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Response, PredictError> {
    state.metrics.record_request(IMAGE_ROUTE);
    let upload = read_upload(multipart).await?;
    validate_image(&upload)?;

    let start = Instant::now();
    let model = state.model_service.clone();
    let rendered = run_blocking(move || predict_rendered(model.as_ref(), &upload)).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, IMAGE_ROUTE);
    state
        .metrics
        .record_detections(rendered.total_detections, IMAGE_ROUTE);

    Response::builder()
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header("X-Total-Detections", rendered.total_detections)
        .header(
            "X-Processing-Time",
            rendered.processing_time.as_secs_f64().to_string(),
        )
        .header("X-Image-Width", rendered.image_width)
        .header("X-Image-Height", rendered.image_height)
        .body(Body::from(rendered.jpeg))
        .map_err(PredictError::processing_image)
}

#[instrument(skip(state, multipart))]
pub async fn predict_image_json(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictError> {
    state.metrics.record_request(IMAGE_JSON_ROUTE);
    let upload = read_upload(multipart).await?;
    validate_image(&upload)?;

    let start = Instant::now();
    let model = state.model_service.clone();
    let response = run_blocking(move || predict_structured(model.as_ref(), &upload)).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, IMAGE_JSON_ROUTE);
    state
        .metrics
        .record_detections(response.total_detections, IMAGE_JSON_ROUTE);

    Ok(Json(response))
}

#[instrument(skip(state, multipart))]
pub async fn predict_video(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Response, PredictError> {
    state.metrics.record_request(VIDEO_ROUTE);
    let upload = read_upload(multipart).await?;
    validate_video(&upload)?;

    let start = Instant::now();
    let model = state.model_service.clone();
    let codec = state.codec.clone();
    let temp_dir = state.temp_dir.clone();
    let output = run_blocking(move || {
        process_video(model.as_ref(), codec.as_ref(), &upload, temp_dir.as_deref())
    })
    .await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, VIDEO_ROUTE);
    state
        .metrics
        .record_detections(output.total_detections, VIDEO_ROUTE);
    state.metrics.record_frames(output.frame_count);

    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header("X-Total-Detections", output.total_detections)
        .header("X-Total-Frames", output.frame_count)
        .header("X-FPS", output.fps)
        .header("X-Width", output.width)
        .header("X-Height", output.height)
        .body(Body::from(output.bytes))
        .map_err(PredictError::processing_video)
}
