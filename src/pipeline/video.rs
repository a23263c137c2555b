use crate::{
    error::PredictError,
    media::{ContainerFormat, Upload},
    model_service::ModelService,
    video::{FourCc, VideoCodec},
};
use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::TempPath;
use tracing::instrument;

#[derive(Debug)]
pub struct VideoOutput {
    pub bytes: Vec<u8>,
    pub total_detections: usize,
    pub frame_count: u64,
    pub fps: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Staged,
    Streaming { frame: u64 },
    Finalizing,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStage::Received => write!(f, "received"),
            JobStage::Staged => write!(f, "staged"),
            JobStage::Streaming { frame } => write!(f, "streaming frame {}", frame),
            JobStage::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Transient files of one video request. Both paths are removed when the job
/// is dropped, whichever way the request ends.
struct VideoJob {
    input: TempPath,
    output: TempPath,
    format: ContainerFormat,
    stage: JobStage,
}

impl VideoJob {
    fn stage(
        upload: &Upload,
        format: ContainerFormat,
        temp_dir: &Path,
    ) -> std::io::Result<Self> {
        let mut input = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!(".{}", format.extension()))
            .tempfile_in(temp_dir)?;
        input.write_all(&upload.bytes)?;
        input.flush()?;
        let input = input.into_temp_path();

        let output = tempfile::Builder::new()
            .prefix("annotated-")
            .suffix(".mp4")
            .tempfile_in(temp_dir)?
            .into_temp_path();

        Ok(Self {
            input,
            output,
            format,
            stage: JobStage::Staged,
        })
    }

    fn fail(&self, cause: impl fmt::Display) -> PredictError {
        tracing::debug!("Video job failed while {}: {}", self.stage, cause);
        PredictError::processing_video(cause)
    }
}

pub fn validate_video(upload: &Upload) -> Result<ContainerFormat, PredictError> {
    if upload.declares_video() || upload.extension_format().is_some() {
        return Ok(ContainerFormat::for_upload(upload));
    }
    Err(PredictError::InvalidMediaType(
        "File must be a video".to_string(),
    ))
}

#[instrument(skip(model, codec, upload), fields(bytes = upload.bytes.len()))]
pub fn process_video(
    model: &dyn ModelService,
    codec: &dyn VideoCodec,
    upload: &Upload,
    temp_dir: Option<&Path>,
) -> Result<VideoOutput, PredictError> {
    let format = validate_video(upload)?;
    let temp_dir = temp_dir.map(PathBuf::from).unwrap_or_else(std::env::temp_dir);

    tracing::debug!("Video job {}: {:?} upload", JobStage::Received, format);
    let mut job = VideoJob::stage(upload, format, &temp_dir).map_err(PredictError::processing_video)?;

    let mut reader = codec
        .open_reader(&job.input, job.format)
        .map_err(|e| job.fail(e))?;
    let props = reader.props();
    let mut writer = codec
        .open_writer(&job.output, FourCc::MP4V, props)
        .map_err(|e| job.fail(e))?;

    let fps = props.output_fps();
    tracing::info!(
        "Processing video {}x{} @ {} fps (container reports {})",
        props.width,
        props.height,
        fps,
        props.fps
    );

    let mut total_detections = 0;
    let mut frame_count = 0;
    loop {
        job.stage = JobStage::Streaming { frame: frame_count };
        let Some(frame) = reader.next_frame().map_err(|e| job.fail(e))? else {
            break;
        };
        let inference = model.infer(&frame).map_err(|e| job.fail(e))?;
        total_detections += inference.boxes.len();
        frame_count += 1;
        writer
            .write(&inference.annotated)
            .map_err(|e| job.fail(e))?;
    }

    job.stage = JobStage::Finalizing;
    drop(reader);
    writer.finish().map_err(|e| job.fail(e))?;
    let bytes = std::fs::read(&job.output).map_err(|e| job.fail(e))?;

    tracing::info!(
        "Video completed: {} frames, {} detections, {} bytes",
        frame_count,
        total_detections,
        bytes.len()
    );

    Ok(VideoOutput {
        bytes,
        total_detections,
        frame_count,
        fps,
        width: props.width,
        height: props.height,
    })
}
