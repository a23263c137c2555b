use crate::{
    cv_utils::{CvUtilsError, Frame},
    media::ContainerFormat,
};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio,
};
use std::path::Path;
use thiserror::Error;

const DEFAULT_FPS: i32 = 30;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to open video: {0}")]
    OpenFailed(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(String),
    #[error("Failed to write frame: {0}")]
    WriteFrameFailed(String),
    #[error("Frame error: {0}")]
    Frame(#[from] CvUtilsError),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProps {
    pub fps: i32,
    pub width: u32,
    pub height: u32,
}

impl StreamProps {
    /// Frame rate to encode with; containers without usable timing are
    /// written at 30 fps.
    pub fn output_fps(&self) -> i32 {
        if self.fps > 0 {
            self.fps
        } else {
            DEFAULT_FPS
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCc(pub [char; 4]);

impl FourCc {
    /// MPEG-4 Part 2 in an MP4 container.
    pub const MP4V: FourCc = FourCc(['m', 'p', '4', 'v']);
}

pub trait FrameReader {
    fn props(&self) -> StreamProps;

    /// `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, CodecError>;
}

pub trait FrameWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), CodecError>;

    /// Flushes the container trailer and closes the file.
    fn finish(self: Box<Self>) -> Result<(), CodecError>;
}

pub trait VideoCodec: Send + Sync + 'static {
    fn open_reader(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> Result<Box<dyn FrameReader>, CodecError>;

    fn open_writer(
        &self,
        path: &Path,
        fourcc: FourCc,
        props: StreamProps,
    ) -> Result<Box<dyn FrameWriter>, CodecError>;
}

/// OpenCV preferred capture backend per container.
fn capture_api(format: ContainerFormat) -> i32 {
    match format {
        ContainerFormat::Avi => videoio::CAP_ANY,
        _ => videoio::CAP_FFMPEG,
    }
}

fn path_str(path: &Path) -> Result<&str, CodecError> {
    path.to_str()
        .ok_or_else(|| CodecError::OpenFailed(format!("non UTF-8 path {:?}", path)))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvCodec;

impl VideoCodec for OpenCvCodec {
    fn open_reader(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> Result<Box<dyn FrameReader>, CodecError> {
        let filename = path_str(path)?;
        let mut capture = videoio::VideoCapture::from_file(filename, capture_api(format))?;
        if !capture.is_opened()? {
            tracing::debug!(
                "Preferred backend could not open {:?}, falling back to CAP_ANY",
                format
            );
            capture = videoio::VideoCapture::from_file(filename, videoio::CAP_ANY)?;
        }
        if !capture.is_opened()? {
            return Err(CodecError::OpenFailed(format!(
                "cannot open {} input",
                format.extension()
            )));
        }

        let props = StreamProps {
            fps: capture.get(videoio::CAP_PROP_FPS)? as i32,
            width: capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32,
            height: capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32,
        };

        Ok(Box::new(OpenCvReader { capture, props }))
    }

    fn open_writer(
        &self,
        path: &Path,
        fourcc: FourCc,
        props: StreamProps,
    ) -> Result<Box<dyn FrameWriter>, CodecError> {
        let [a, b, c, d] = fourcc.0;
        let code = videoio::VideoWriter::fourcc(a, b, c, d)?;
        let writer = videoio::VideoWriter::new(
            path_str(path)?,
            code,
            props.output_fps() as f64,
            Size::new(props.width as i32, props.height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(CodecError::OpenFailed(format!(
                "cannot open writer {}x{} @ {} fps",
                props.width,
                props.height,
                props.output_fps()
            )));
        }

        Ok(Box::new(OpenCvWriter { writer }))
    }
}

struct OpenCvReader {
    capture: videoio::VideoCapture,
    props: StreamProps,
}

impl FrameReader for OpenCvReader {
    fn props(&self) -> StreamProps {
        self.props
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        let mut mat = Mat::default();
        let grabbed = self
            .capture
            .read(&mut mat)
            .map_err(|e| CodecError::ReadFrameFailed(e.to_string()))?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }
        Ok(Some(Frame::from_mat(mat)?))
    }
}

impl Drop for OpenCvReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release video capture: {}", e);
        }
    }
}

struct OpenCvWriter {
    writer: videoio::VideoWriter,
}

impl FrameWriter for OpenCvWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), CodecError> {
        self.writer
            .write(frame.mat())
            .map_err(|e| CodecError::WriteFrameFailed(e.to_string()))
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.writer.release()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{media::Upload, pipeline::process_video, testing::MockModelService};
    use opencv::core::{self, Scalar};

    #[test]
    fn test_output_fps_fallback() {
        let props = StreamProps {
            fps: 0,
            width: 10,
            height: 10,
        };
        assert_eq!(props.output_fps(), 30);
        assert_eq!(StreamProps { fps: 25, ..props }.output_fps(), 25);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let result = OpenCvCodec.open_reader(
            Path::new("/nonexistent/definitely-missing.mp4"),
            ContainerFormat::Mp4,
        );
        assert!(result.is_err());
    }

    fn write_avi(path: &Path, frames: usize, width: i32, height: i32) {
        let code = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer = videoio::VideoWriter::new(
            path.to_str().unwrap(),
            code,
            10.0,
            Size::new(width, height),
            true,
        )
        .unwrap();
        assert!(writer.is_opened().unwrap());
        for i in 0..frames {
            let mat = Mat::new_rows_cols_with_default(
                height,
                width,
                core::CV_8UC3,
                Scalar::new(0.0, (i * 20) as f64, 255.0, 0.0),
            )
            .unwrap();
            writer.write(&mat).unwrap();
        }
        writer.release().unwrap();
    }

    #[test]
    fn test_opencv_round_trip_keeps_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.avi");
        write_avi(&source, 6, 64, 48);

        let upload = Upload {
            bytes: std::fs::read(&source).unwrap().into(),
            content_type: Some("video/x-msvideo".to_string()),
            file_name: Some("source.avi".to_string()),
        };
        let work_dir = tempfile::tempdir().unwrap();
        let model = MockModelService::default();

        let output = process_video(&model, &OpenCvCodec, &upload, Some(work_dir.path())).unwrap();

        assert_eq!(output.frame_count, 6);
        assert_eq!(model.calls(), 6);
        assert_eq!((output.width, output.height), (64, 48));
        assert_eq!(output.fps, 10);
        assert_eq!(std::fs::read_dir(work_dir.path()).unwrap().count(), 0);

        let annotated = dir.path().join("annotated.mp4");
        std::fs::write(&annotated, &output.bytes).unwrap();
        let mut reader = OpenCvCodec
            .open_reader(&annotated, ContainerFormat::Mp4)
            .unwrap();
        let props = reader.props();
        assert_eq!((props.width, props.height), (64, 48));

        let mut decoded = 0;
        while let Some(frame) = reader.next_frame().unwrap() {
            assert_eq!((frame.width(), frame.height()), (64, 48));
            decoded += 1;
        }
        assert_eq!(decoded, 6);
    }
}
