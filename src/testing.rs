use crate::{
    cv_utils::Frame,
    media::ContainerFormat,
    model_service::{BoundingBox, Inference, ModelError, ModelService},
    video::{CodecError, FourCc, FrameReader, FrameWriter, StreamProps, VideoCodec},
};
use image::{ImageBuffer, Rgb, RgbImage};
use parking_lot::Mutex;
use std::{
    fs::File,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

const CLASSES: [&str; 4] = ["D00", "D10", "D20", "D40"];

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([255, 0, 0]));
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
    cursor.into_inner()
}

/// Deterministic model: two boxes derived from the frame size.
#[derive(Default)]
pub struct MockModelService {
    fail_from_call: Option<usize>,
    calls: AtomicUsize,
}

impl MockModelService {
    pub fn failing_from_call(call: usize) -> Self {
        Self {
            fail_from_call: Some(call),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn expected_boxes(width: u32, height: u32) -> Vec<BoundingBox> {
        let (w, h) = (width as f32, height as f32);
        vec![
            BoundingBox {
                class_id: 0,
                confidence: 0.9,
                x1: 0.,
                y1: 0.,
                x2: w / 2.,
                y2: h / 2.,
            },
            BoundingBox {
                class_id: 3,
                confidence: 0.55,
                x1: w / 4.,
                y1: h / 4.,
                x2: w,
                y2: h,
            },
        ]
    }
}

impl ModelService for MockModelService {
    fn infer(&self, frame: &Frame) -> Result<Inference, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_from_call.is_some_and(|n| call >= n) {
            return Err(ModelError::Inference("injected failure".to_string()));
        }

        Ok(Inference {
            boxes: Self::expected_boxes(frame.width(), frame.height()),
            annotated: frame.try_clone()?,
        })
    }

    fn class_name(&self, class_id: u32) -> String {
        CLASSES
            .get(class_id as usize)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("Unknown class {}", class_id))
    }
}

/// In-memory codec: yields `frames` synthetic frames and writes one line per
/// encoded frame to the output path.
pub struct FakeCodec {
    frames: usize,
    props: StreamProps,
    pub paths: Mutex<Vec<PathBuf>>,
    pub staged: Mutex<Vec<u8>>,
}

impl FakeCodec {
    pub fn new(frames: usize, props: StreamProps) -> Self {
        Self {
            frames,
            props,
            paths: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
        }
    }
}

impl VideoCodec for FakeCodec {
    fn open_reader(
        &self,
        path: &Path,
        _format: ContainerFormat,
    ) -> Result<Box<dyn FrameReader>, CodecError> {
        self.paths.lock().push(path.to_path_buf());
        *self.staged.lock() =
            std::fs::read(path).map_err(|e| CodecError::OpenFailed(e.to_string()))?;
        Ok(Box::new(FakeReader {
            remaining: self.frames,
            props: self.props,
        }))
    }

    fn open_writer(
        &self,
        path: &Path,
        fourcc: FourCc,
        props: StreamProps,
    ) -> Result<Box<dyn FrameWriter>, CodecError> {
        self.paths.lock().push(path.to_path_buf());
        let mut file = File::create(path).map_err(|e| CodecError::OpenFailed(e.to_string()))?;
        let code: String = fourcc.0.iter().collect();
        writeln!(file, "{} {}x{}@{}", code, props.width, props.height, props.output_fps())
            .map_err(|e| CodecError::WriteFrameFailed(e.to_string()))?;
        Ok(Box::new(FakeWriter { file }))
    }
}

struct FakeReader {
    remaining: usize,
    props: StreamProps,
}

impl FrameReader for FakeReader {
    fn props(&self) -> StreamProps {
        self.props
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let image = RgbImage::from_pixel(self.props.width, self.props.height, Rgb([0, 128, 0]));
        Ok(Some(Frame::from_rgb_image(&image)?))
    }
}

struct FakeWriter {
    file: File,
}

impl FrameWriter for FakeWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), CodecError> {
        writeln!(self.file, "frame {}x{}", frame.width(), frame.height())
            .map_err(|e| CodecError::WriteFrameFailed(e.to_string()))
    }

    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.file
            .flush()
            .map_err(|e| CodecError::WriteFrameFailed(e.to_string()))
    }
}
