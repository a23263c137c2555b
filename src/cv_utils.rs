use crate::labels::ClassLabel;
use image::RgbImage;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
    #[error("OpenCV decode error: {0}")]
    OpenCvDecodeError(opencv::Error),
    #[error("Image data could not be decoded")]
    EmptyImage,
    #[error("Frame has an unsupported pixel layout")]
    UnsupportedLayout,
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

/// A decoded BGR raster image.
pub struct Frame {
    mat: Mat,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A box to draw on a frame.
#[derive(Debug, Clone)]
pub struct Annotation<'a> {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub label: &'a ClassLabel,
}

impl Frame {
    pub fn from_mat(mat: Mat) -> Result<Self, CvUtilsError> {
        if mat.empty() {
            return Err(CvUtilsError::EmptyImage);
        }
        Ok(Self { mat })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CvUtilsError> {
        if bytes.is_empty() {
            return Err(CvUtilsError::EmptyImage);
        }
        let mat = imgcodecs::imdecode(&Vector::from_slice(bytes), imgcodecs::IMREAD_COLOR)
            .map_err(CvUtilsError::OpenCvDecodeError)?;
        Self::from_mat(mat)
    }

    pub fn from_rgb_image(image: &RgbImage) -> Result<Self, CvUtilsError> {
        let (width, height) = image.dimensions();
        let mut rgb = Mat::new_rows_cols_with_default(
            height as i32,
            width as i32,
            core::CV_8UC3,
            Scalar::all(0.0),
        )?;
        rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());

        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
        Self::from_mat(bgr)
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage, CvUtilsError> {
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&self.mat, &mut rgb, imgproc::COLOR_BGR2RGB)?;
        if rgb.typ() != core::CV_8UC3 || !rgb.is_continuous() {
            return Err(CvUtilsError::UnsupportedLayout);
        }
        let bytes = rgb.data_bytes()?.to_vec();
        RgbImage::from_raw(self.width(), self.height(), bytes).ok_or(CvUtilsError::UnsupportedLayout)
    }

    pub fn width(&self) -> u32 {
        self.mat.cols().max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.mat.rows().max(0) as u32
    }

    pub fn mat(&self) -> &Mat {
        &self.mat
    }

    pub fn try_clone(&self) -> Result<Self, CvUtilsError> {
        Ok(Self {
            mat: self.mat.try_clone()?,
        })
    }

    pub fn to_jpg(&self) -> Result<Vec<u8>, CvUtilsError> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", &self.mat, &mut buf, &Vector::new())
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        Ok(buf.into())
    }

    pub fn annotate(&mut self, annotations: &[Annotation<'_>]) -> Result<&mut Self, CvUtilsError> {
        for annotation in annotations {
            let [x1, y1, x2, y2] = annotation.bbox.map(|v| v as i32);
            let label = format!("{}: {:.2}", annotation.label.label, annotation.confidence);
            let color = Scalar::new(
                annotation.label.blue as f64,
                annotation.label.green as f64,
                annotation.label.red as f64,
                0.0,
            );

            imgproc::rectangle(
                &mut self.mat,
                Rect::new(x1, y1, x2 - x1, y2 - y1),
                color,
                2,
                imgproc::LINE_8,
                0,
            )?;

            imgproc::put_text(
                &mut self.mat,
                &label,
                Point::new(x1, (y1 - 5).max(10)),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                color,
                1,
                imgproc::LINE_AA,
                false,
            )?;
        }
        Ok(self)
    }
}
