pub mod image;
pub mod video;

pub use self::image::{predict_rendered, predict_structured, PredictionResponse, RenderedImage};
pub use self::video::{process_video, VideoOutput};
