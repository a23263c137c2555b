mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;
pub mod cv_utils;
pub mod error;
pub mod labels;
pub mod media;
pub mod model_service;
pub mod ort_service;
pub mod pipeline;
pub mod video;

#[cfg(test)]
mod testing;

pub use app::start_app;
