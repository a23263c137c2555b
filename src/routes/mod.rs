mod health;
mod metrics;
mod predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use health::healthcheck;
use metrics::metrics_handler;

fn predict_routes() -> Router<SharedState> {
    Router::new()
        .route("/predict/test", get(predict::test))
        .route("/predict/image", post(predict::predict_image))
        .route("/predict/image/json", post(predict::predict_image_json))
        .route("/predict/video", post(predict::predict_video))
}

pub fn api_routes(api_prefix: Option<&str>) -> Router<SharedState> {
    let prefix = api_prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty());

    let predict = match prefix {
        Some(prefix) => Router::new().nest(&format!("/{}", prefix), predict_routes()),
        None => predict_routes(),
    };

    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .merge(predict)
}
