use crate::{
    config::Config, model_service::ModelService, routes::api_routes, telemetry::Metrics,
    video::VideoCodec,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{future::Future, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct SharedState {
    pub model_service: Arc<dyn ModelService>,
    pub codec: Arc<dyn VideoCodec>,
    pub metrics: Arc<Metrics>,
    pub temp_dir: Option<PathBuf>,
}

pub fn build_router(state: SharedState, api_prefix: Option<&str>, max_upload_bytes: usize) -> Router {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    Router::new()
        .merge(api_routes(api_prefix))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(metrics_layer)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let router = build_router(
            state,
            config.server.api_prefix.as_deref(),
            config.upload.max_upload_bytes(),
        );

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
