use crate::config::{Config, Validatable};
use crate::labels::ClassLabels;
use crate::ort_service::OrtModelService;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;
use crate::video::OpenCvCodec;

use std::{error::Error, sync::Arc};
use tokio::signal;

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let labels = match ClassLabels::load(&config.labels.get_path()) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::error!("Failed to load labels: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let model_service = match OrtModelService::new(&config.model, labels) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(e);
        }
    };

    let state = SharedState {
        model_service,
        codec: Arc::new(OpenCvCodec),
        metrics: Arc::new(Metrics::new()?),
        temp_dir: config.upload.temp_dir.clone(),
    };

    let server = HttpServer::new(state, &config).await?;
    server
        .run(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
