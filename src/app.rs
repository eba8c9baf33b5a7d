use crate::{
    config::Config,
    detection::DetectionAdapter,
    feedback::FeedbackRecorder,
    labels::LabelVocabulary,
    ort_service::OrtModelService,
    render::Renderer,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(e);
        }
    };

    let labels = match LabelVocabulary::from_config(&config.labels) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Loaded {} class labels", labels.len());

    let renderer = match &config.render.font_path {
        Some(path) => match Renderer::from_font_file(path) {
            Ok(renderer) => renderer,
            Err(e) => {
                tracing::error!("Failed to load font {:?}: {:?}", path, e);
                return Err(Box::new(e));
            }
        },
        None => {
            tracing::warn!("No font configured, labels will be drawn without text");
            Renderer::default()
        }
    };

    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            tracing::error!("Failed to initialize metrics: {:?}", e);
            return Err(e.into());
        }
    };

    let feedback = FeedbackRecorder::from_config(&config.feedback);
    tracing::info!(
        "Feedback images go to {:?}, log at {:?}",
        feedback.image_dir(),
        feedback.log_path()
    );

    let state = SharedState {
        detection: Arc::new(DetectionAdapter::new(model_service, labels, renderer)),
        feedback: Arc::new(feedback),
        metrics,
        jpeg_quality: config.render.jpeg_quality,
    };

    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Server stopped with an error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
        Ok(Ok(())) => tracing::info!("Server stopped"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
