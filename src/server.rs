use crate::{
    config::ServerConfig,
    detection::DetectionAdapter,
    feedback::FeedbackRecorder,
    response::JSON_DATA_HEADER,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    Router,
};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct SharedState {
    pub detection: Arc<DetectionAdapter>,
    pub feedback: Arc<FeedbackRecorder>,
    pub metrics: Arc<Metrics>,
    pub jpeg_quality: u8,
}

/// Routes plus the cross-origin and upload-size policy. Browsers only let
/// scripts read `X-Json-Data` when it is listed in the exposed headers.
pub fn router(state: SharedState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_TYPE, JSON_DATA_HEADER.clone()]);

    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = router(state, config.max_upload_bytes).layer(metrics_layer);
        let listener = TcpListener::bind(&addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx;
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
