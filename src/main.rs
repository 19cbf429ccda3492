use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use directai_vision::api::{AppState, router};
use directai_vision::config::{Config, ServiceConfig};
use directai_vision::{Camera, CameraRegistry, DirectAiService, HttpSnapshotCamera};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,directai_vision=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!("Starting vision service with config: {:?}", config);

    let mut cameras = CameraRegistry::new();
    for (name, url) in config.parse_cameras() {
        tracing::info!(camera = %name, %url, "Registering snapshot camera");
        let camera = HttpSnapshotCamera::new(url, config.request_timeout())?;
        cameras.insert(name, Arc::new(camera) as Arc<dyn Camera>);
    }

    let service = Arc::new(DirectAiService::new(
        config.service_name.clone(),
        config.request_timeout(),
    ));

    // A failed startup configuration keeps the server up so /reconfigure can fix it
    match &config.service_config {
        Some(path) => {
            let service_config = ServiceConfig::from_file(path)?;
            if let Err(e) = service.reconfigure(service_config, cameras.clone()).await {
                tracing::error!("Initial configuration failed: {}", e);
            }
        }
        None => tracing::warn!("No --service-config given, waiting for /reconfigure"),
    }

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = router(AppState::new(service, cameras))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}
