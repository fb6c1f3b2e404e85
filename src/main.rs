use anyhow::Result;
use std::sync::Arc;
use t1d_pulse::*;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Log timestamps in the host's local zone, millisecond precision.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let source = Arc::new(
        fetch_client::HttpFetchClient::new()
            .map_err(|e| anyhow::anyhow!("http client: {}", e))?,
    );
    let aggregator = Arc::new(aggregator::Aggregator::new(
        app_config.categories(),
        source,
        app_config.aggregator_options(),
    )?);
    tracing::info!(
        categories = ?aggregator.category_names().collect::<Vec<_>>(),
        auto_update = app_config.aggregator.auto_update,
        update_interval_ms = app_config.aggregator.update_interval_ms,
        mock_backend = app_config.mock_backend.enabled,
        "aggregator configured"
    );
    let scheduler = Arc::new(Mutex::new(scheduler::Scheduler::new(
        aggregator.clone(),
        app_config.update_interval(),
    )));

    let app = routes::app(aggregator, scheduler.clone(), &app_config);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    // Start after binding so a first cycle against the in-process mock backend can connect.
    if app_config.aggregator.auto_update {
        scheduler.lock().await.start();
    }

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        signal = shutdown_signal() => {
            tracing::info!(signal, "shutting down, stopping auto-update");
        }
    }

    // In-flight cycles are detached; only the timer is cancelled here.
    scheduler.lock().await.stop().await;
    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl_c",
                _ = sigterm.recv() => "sigterm",
            },
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for ctrl_c only");
                let _ = tokio::signal::ctrl_c().await;
                "ctrl_c"
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl_c handler failed");
        }
        "ctrl_c"
    }
}
