use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use link_resolver::server::{self, AppState};
use link_resolver::{
    init_cache, init_client, init_logger_with, CachedResolver, HttpResolver, Opt, Resolver,
    ResolverConfig, SingleflightResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    init_logger_with(opt.log_level.clone().into(), opt.log_format.clone())
        .context("Failed to initialize logger")?;

    let client = init_client().context("Failed to initialize HTTP client")?;
    let config = ResolverConfig {
        timeout: Duration::from_secs(opt.timeout_seconds),
        max_redirects: opt.max_redirects,
        ..ResolverConfig::default()
    };

    // Innermost to outermost: resolve, coalesce duplicates, cache results.
    let gate = SingleflightResolver::new(HttpResolver::new(client, config));
    let cache = init_cache(
        Duration::from_secs(opt.cache_ttl_hours * 60 * 60),
        opt.cache_capacity,
    )
    .await;
    let resolver: Arc<dyn Resolver> = Arc::new(CachedResolver::new(gate, cache));

    let app = server::router(AppState { resolver });

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(opt.port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining requests");
}
