//! evidence-orchestrator - HTTP Server Entry Point
//!
//! Starts the HTTP server, the dispatch scheduler and any local workers.

use evidence_orchestrator::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evidence_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: store={:?} data_dir={} dispatch_interval={:?} dispatch_timeout={:?}",
        config.store_type,
        config.data_dir.display(),
        config.dispatch.interval,
        config.dispatch.timeout
    );
    if config.dev_mode {
        info!("DEV_MODE enabled: API auth is disabled");
    }

    // Start HTTP server
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting server on {}", addr);

    api::serve(config).await?;

    Ok(())
}
