//! Livestream backend server binary.
//!
//! Boot sequence: load config from the environment, read the persona
//! catalog, connect to the key-value store, reset stream state, then run
//! the processor tick loop alongside the HTTP listener until Ctrl-C.

use airtime::api::ApiPool;
use airtime::catalog::PersonaCatalog;
use airtime::config::AppConfig;
use airtime::llm::RemoteScriptWriter;
use airtime::server::{AppState, router};
use airtime::store::{KvStore, RedisStore};
use airtime::stream::StreamProcessor;
use airtime::tts::RemoteTts;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let catalog = Arc::new(PersonaCatalog::load(&config)?);
    info!(
        "persona catalog loaded (default streamer: {})",
        catalog.default_persona()
    );

    let store: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&config.store.url).await?);
    let pool = ApiPool::new(&config.api)?;
    info!("remote endpoint pool ready ({} keys)", pool.len());

    let tts = Arc::new(RemoteTts::new(
        pool.clone(),
        Arc::clone(&catalog),
        config.tts.clone(),
        config.bests_dir(),
    ));
    let writer = Arc::new(RemoteScriptWriter::new(
        pool,
        Arc::clone(&catalog),
        config.llm.clone(),
    ));

    let mut processor = StreamProcessor::new(Arc::clone(&store), tts, writer, &config);
    processor.reset_state().await?;

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(processor.run(cancel.clone()));

    let state = AppState::new(store);
    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
    info!("HTTP surface listening on http://{}", listener.local_addr()?);

    let shutdown = cancel.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    worker.await?;
    info!("airtime-server shut down cleanly");
    Ok(())
}
