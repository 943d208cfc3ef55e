//! Standalone relay with an in-memory store.
//!
//! Configured through `VEIL_*` environment variables (see
//! [`ServerConfig::from_env`]); log filtering through `RUST_LOG`.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use veil::prelude::*;

#[tokio::main]
async fn main() -> Result<(), VeilError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,veil=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    let server = VeilServer::builder()
        .config(config)
        .store(Arc::new(MemoryStore::new()))
        .build()
        .await?;
    if let Ok(addr) = server.local_addr() {
        tracing::info!(%addr, "listening");
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
