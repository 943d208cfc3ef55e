//! `VeilServer` builder and server loop.
//!
//! This is the entry point for running the relay. It ties together all
//! the layers: transport → protocol → hub (presence, lobby, sessions,
//! economy).

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info};
use veil_economy::{EconomyConfig, MemoryStore, RetryPolicy, Store};
use veil_lobby::LobbyConfig;
use veil_protocol::{Codec, JsonCodec};
use veil_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::hub::Hub;
use crate::{ServerConfig, VeilError};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) hub: Hub,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// use veil::prelude::*;
///
/// # async fn start() -> Result<(), VeilError> {
/// let server = VeilServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct VeilServerBuilder {
    config: ServerConfig,
    store: Option<Arc<dyn Store>>,
}

impl VeilServerBuilder {
    /// Creates a new builder with default settings and an in-memory store.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            store: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the reward rules for Random sessions.
    pub fn economy(mut self, economy: EconomyConfig) -> Self {
        self.config.session.economy = economy;
        self
    }

    /// Sets the matchmaker configuration.
    pub fn lobby(mut self, lobby: LobbyConfig) -> Self {
        self.config.lobby = lobby;
        self
    }

    /// Sets the retry policy for store writes.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sets the persistent store backend.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Binds the listener and builds the server with the JSON codec.
    pub async fn build(self) -> Result<VeilServer<JsonCodec>, VeilError> {
        self.build_with_codec(JsonCodec).await
    }

    /// Binds the listener and builds the server with a custom codec.
    pub async fn build_with_codec<C: Codec>(self, codec: C) -> Result<VeilServer<C>, VeilError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn Store>);

        let state = Arc::new(ServerState {
            hub: Hub::new(&self.config, store),
            codec,
            config: self.config,
        });

        Ok(VeilServer { transport, state })
    }
}

impl Default for VeilServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct VeilServer<C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
}

impl VeilServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> VeilServerBuilder {
        VeilServerBuilder::new()
    }
}

impl<C: Codec> VeilServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The shared state every connection talks to.
    pub fn hub(&self) -> &Hub {
        &self.state.hub
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), VeilError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes, then ends every
    /// live session so both members hear `session-ended`.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), VeilError> {
        info!(addr = ?self.local_addr().ok(), "veil relay running");
        let hub = self.state.hub.clone();

        tokio::select! {
            () = self.accept_loop() => {}
            () = shutdown => info!("shutdown requested"),
        }

        hub.shutdown().await;
        Ok(())
    }

    /// Accepts connections and spawns a handler task for each.
    async fn accept_loop(&mut self) {
        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }
}
