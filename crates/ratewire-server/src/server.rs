//! TCP accept loop and broadcast sink.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use ratewire_core::config::ServerConfig;
use ratewire_core::{Rate, RatePublisher};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tracing::{info, warn};

use crate::protocol::{self, ProtocolError};
use crate::registry::SubscriptionRegistry;
use crate::session::run_session;

/// Accepts client connections and broadcasts rates to subscribed
/// sessions.
///
/// The concurrent connection count is bounded by
/// `ServerConfig::max_connections`; connections beyond the bound receive
/// an error line and are closed immediately.
pub struct DistributionServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<SubscriptionRegistry>,
    known: Arc<HashSet<String>>,
    session_queue: usize,
    limiter: Arc<Semaphore>,
}

impl DistributionServer {
    /// Bind the configured address. `known_names` is the universe of
    /// subscribable rate names (raw symbols plus derived rate names);
    /// subscribing outside it yields `ERROR|Rate not found`.
    pub async fn bind(
        config: &ServerConfig,
        known_names: impl IntoIterator<Item = String>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, max_connections = config.max_connections, "rate server listening");

        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(SubscriptionRegistry::new()),
            known: Arc::new(known_names.into_iter().collect()),
            session_queue: config.session_queue,
            limiter: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Publisher handle feeding this server's broadcast path.
    pub fn sink(&self) -> ServerSink {
        ServerSink {
            registry: Arc::clone(&self.registry),
        }
    }

    /// Accept loop; runs until shutdown flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            match Arc::clone(&self.limiter).try_acquire_owned() {
                                Ok(permit) => {
                                    tokio::spawn(run_session(
                                        socket,
                                        Arc::clone(&self.registry),
                                        Arc::clone(&self.known),
                                        self.session_queue,
                                        shutdown.clone(),
                                        permit,
                                    ));
                                }
                                Err(_) => {
                                    warn!(%peer, "connection refused, server at capacity");
                                    tokio::spawn(async move {
                                        let mut socket = socket;
                                        let line = format!(
                                            "{}\r\n",
                                            ProtocolError::ServerAtCapacity.to_line()
                                        );
                                        let _ = socket.write_all(line.as_bytes()).await;
                                        let _ = socket.shutdown().await;
                                    });
                                }
                            }
                        }
                        Err(error) => {
                            warn!(%error, "accept failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("rate server stopped accepting connections");
    }
}

/// [`RatePublisher`] handle writing into the server's broadcast path.
///
/// Delivery uses per-session bounded queues with try-send semantics: a
/// slow or broken session is purged rather than allowed to backpressure
/// the tick pipeline.
#[derive(Clone)]
pub struct ServerSink {
    registry: Arc<SubscriptionRegistry>,
}

impl RatePublisher for ServerSink {
    fn name(&self) -> &'static str {
        "tcp-server"
    }

    fn publish(&self, rate: &Rate) {
        self.registry
            .broadcast(&rate.name, &protocol::rate_line(rate));
    }
}
