//! Remote TCP feed adapter.
//!
//! Connects to an upstream rate server speaking the line protocol,
//! subscribes to the configured symbols, and forwards pushed rate lines
//! to the listener as normalized ticks.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{ConfigError, SubscriberSpec};
use crate::subscriber::{
    ConnectionState, RateListener, RateSubscriber, SubscriberError, SubscriberShared,
    SubscriberStats,
};
use crate::{PlatformId, Rate, RawTick, Symbol};

struct TcpFeedInner {
    shared: SubscriberShared,
    listener: Arc<dyn RateListener>,
    endpoint: String,
    symbols: Vec<Symbol>,
    seen: Mutex<HashSet<Symbol>>,
}

impl TcpFeedInner {
    /// Route one pushed line to the listener. Non-rate lines (greeting,
    /// command acknowledgements) are ignored.
    async fn handle_line(&self, line: &str) {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            debug!(platform = %self.shared.platform(), line = trimmed, "feed control line");
            return;
        }

        let rate: Rate = match serde_json::from_str(trimmed) {
            Ok(rate) => rate,
            Err(error) => {
                let error = SubscriberError::protocol(format!("unparseable rate line: {error}"));
                self.listener
                    .on_rate_error(self.shared.platform(), &error)
                    .await;
                return;
            }
        };

        let symbol = match Symbol::parse(&rate.name) {
            Ok(symbol) => symbol,
            Err(_) => {
                // Upstream may push derived rates whose names are not raw
                // symbols; those are not re-ingested.
                debug!(name = rate.name, "skipping non-symbol rate from upstream");
                return;
            }
        };

        let tick = match RawTick::new(
            self.shared.platform().clone(),
            symbol.clone(),
            rate.bid,
            rate.ask,
            rate.ts,
        ) {
            Ok(tick) => tick.with_meta("feed", &self.endpoint),
            Err(error) => {
                let error = SubscriberError::protocol(format!("invalid upstream quote: {error}"));
                self.listener
                    .on_rate_error(self.shared.platform(), &error)
                    .await;
                return;
            }
        };

        self.shared.record_tick();
        let first = self
            .seen
            .lock()
            .expect("seen-set lock is not poisoned")
            .insert(symbol);
        if first {
            self.listener.on_rate_available(tick).await;
        } else {
            self.listener.on_rate_update(tick).await;
        }
    }

    async fn receive_loop(self: Arc<Self>, stream: TcpStream, mut stop: watch::Receiver<bool>) {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                read = reader.read_line(&mut line) => match read {
                    Ok(0) => {
                        let error = SubscriberError::io("upstream closed the connection");
                        self.listener
                            .on_rate_error(self.shared.platform(), &error)
                            .await;
                        break;
                    }
                    Ok(_) => self.handle_line(&line).await,
                    Err(error) => {
                        let error = SubscriberError::io(error.to_string());
                        self.listener
                            .on_rate_error(self.shared.platform(), &error)
                            .await;
                        break;
                    }
                },
                changed = stop.changed() => {
                    // A dropped sender also means stop.
                    if changed.is_err() || *stop.borrow() {
                        self.shared
                            .set_state(ConnectionState::Disconnected, &self.listener)
                            .await;
                        return;
                    }
                }
            }
        }

        // Reached only on transport failure; the supervisor reconnects.
        self.shared
            .set_state(ConnectionState::Error, &self.listener)
            .await;
    }
}

/// Adapter wrapping a remote rate server reached over TCP.
pub struct TcpFeedSubscriber {
    inner: Arc<TcpFeedInner>,
    task: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl TcpFeedSubscriber {
    pub fn new(
        platform: PlatformId,
        endpoint: impl Into<String>,
        symbols: Vec<Symbol>,
        listener: Arc<dyn RateListener>,
    ) -> Self {
        Self {
            inner: Arc::new(TcpFeedInner {
                shared: SubscriberShared::new(platform),
                listener,
                endpoint: endpoint.into(),
                symbols,
                seen: Mutex::new(HashSet::new()),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_spec(
        spec: &SubscriberSpec,
        listener: Arc<dyn RateListener>,
    ) -> Result<Self, ConfigError> {
        let endpoint = spec.endpoint.clone().ok_or_else(|| ConfigError::Invalid {
            field: "subscribers.endpoint".to_owned(),
            reason: "tcp subscriber requires an endpoint".to_owned(),
        })?;
        Ok(Self::new(
            spec.platform.clone(),
            endpoint,
            spec.symbols.clone(),
            listener,
        ))
    }
}

impl RateSubscriber for TcpFeedSubscriber {
    fn platform(&self) -> PlatformId {
        self.inner.shared.platform().clone()
    }

    fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    fn connect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), SubscriberError>> + Send + 'a>> {
        Box::pin(async move {
            let mut task = self.task.lock().await;
            if self.inner.shared.state().is_connected() {
                return Ok(());
            }

            self.inner.shared.record_connect_attempt();
            self.inner
                .shared
                .set_state(ConnectionState::Connecting, &self.inner.listener)
                .await;

            let mut stream = match TcpStream::connect(&self.inner.endpoint).await {
                Ok(stream) => stream,
                Err(error) => {
                    self.inner
                        .shared
                        .set_state(ConnectionState::Error, &self.inner.listener)
                        .await;
                    return Err(SubscriberError::connect_failed(format!(
                        "{}: {error}",
                        self.inner.endpoint
                    )));
                }
            };

            for symbol in &self.inner.symbols {
                let command = format!("subscribe|{symbol}\r\n");
                if let Err(error) = stream.write_all(command.as_bytes()).await {
                    self.inner
                        .shared
                        .set_state(ConnectionState::Error, &self.inner.listener)
                        .await;
                    return Err(SubscriberError::io(format!(
                        "subscribe write failed: {error}"
                    )));
                }
            }

            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(Arc::clone(&self.inner).receive_loop(stream, stop_rx));
            *task = Some((stop_tx, handle));

            self.inner
                .shared
                .set_state(ConnectionState::Connected, &self.inner.listener)
                .await;
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut task = self.task.lock().await;
            if let Some((stop_tx, handle)) = task.take() {
                let _ = stop_tx.send(true);
                if let Err(error) = handle.await {
                    warn!(platform = %self.inner.shared.platform(), %error, "receive loop join failed");
                }
            }
            self.inner
                .shared
                .set_state(ConnectionState::Disconnected, &self.inner.listener)
                .await;
        })
    }

    fn stats(&self) -> SubscriberStats {
        self.inner.shared.stats()
    }
}
