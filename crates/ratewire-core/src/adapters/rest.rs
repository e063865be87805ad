//! Remote REST feed adapter.
//!
//! Polls an HTTP endpoint returning a JSON array of quotes on a fixed
//! interval and forwards each entry to the listener as a normalized
//! tick.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::{ConfigError, SubscriberSpec};
use crate::subscriber::{
    ConnectionState, RateListener, RateSubscriber, SubscriberError, SubscriberShared,
    SubscriberStats,
};
use crate::{PlatformId, RawTick, Symbol, UtcDateTime};

/// One quote entry as served by the remote endpoint.
#[derive(Debug, Deserialize)]
struct RestQuote {
    symbol: String,
    bid: f64,
    ask: f64,
    #[serde(default)]
    ts: Option<UtcDateTime>,
}

struct RestFeedInner {
    shared: SubscriberShared,
    listener: Arc<dyn RateListener>,
    client: reqwest::Client,
    endpoint: String,
    symbols: Vec<Symbol>,
    poll_interval: Duration,
    seen: Mutex<HashSet<Symbol>>,
}

impl RestFeedInner {
    async fn fetch_once(&self) -> Result<Vec<RestQuote>, SubscriberError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|error| SubscriberError::unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(SubscriberError::unavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<RestQuote>>()
            .await
            .map_err(|error| SubscriberError::protocol(error.to_string()))
    }

    async fn deliver(&self, quotes: Vec<RestQuote>) {
        for quote in quotes {
            let Ok(symbol) = Symbol::parse(&quote.symbol) else {
                continue;
            };
            if !self.symbols.is_empty() && !self.symbols.contains(&symbol) {
                continue;
            }

            let ts = quote.ts.unwrap_or_else(UtcDateTime::now);
            let tick = match RawTick::new(
                self.shared.platform().clone(),
                symbol.clone(),
                quote.bid,
                quote.ask,
                ts,
            ) {
                Ok(tick) => tick,
                Err(error) => {
                    let error =
                        SubscriberError::protocol(format!("invalid quote for {symbol}: {error}"));
                    self.listener
                        .on_rate_error(self.shared.platform(), &error)
                        .await;
                    continue;
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
    }

    async fn poll_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
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

            match self.fetch_once().await {
                Ok(quotes) => self.deliver(quotes).await,
                Err(error) => {
                    self.listener
                        .on_rate_error(self.shared.platform(), &error)
                        .await;
                    // A dead endpoint flips the adapter to error so the
                    // supervisor takes over reconnection.
                    self.shared
                        .set_state(ConnectionState::Error, &self.listener)
                        .await;
                    return;
                }
            }
        }
    }
}

/// Adapter wrapping a remote quote endpoint polled over HTTP.
pub struct RestFeedSubscriber {
    inner: Arc<RestFeedInner>,
    task: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl RestFeedSubscriber {
    pub fn new(
        platform: PlatformId,
        endpoint: impl Into<String>,
        symbols: Vec<Symbol>,
        poll_interval: Duration,
        listener: Arc<dyn RateListener>,
    ) -> Self {
        Self {
            inner: Arc::new(RestFeedInner {
                shared: SubscriberShared::new(platform),
                listener,
                client: reqwest::Client::new(),
                endpoint: endpoint.into(),
                symbols,
                poll_interval,
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
            reason: "rest subscriber requires an endpoint".to_owned(),
        })?;
        Ok(Self::new(
            spec.platform.clone(),
            endpoint,
            spec.symbols.clone(),
            Duration::from_millis(spec.poll_interval_ms.max(50)),
            listener,
        ))
    }
}

impl RateSubscriber for RestFeedSubscriber {
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

            // Probe the endpoint once so a dead URL fails the connect
            // attempt instead of the first poll.
            let quotes = match self.inner.fetch_once().await {
                Ok(quotes) => quotes,
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

            self.inner
                .shared
                .set_state(ConnectionState::Connected, &self.inner.listener)
                .await;
            self.inner.deliver(quotes).await;

            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(Arc::clone(&self.inner).poll_loop(stop_rx));
            *task = Some((stop_tx, handle));
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut task = self.task.lock().await;
            if let Some((stop_tx, handle)) = task.take() {
                let _ = stop_tx.send(true);
                if let Err(error) = handle.await {
                    warn!(platform = %self.inner.shared.platform(), %error, "poll loop join failed");
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

#[cfg(test)]
mod tests {
    use super::*;

    struct NullListener;

    impl RateListener for NullListener {
        fn on_rate_available<'a>(
            &'a self,
            _tick: RawTick,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }

        fn on_rate_update<'a>(
            &'a self,
            _tick: RawTick,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }

        fn on_rate_status<'a>(
            &'a self,
            _platform: &'a PlatformId,
            _state: ConnectionState,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }

        fn on_rate_error<'a>(
            &'a self,
            _platform: &'a PlatformId,
            _error: &'a SubscriberError,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn connect_fails_against_dead_endpoint() {
        let adapter = RestFeedSubscriber::new(
            PlatformId::parse("restfeed").expect("valid"),
            "http://127.0.0.1:9/quotes",
            vec![Symbol::parse("EURUSD").expect("valid")],
            Duration::from_millis(100),
            Arc::new(NullListener),
        );

        let err = adapter.connect().await.expect_err("must fail");
        assert!(err.retryable());
        assert_eq!(adapter.state(), ConnectionState::Error);
        assert_eq!(adapter.stats().connect_attempts, 1);
    }
}
