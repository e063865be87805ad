//! Subscriber adapter implementations and their kind registry.
//!
//! Adapter kinds are wired through an explicit registry mapping a
//! configured kind string to a factory function, validated at startup.
//! The core crate registers the remote feed kinds (`tcp`, `rest`);
//! the simulation crate registers `simulation`.

mod rest;
mod tcp;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigError, SubscriberSpec};
use crate::subscriber::{RateListener, RateSubscriber};

pub use rest::RestFeedSubscriber;
pub use tcp::TcpFeedSubscriber;

/// Factory building one adapter from its configuration entry.
pub type SubscriberFactory = Arc<
    dyn Fn(&SubscriberSpec, Arc<dyn RateListener>) -> Result<Arc<dyn RateSubscriber>, ConfigError>
        + Send
        + Sync,
>;

/// Explicit kind → factory registry for subscriber adapters.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    factories: HashMap<String, SubscriberFactory>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the core remote feed kinds.
    pub fn with_core_kinds() -> Self {
        let mut registry = Self::new();
        registry.register("tcp", |spec, listener| {
            Ok(Arc::new(TcpFeedSubscriber::from_spec(spec, listener)?) as Arc<dyn RateSubscriber>)
        });
        registry.register("rest", |spec, listener| {
            Ok(Arc::new(RestFeedSubscriber::from_spec(spec, listener)?) as Arc<dyn RateSubscriber>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&SubscriberSpec, Arc<dyn RateListener>) -> Result<Arc<dyn RateSubscriber>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.to_owned(), Arc::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build one adapter, failing on unregistered kinds.
    pub fn build(
        &self,
        spec: &SubscriberSpec,
        listener: Arc<dyn RateListener>,
    ) -> Result<Arc<dyn RateSubscriber>, ConfigError> {
        let factory = self.factories.get(&spec.kind).ok_or_else(|| {
            ConfigError::Invalid {
                field: "subscribers.kind".to_owned(),
                reason: format!(
                    "no factory registered for kind '{}' (known: {})",
                    spec.kind,
                    self.kinds().join(", ")
                ),
            }
        })?;
        factory(spec, listener)
    }

    /// Build every configured adapter, failing fast on the first error.
    pub fn build_all(
        &self,
        specs: &[SubscriberSpec],
        listener: Arc<dyn RateListener>,
    ) -> Result<Vec<Arc<dyn RateSubscriber>>, ConfigError> {
        specs
            .iter()
            .map(|spec| self.build(spec, Arc::clone(&listener)))
            .collect()
    }
}
