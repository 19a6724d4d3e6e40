//! Process-wide client context.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::api::EndpointClient;
use crate::config::Config;
use crate::connection::{SessionTarget, StreamRequest};
use crate::error::{ClientError, ClientResult};
use crate::registry::{Endpoint, EndpointRegistry};

/// Shared state handed to every component: configuration, the endpoint
/// registry and the endpoint HTTP client.
///
/// The registry lock is never held across an `.await`.
#[derive(Debug)]
pub struct ClientContext {
    config: Config,
    registry: RwLock<EndpointRegistry>,
    api: EndpointClient,
}

impl ClientContext {
    /// Creates a context around an already loaded registry.
    pub fn new(config: Config, registry: EndpointRegistry) -> ClientResult<Arc<Self>> {
        let api = EndpointClient::new(&config)?;
        Ok(Arc::new(Self {
            config,
            registry: RwLock::new(registry),
            api,
        }))
    }

    /// Creates a context, loading the registry from the configured data
    /// directory.
    pub fn open(config: Config) -> ClientResult<Arc<Self>> {
        let registry = EndpointRegistry::open(config.endpoints_path())?;
        Self::new(config, registry)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &EndpointClient {
        &self.api
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, EndpointRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, EndpointRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of one endpoint.
    pub fn endpoint(&self, id: &str) -> ClientResult<Endpoint> {
        self.registry()
            .resolve(id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("endpoint {}", id)))
    }

    /// Snapshot of all endpoints in registry order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.registry().endpoints().to_vec()
    }

    /// Applies `f` to a copy of the registry, persists it, and only then
    /// makes it current. A failed save leaves the registry untouched.
    pub fn update_registry<R>(&self, f: impl FnOnce(&mut EndpointRegistry) -> R) -> ClientResult<R> {
        let mut registry = self.registry_mut();
        let mut staged = registry.clone();
        let result = f(&mut staged);
        staged.save()?;
        *registry = staged;
        Ok(result)
    }

    /// Builds the stream handshake for `target` from the current registry.
    pub fn stream_request(&self, target: &SessionTarget) -> ClientResult<StreamRequest> {
        let endpoint = self.endpoint(&target.endpoint_id)?;
        self.api.stream_request(&endpoint, &target.session_id)
    }
}
