//! Durable registry of known endpoints.
//!
//! The registry is persisted as a versionless JSON array at
//! `<data_dir>/endpoints.json`. The built-in local endpoint is always
//! present: it is synthesized and prepended on load when the file lacks it,
//! and it can never be removed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identifier of the built-in local endpoint.
pub const DEFAULT_ENDPOINT_ID: &str = "local";

/// Display name of the built-in local endpoint.
pub const DEFAULT_ENDPOINT_NAME: &str = "Local";

/// Length of generated endpoint identifiers.
const ENDPOINT_ID_LEN: usize = 8;

/// A known session server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Opaque identifier, stable across restarts.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Base address (`http(s)://host[:port]`); empty for the local endpoint.
    #[serde(default)]
    pub url: String,
    /// Bearer token returned by the endpoint's login call.
    #[serde(default)]
    pub token: Option<String>,
    /// Whether this is the built-in local endpoint.
    #[serde(default)]
    pub is_local: bool,
    /// Last known reachability.
    #[serde(default)]
    pub connected: bool,
}

impl Endpoint {
    /// The built-in local endpoint.
    pub fn local() -> Self {
        Self {
            id: DEFAULT_ENDPOINT_ID.to_string(),
            name: DEFAULT_ENDPOINT_NAME.to_string(),
            url: String::new(),
            token: None,
            is_local: true,
            connected: true,
        }
    }

    /// Creates an unauthenticated remote endpoint with a fresh random id.
    ///
    /// The name and address are trimmed and a trailing `/` is stripped from
    /// the address.
    pub fn remote(name: &str, address: &str) -> Self {
        Self {
            id: generate_endpoint_id(),
            name: name.trim().to_string(),
            url: address.trim().trim_end_matches('/').to_string(),
            token: None,
            is_local: false,
            connected: false,
        }
    }
}

/// Generates a random alphanumeric endpoint id.
fn generate_endpoint_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ENDPOINT_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Ordered collection of endpoints backed by a JSON file.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    path: PathBuf,
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// Creates an in-memory registry persisting to `path`, holding only the
    /// local endpoint. Call [`EndpointRegistry::load`] to read existing data.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            endpoints: vec![Endpoint::local()],
        }
    }

    /// Opens the registry at `path` and loads it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut registry = Self::new(path);
        registry.load()?;
        Ok(registry)
    }

    /// Returns the path to the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads endpoints from the JSON file.
    ///
    /// A missing file yields only the local endpoint. If the file has no
    /// local endpoint one is prepended.
    pub fn load(&mut self) -> Result<&[Endpoint]> {
        if !self.path.exists() {
            tracing::debug!(
                "Endpoint registry not found at {:?}, starting with the local endpoint",
                self.path
            );
            self.endpoints = vec![Endpoint::local()];
            return Ok(&self.endpoints);
        }

        let contents = fs::read_to_string(&self.path).with_context(|| {
            format!("Failed to read endpoint registry: {}", self.path.display())
        })?;

        let mut endpoints: Vec<Endpoint> = serde_json::from_str(&contents).with_context(|| {
            format!("Failed to parse endpoint registry: {}", self.path.display())
        })?;

        // Only the first local entry counts; ids stay unique.
        let mut seen = std::collections::HashSet::new();
        let mut has_local = false;
        endpoints.retain(|endpoint| {
            if endpoint.is_local {
                if has_local {
                    return false;
                }
                has_local = true;
            }
            seen.insert(endpoint.id.clone())
        });
        if !has_local {
            endpoints.retain(|endpoint| endpoint.id != DEFAULT_ENDPOINT_ID);
            endpoints.insert(0, Endpoint::local());
        }

        tracing::info!("Loaded {} endpoints from {:?}", endpoints.len(), self.path);
        self.endpoints = endpoints;
        Ok(&self.endpoints)
    }

    /// Persists the full list, overwriting prior state.
    ///
    /// Writes to a temp file and renames it over the registry file.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create registry directory: {}", parent.display())
            })?;
        }

        let contents = serde_json::to_string_pretty(&self.endpoints)
            .context("Failed to serialize endpoint registry")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).with_context(|| {
            format!("Failed to write temp registry: {}", temp_path.display())
        })?;

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp registry {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!("Saved {} endpoints to {:?}", self.endpoints.len(), self.path);
        Ok(())
    }

    /// Builds a candidate endpoint for `name` at `address`.
    ///
    /// The candidate is not part of the registry until it has authenticated
    /// and is passed to [`EndpointRegistry::insert`].
    pub fn add(&self, name: &str, address: &str) -> Endpoint {
        let mut endpoint = Endpoint::remote(name, address);
        while self.resolve(&endpoint.id).is_some() {
            endpoint.id = generate_endpoint_id();
        }
        endpoint
    }

    /// Inserts or replaces an endpoint. The local endpoint cannot be replaced
    /// by a remote one.
    pub fn insert(&mut self, endpoint: Endpoint) {
        if endpoint.id == DEFAULT_ENDPOINT_ID && !endpoint.is_local {
            tracing::warn!("Refusing to replace the local endpoint with a remote one");
            return;
        }
        match self.endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint,
            None => {
                tracing::info!("Registered endpoint {} ({})", endpoint.id, endpoint.name);
                self.endpoints.push(endpoint);
            }
        }
    }

    /// Removes an endpoint by id.
    ///
    /// Absent ids are a no-op. The local endpoint is never removed.
    pub fn remove(&mut self, id: &str) -> Option<Endpoint> {
        let index = self.endpoints.iter().position(|e| e.id == id)?;
        if self.endpoints[index].is_local {
            tracing::warn!("Ignoring request to remove the local endpoint");
            return None;
        }
        let removed = self.endpoints.remove(index);
        tracing::info!("Removed endpoint {} ({})", removed.id, removed.name);
        Some(removed)
    }

    /// Looks up an endpoint by id.
    pub fn resolve(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    /// Looks up an endpoint by id for mutation.
    pub fn resolve_mut(&mut self, id: &str) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }

    /// Records the reachability of an endpoint. Returns true if it changed.
    pub fn set_connected(&mut self, id: &str, connected: bool) -> bool {
        match self.resolve_mut(id) {
            Some(endpoint) if endpoint.connected != connected => {
                endpoint.connected = connected;
                true
            }
            _ => false,
        }
    }

    /// All endpoints in registry order, local endpoint first.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Endpoints whose last known state is reachable.
    pub fn reachable(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.connected)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
