//! Aggregated session inventory across endpoints.
//!
//! Every refresh lists sessions on all endpoints concurrently and builds a
//! new snapshot from scratch. A failing endpoint only loses its own group: it
//! is marked unreachable and contributes no sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use protocol::{CreatedSession, SessionInfo};

use crate::connection::SessionTarget;
use crate::context::ClientContext;
use crate::error::{ClientError, ClientResult};
use crate::registry::Endpoint;

/// A session as known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Endpoint hosting the session.
    pub endpoint_id: String,
}

impl SessionDescriptor {
    fn from_info(endpoint_id: &str, info: SessionInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            created_at: info.created_at,
            endpoint_id: endpoint_id.to_string(),
        }
    }

    /// Name to show; the id when the server reports no name.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn target(&self) -> SessionTarget {
        SessionTarget::new(self.endpoint_id.clone(), self.id.clone())
    }
}

/// One endpoint's section of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSessions {
    /// The endpoint, with reachability as observed by this refresh.
    pub endpoint: Endpoint,
    pub sessions: Vec<SessionDescriptor>,
}

/// Result of a refresh, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub groups: Vec<EndpointSessions>,
    /// The local endpoint rejected the local session; the user has to log
    /// in again.
    pub requires_login: bool,
}

impl DirectorySnapshot {
    /// The group of `endpoint_id`.
    pub fn group(&self, endpoint_id: &str) -> Option<&EndpointSessions> {
        self.groups.iter().find(|g| g.endpoint.id == endpoint_id)
    }

    /// Looks up a session by target.
    pub fn find(&self, target: &SessionTarget) -> Option<&SessionDescriptor> {
        self.group(&target.endpoint_id)?
            .sessions
            .iter()
            .find(|s| s.id == target.session_id)
    }

    /// All sessions across endpoints.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionDescriptor> {
        self.groups.iter().flat_map(|g| g.sessions.iter())
    }

    /// Endpoints that answered this refresh.
    pub fn reachable(&self) -> impl Iterator<Item = &Endpoint> {
        self.groups
            .iter()
            .map(|g| &g.endpoint)
            .filter(|e| e.connected)
    }
}

/// Session bookkeeping across all registered endpoints.
pub struct SessionDirectory {
    ctx: Arc<ClientContext>,
}

impl SessionDirectory {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    /// Lists sessions on every registered endpoint and builds a fresh
    /// snapshot. Endpoint reachability is updated and persisted when it
    /// changed.
    pub async fn refresh(&self) -> DirectorySnapshot {
        let endpoints = self.ctx.endpoints();
        let api = self.ctx.api();

        let results = join_all(endpoints.iter().map(|endpoint| api.list_sessions(endpoint))).await;

        let mut snapshot = DirectorySnapshot::default();
        let mut liveness = Vec::with_capacity(endpoints.len());

        for (mut endpoint, result) in endpoints.into_iter().zip(results) {
            let sessions = match result {
                Ok(infos) => {
                    endpoint.connected = true;
                    infos
                        .into_iter()
                        .map(|info| SessionDescriptor::from_info(&endpoint.id, info))
                        .collect()
                }
                Err(ClientError::SessionExpired) => {
                    tracing::warn!("Local session expired during refresh");
                    snapshot.requires_login = true;
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint.id, "Failed to list sessions: {}", e);
                    endpoint.connected = false;
                    Vec::new()
                }
            };
            liveness.push((endpoint.id.clone(), endpoint.connected));
            snapshot.groups.push(EndpointSessions { endpoint, sessions });
        }

        self.record_liveness(&liveness);
        tracing::debug!(
            endpoints = snapshot.groups.len(),
            sessions = snapshot.sessions().count(),
            "Directory refreshed"
        );
        snapshot
    }

    /// Creates a session on a reachable endpoint.
    ///
    /// The new session shows up in the next refresh; callers can target the
    /// returned id right away.
    pub async fn create_session(&self, endpoint_id: &str) -> ClientResult<CreatedSession> {
        let endpoint = self.ctx.endpoint(endpoint_id)?;
        if !endpoint.connected {
            return Err(ClientError::Unreachable(endpoint.name));
        }
        let created = self
            .observe(&endpoint, self.ctx.api().create_session(&endpoint).await)?;
        tracing::info!(endpoint = %endpoint.id, session = %created.id, "Session created");
        Ok(created)
    }

    /// Renames a session. A session or endpoint that no longer exists is
    /// left alone.
    pub async fn rename_session(
        &self,
        endpoint_id: &str,
        session_id: &str,
        name: &str,
    ) -> ClientResult<()> {
        let Some(endpoint) = self.existing_endpoint(endpoint_id) else {
            return Ok(());
        };
        let result = self
            .ctx
            .api()
            .rename_session(&endpoint, session_id, name)
            .await;
        match self.observe(&endpoint, result) {
            Err(ClientError::NotFound(_)) => {
                tracing::debug!(session = %session_id, "Rename target already gone");
                Ok(())
            }
            other => other,
        }
    }

    /// Deletes a session. A session or endpoint that no longer exists is
    /// left alone.
    pub async fn delete_session(&self, endpoint_id: &str, session_id: &str) -> ClientResult<()> {
        let Some(endpoint) = self.existing_endpoint(endpoint_id) else {
            return Ok(());
        };
        let result = self.ctx.api().delete_session(&endpoint, session_id).await;
        match self.observe(&endpoint, result) {
            Ok(()) => {
                tracing::info!(endpoint = %endpoint.id, session = %session_id, "Session deleted");
                Ok(())
            }
            Err(ClientError::NotFound(_)) => {
                tracing::debug!(session = %session_id, "Delete target already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn existing_endpoint(&self, endpoint_id: &str) -> Option<Endpoint> {
        let endpoint = self.ctx.registry().resolve(endpoint_id).cloned();
        if endpoint.is_none() {
            tracing::debug!(endpoint = %endpoint_id, "Endpoint already removed");
        }
        endpoint
    }

    /// Marks the endpoint unreachable when a mutation shows it is.
    fn observe<T>(&self, endpoint: &Endpoint, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(e) = &result {
            if e.is_connectivity() || matches!(e, ClientError::Unauthorized { .. }) {
                self.record_liveness(&[(endpoint.id.clone(), false)]);
            }
        }
        result
    }

    fn record_liveness(&self, liveness: &[(String, bool)]) {
        let mut registry = self.ctx.registry_mut();
        let mut changed = false;
        for (id, connected) in liveness {
            changed |= registry.set_connected(id, *connected);
        }
        if changed {
            if let Err(e) = registry.save() {
                tracing::warn!("Failed to persist endpoint reachability: {:#}", e);
            }
        }
    }
}
