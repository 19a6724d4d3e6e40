//! Top-level controller.
//!
//! The [`Supervisor`] keeps at most one [`SessionConnection`] alive, switches
//! between sessions (old connection fully torn down before the new one
//! starts), routes terminal events to the active connection, and runs the
//! endpoint and session flows that need the user.

use std::sync::Arc;

use url::Url;

use crate::connection::{SessionConnection, SessionTarget, StreamConnector};
use crate::context::ClientContext;
use crate::directory::{DirectorySnapshot, SessionDirectory};
use crate::error::{ClientError, ClientResult};
use crate::prompt::Prompter;
use crate::registry::{Endpoint, DEFAULT_ENDPOINT_ID};
use crate::renderer::{RendererFactory, TerminalEvent};

struct ActiveSession {
    target: SessionTarget,
    connection: SessionConnection,
}

/// Owns the active session connection and the directory view.
pub struct Supervisor {
    ctx: Arc<ClientContext>,
    directory: SessionDirectory,
    connector: Arc<dyn StreamConnector>,
    renderers: Arc<dyn RendererFactory>,
    prompter: Arc<dyn Prompter>,
    active: Option<ActiveSession>,
    snapshot: DirectorySnapshot,
}

impl Supervisor {
    pub fn new(
        ctx: Arc<ClientContext>,
        connector: Arc<dyn StreamConnector>,
        renderers: Arc<dyn RendererFactory>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self {
            directory: SessionDirectory::new(ctx.clone()),
            ctx,
            connector,
            renderers,
            prompter,
            active: None,
            snapshot: DirectorySnapshot::default(),
        }
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    /// The last directory snapshot.
    pub fn snapshot(&self) -> &DirectorySnapshot {
        &self.snapshot
    }

    /// The active (endpoint, session) pair, if any.
    pub fn active(&self) -> Option<&SessionTarget> {
        self.active.as_ref().map(|a| &a.target)
    }

    /// The active connection, if any.
    pub fn connection(&self) -> Option<&SessionConnection> {
        self.active.as_ref().map(|a| &a.connection)
    }

    /// Makes `target` the active session.
    ///
    /// The previous connection is disconnected before the new one starts.
    pub fn select_session(&mut self, target: SessionTarget) {
        self.clear();
        tracing::info!(target = %target, "Selecting session");
        let renderer = self.renderers.create(&target);
        let connection =
            SessionConnection::new(self.ctx.clone(), self.connector.clone(), renderer);
        connection.start(target.clone());
        self.active = Some(ActiveSession { target, connection });
    }

    /// Tears down the active connection, leaving no session selected.
    pub fn clear(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!(target = %active.target, "Clearing active session");
            active.connection.disconnect();
        }
    }

    /// Routes a terminal event to the active connection.
    pub fn handle_event(&self, event: TerminalEvent) {
        let Some(active) = &self.active else {
            return;
        };
        match event {
            TerminalEvent::Input(data) => active.connection.send_input(&data),
            TerminalEvent::BinaryPaste(data) => active.connection.send_binary(&data),
            TerminalEvent::Resize(geometry) => {
                active.connection.resize(geometry.rows, geometry.cols)
            }
        }
    }

    /// Rebuilds the directory snapshot.
    ///
    /// When the local endpoint rejects the local session the user is asked
    /// to log in and the refresh is retried once.
    pub async fn refresh(&mut self) -> ClientResult<&DirectorySnapshot> {
        let mut snapshot = self.directory.refresh().await;
        if snapshot.requires_login {
            self.login().await?;
            snapshot = self.directory.refresh().await;
            if snapshot.requires_login {
                return Err(ClientError::SessionExpired);
            }
        }
        self.snapshot = snapshot;
        Ok(&self.snapshot)
    }

    /// Logs in to the local endpoint with a prompted password.
    pub async fn login(&self) -> ClientResult<()> {
        let local = self.ctx.endpoint(DEFAULT_ENDPOINT_ID)?;
        let secret = self
            .prompter
            .request_credential(&local)
            .await
            .ok_or(ClientError::Cancelled)?;
        self.ctx.api().login_local(&secret).await
    }

    /// Registers a new endpoint.
    ///
    /// The endpoint is persisted only after it accepted the prompted
    /// password.
    pub async fn add_endpoint(&mut self, name: &str, address: &str) -> ClientResult<Endpoint> {
        let name = name.trim();
        let address = address.trim();
        if name.is_empty() || address.is_empty() {
            return Err(ClientError::InvalidInput(
                "endpoint name and address are required".to_string(),
            ));
        }
        match Url::parse(address) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => {
                return Err(ClientError::InvalidInput(format!(
                    "address must be an http:// or https:// URL, got {}",
                    address
                )))
            }
        }

        let mut endpoint = self.ctx.registry().add(name, address);
        let secret = self
            .prompter
            .request_credential(&endpoint)
            .await
            .ok_or(ClientError::Cancelled)?;
        self.ctx.api().authenticate(&mut endpoint, &secret).await?;

        let stored = endpoint.clone();
        self.ctx.update_registry(|registry| registry.insert(stored))?;
        tracing::info!(endpoint = %endpoint.id, "Endpoint added");
        self.refresh_quietly().await;
        Ok(endpoint)
    }

    /// Re-enters the password of an endpoint and stores the new token.
    pub async fn reauthenticate(&mut self, endpoint_id: &str) -> ClientResult<()> {
        let mut endpoint = self.ctx.endpoint(endpoint_id)?;
        if endpoint.is_local {
            self.login().await?;
        } else {
            let secret = self
                .prompter
                .request_credential(&endpoint)
                .await
                .ok_or(ClientError::Cancelled)?;
            self.ctx.api().authenticate(&mut endpoint, &secret).await?;
            self.ctx.update_registry(|registry| registry.insert(endpoint))?;
        }
        self.refresh_quietly().await;
        Ok(())
    }

    /// Removes an endpoint, disconnecting first if the active session lives
    /// on it.
    pub async fn remove_endpoint(&mut self, endpoint_id: &str) -> ClientResult<()> {
        let endpoint = self.ctx.endpoint(endpoint_id)?;
        if endpoint.is_local {
            return Err(ClientError::InvalidInput(
                "the local endpoint cannot be removed".to_string(),
            ));
        }
        if self
            .active()
            .is_some_and(|target| target.endpoint_id == endpoint_id)
        {
            self.clear();
        }
        self.ctx
            .update_registry(|registry| registry.remove(endpoint_id))?;
        self.refresh_quietly().await;
        Ok(())
    }

    /// Creates a session and makes it active.
    ///
    /// With one reachable endpoint it is used directly; with several the
    /// user picks one; with none this fails.
    pub async fn create_session(&mut self) -> ClientResult<SessionTarget> {
        let endpoint_id = self.pick_create_target().await?;

        let result = self.directory.create_session(&endpoint_id).await;
        let created = match result {
            Err(ClientError::Unauthorized { .. } | ClientError::SessionExpired) => {
                tracing::info!(endpoint = %endpoint_id, "Credential rejected, re-authenticating");
                self.reauthenticate(&endpoint_id).await?;
                self.directory.create_session(&endpoint_id).await?
            }
            other => other?,
        };

        let target = SessionTarget::new(endpoint_id, created.id);
        self.refresh_quietly().await;
        self.select_session(target.clone());
        Ok(target)
    }

    async fn pick_create_target(&self) -> ClientResult<String> {
        let reachable = self.ctx.registry().reachable();
        match reachable.as_slice() {
            [] => Err(ClientError::NoReachableEndpoint),
            [only] => Ok(only.id.clone()),
            candidates => {
                let chosen = self
                    .prompter
                    .choose_endpoint(candidates)
                    .await
                    .ok_or(ClientError::Cancelled)?;
                if candidates.iter().any(|e| e.id == chosen) {
                    Ok(chosen)
                } else {
                    Err(ClientError::NotFound(format!("endpoint {}", chosen)))
                }
            }
        }
    }

    /// Prompts for a new name and renames the session.
    ///
    /// Returns false when the user cancelled or entered a blank name.
    pub async fn rename_session(&mut self, target: &SessionTarget) -> ClientResult<bool> {
        let current = self
            .snapshot
            .find(target)
            .map(|s| s.display_name().to_string())
            .unwrap_or_else(|| target.session_id.clone());
        let Some(name) = self.prompter.request_text("Rename session", &current).await else {
            return Ok(false);
        };
        self.rename_session_to(target, &name).await
    }

    /// Renames the session to `name` (trimmed). A blank name is a no-op.
    pub async fn rename_session_to(
        &mut self,
        target: &SessionTarget,
        name: &str,
    ) -> ClientResult<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }
        self.directory
            .rename_session(&target.endpoint_id, &target.session_id, name)
            .await?;
        self.refresh_quietly().await;
        Ok(true)
    }

    /// Deletes a session, clearing the active connection if it was the
    /// active one.
    pub async fn delete_session(&mut self, target: &SessionTarget) -> ClientResult<()> {
        self.directory
            .delete_session(&target.endpoint_id, &target.session_id)
            .await?;
        if self.active() == Some(target) {
            self.clear();
        }
        self.refresh_quietly().await;
        Ok(())
    }

    /// Refresh after a mutation; failures only leave the old snapshot.
    async fn refresh_quietly(&mut self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!("Directory refresh failed: {}", e);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.clear();
    }
}
