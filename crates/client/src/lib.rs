//! # Conductor Client Library
//!
//! This crate is the core of the Conductor client: it keeps track of the
//! session servers (endpoints) you use, aggregates their terminal sessions
//! and keeps one live stream to the session you are working in, recovering
//! it after network failures.
//!
//! ## Overview
//!
//! - **Endpoint Registry**: Durable list of endpoints with their tokens and
//!   last known reachability; the local endpoint is always present
//! - **Endpoint Client**: Authenticated HTTP calls against one endpoint
//! - **Session Directory**: Concurrent, failure-isolated session listing
//!   across all endpoints
//! - **Session Connection**: One WebSocket stream with a bounded exponential
//!   reconnect policy
//! - **Supervisor**: Single active session, event routing and user flows
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Supervisor                         │
//! │   Prompter ──┐                          ┌── Renderer     │
//! ├──────────────┴──────────────────────────┴────────────────┤
//! │  ┌────────────────────┐    ┌──────────────────────────┐  │
//! │  │ Session Directory  │    │   Session Connection     │  │
//! │  └─────────┬──────────┘    │  (backoff, transport)    │  │
//! │  ┌─────────┴──────────┐    └────────────┬─────────────┘  │
//! │  │  Endpoint Client   │                 │                │
//! │  └─────────┬──────────┘                 │                │
//! │  ┌─────────┴────────────────────────────┴─────────────┐  │
//! │  │        Client Context (config, registry)           │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use client::{ClientContext, Config, SessionDirectory};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = ClientContext::open(Config::load_default()?)?;
//!     let directory = SessionDirectory::new(Arc::clone(&ctx));
//!
//!     let snapshot = directory.refresh().await;
//!     for session in snapshot.sessions() {
//!         println!("{} {}", session.endpoint_id, session.display_name());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`context`]: Shared client context
//! - [`registry`]: Endpoint registry
//! - [`api`]: Endpoint HTTP client
//! - [`directory`]: Session directory
//! - [`connection`]: Session stream, backoff and transports
//! - [`supervisor`]: Active session and user flows
//! - [`prompt`], [`renderer`]: Collaborator interfaces

pub mod api;
pub mod config;
pub mod connection;
pub mod context;
pub mod directory;
pub mod error;
pub mod prompt;
pub mod registry;
pub mod renderer;
pub mod supervisor;

// Re-export protocol for convenience
pub use protocol;

pub use api::{ApiResponse, EndpointClient};
pub use config::{Config, ConfigError};
pub use connection::{
    ConnectionEvent, ConnectionState, ReconnectPolicy, SessionConnection, SessionTarget,
    StreamConnector, StreamRequest, TransportStream, WebSocketConnector, WireMessage,
};
pub use context::ClientContext;
pub use directory::{DirectorySnapshot, EndpointSessions, SessionDescriptor, SessionDirectory};
pub use error::{ClientError, ClientResult};
pub use prompt::{PromptFuture, Prompter};
pub use registry::{Endpoint, EndpointRegistry, DEFAULT_ENDPOINT_ID};
pub use renderer::{Geometry, MemoryRenderer, Renderer, RendererFactory, TerminalEvent};
pub use supervisor::Supervisor;
