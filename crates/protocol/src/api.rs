//! HTTP request and response bodies for the session server API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login endpoint.
pub const LOGIN_PATH: &str = "/api/login";

/// Session collection endpoint.
pub const SESSIONS_PATH: &str = "/api/sessions";

/// Header carrying the bearer token for non-default endpoints.
pub const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// Query parameter carrying the bearer token on stream handshakes.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Returns the API path of a single session.
pub fn session_path(session_id: &str) -> String {
    format!("{}/{}", SESSIONS_PATH, session_id)
}

/// Returns the stream path of a session.
pub fn stream_path(session_id: &str) -> String {
    format!("/ws/{}", session_id)
}

/// Body of `POST /api/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// Successful login response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent calls.
    pub token: String,
    #[serde(default)]
    pub success: bool,
}

/// A session as reported by `GET /api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Server-assigned session identifier.
    pub id: String,
    /// Display name, possibly renamed by a user.
    #[serde(default)]
    pub name: String,
    /// Creation time on the server.
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST /api/sessions`. The server names new sessions itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {}

/// Response of `POST /api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Body of `PUT /api/sessions/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameSessionRequest {
    pub name: String,
}
