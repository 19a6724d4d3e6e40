//! HTTP client for endpoint APIs.
//!
//! Remote endpoints are independent trust domains: calls to them carry the
//! endpoint's bearer token in the `X-Session-Token` header and nothing
//! else. The shared `reqwest::Client` has no cookie store, so cookies set by
//! one endpoint are never replayed to another. The local endpoint instead
//! uses the ambient session established by [`EndpointClient::login_local`],
//! presented as a cookie.

use std::sync::{PoisonError, RwLock};

use protocol::api::{
    self, CreateSessionRequest, CreatedSession, LoginRequest, LoginResponse,
    RenameSessionRequest, SessionInfo, LOGIN_PATH, SESSIONS_PATH, SESSION_TOKEN_HEADER,
    TOKEN_QUERY_PARAM,
};
use protocol::ProtocolError;
use reqwest::header::COOKIE;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::Config;
use crate::connection::transport::StreamRequest;
use crate::error::{ClientError, ClientResult};
use crate::registry::Endpoint;

/// Status and decoded body of an API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    /// Parsed JSON body; `None` when empty or not JSON.
    pub body: Option<serde_json::Value>,
}

/// Performs authenticated calls against endpoint HTTP APIs.
#[derive(Debug)]
pub struct EndpointClient {
    http: reqwest::Client,
    local_origin: Url,
    session_cookie: String,
    local_session: RwLock<Option<String>>,
}

impl EndpointClient {
    /// Creates a client from the configuration.
    pub fn new(config: &Config) -> ClientResult<Self> {
        let local_origin = config
            .local_url()
            .map_err(|e| ClientError::InvalidInput(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(config.http.request_timeout())
            .build()
            .map_err(|e| ClientError::Connectivity {
                endpoint: "http client".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            local_origin,
            session_cookie: config.local.session_cookie.clone(),
            local_session: RwLock::new(None),
        })
    }

    /// Logs in to the local endpoint and keeps the session in memory.
    pub async fn login_local(&self, password: &str) -> ClientResult<()> {
        let mut local = Endpoint::local();
        self.authenticate(&mut local, password).await
    }

    /// Returns true if a local session is held.
    pub fn has_local_session(&self) -> bool {
        self.local_session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops the local session.
    pub fn clear_local_session(&self) {
        *self
            .local_session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn set_local_session(&self, token: String) {
        *self
            .local_session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn local_cookie(&self) -> Option<String> {
        self.local_session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|token| format!("{}={}", self.session_cookie, token))
    }

    /// Logs in to `endpoint` with `secret`.
    ///
    /// On success the returned token is stored (on the endpoint for remote
    /// endpoints, as the ambient session for the local one) and the endpoint
    /// is marked reachable. A rejected secret is an
    /// [`ClientError::Authentication`] error; a network failure is a
    /// [`ClientError::Connectivity`] error.
    pub async fn authenticate(&self, endpoint: &mut Endpoint, secret: &str) -> ClientResult<()> {
        let url = self.api_url(endpoint, LOGIN_PATH)?;
        let response = self
            .http
            .post(url)
            .json(&LoginRequest {
                password: secret.to_string(),
            })
            .send()
            .await
            .map_err(|e| connectivity(endpoint, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::info!(endpoint = %endpoint.id, "Login rejected");
            return Err(ClientError::Authentication {
                endpoint: endpoint.name.clone(),
            });
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                endpoint: endpoint.name.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| connectivity(endpoint, e))?;
        let login: LoginResponse = serde_json::from_slice(&body).map_err(ProtocolError::from)?;
        if login.token.is_empty() {
            return Err(ClientError::Authentication {
                endpoint: endpoint.name.clone(),
            });
        }

        if endpoint.is_local {
            self.set_local_session(login.token);
        } else {
            endpoint.token = Some(login.token);
        }
        endpoint.connected = true;
        tracing::info!(endpoint = %endpoint.id, "Authenticated");
        Ok(())
    }

    /// Issues an API call against `endpoint`.
    ///
    /// A 401 is returned as an error: [`ClientError::SessionExpired`] for the
    /// local endpoint (the local session is dropped), otherwise
    /// [`ClientError::Unauthorized`] naming the endpoint.
    pub async fn request(
        &self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<ApiResponse> {
        let url = self.api_url(endpoint, path)?;
        let mut builder = self.authorize(endpoint, self.http.request(method.clone(), url));
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| connectivity(endpoint, e))?;
        let status = response.status();
        tracing::debug!(
            endpoint = %endpoint.id,
            %method,
            path,
            status = status.as_u16(),
            "API call"
        );

        if status == StatusCode::UNAUTHORIZED {
            return Err(self.unauthorized(endpoint));
        }

        let bytes = response.bytes().await.map_err(|e| connectivity(endpoint, e))?;
        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        Ok(ApiResponse { status, body })
    }

    /// Lists the sessions hosted by `endpoint`.
    pub async fn list_sessions(&self, endpoint: &Endpoint) -> ClientResult<Vec<SessionInfo>> {
        let response = self
            .request(endpoint, Method::GET, SESSIONS_PATH, None)
            .await?;
        let response = expect_success(endpoint, response)?;
        // An endpoint without sessions may answer `null`.
        let sessions: Option<Vec<SessionInfo>> = decode(response.body)?;
        Ok(sessions.unwrap_or_default())
    }

    /// Creates a session on `endpoint`.
    pub async fn create_session(&self, endpoint: &Endpoint) -> ClientResult<CreatedSession> {
        let body = serde_json::to_value(CreateSessionRequest::default())
            .map_err(ProtocolError::from)?;
        let response = self
            .request(endpoint, Method::POST, SESSIONS_PATH, Some(&body))
            .await?;
        let response = expect_success(endpoint, response)?;
        decode(response.body)
    }

    /// Renames session `session_id` on `endpoint`.
    pub async fn rename_session(
        &self,
        endpoint: &Endpoint,
        session_id: &str,
        name: &str,
    ) -> ClientResult<()> {
        let body = serde_json::to_value(RenameSessionRequest {
            name: name.to_string(),
        })
        .map_err(ProtocolError::from)?;
        let response = self
            .request(
                endpoint,
                Method::PUT,
                &api::session_path(session_id),
                Some(&body),
            )
            .await?;
        expect_success(endpoint, response).map(|_| ())
    }

    /// Deletes session `session_id` on `endpoint`.
    pub async fn delete_session(&self, endpoint: &Endpoint, session_id: &str) -> ClientResult<()> {
        let response = self
            .request(
                endpoint,
                Method::DELETE,
                &api::session_path(session_id),
                None,
            )
            .await?;
        expect_success(endpoint, response).map(|_| ())
    }

    /// Builds the stream handshake for session `session_id` on `endpoint`.
    ///
    /// The stream uses `wss` when the endpoint's address is `https` and `ws`
    /// otherwise; for the local endpoint the configured local origin decides.
    pub fn stream_request(
        &self,
        endpoint: &Endpoint,
        session_id: &str,
    ) -> ClientResult<StreamRequest> {
        let mut url = join_path(&self.base_url(endpoint)?, &api::stream_path(session_id))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ProtocolError::InvalidAddress(url.to_string()))?;

        if endpoint.is_local {
            return Ok(StreamRequest {
                url,
                cookie: self.local_cookie(),
            });
        }

        if let Some(token) = &endpoint.token {
            url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        }
        Ok(StreamRequest { url, cookie: None })
    }

    fn base_url(&self, endpoint: &Endpoint) -> ClientResult<Url> {
        if endpoint.is_local {
            return Ok(self.local_origin.clone());
        }
        match Url::parse(&endpoint.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url),
            _ => Err(ProtocolError::InvalidAddress(endpoint.url.clone()).into()),
        }
    }

    fn api_url(&self, endpoint: &Endpoint, path: &str) -> ClientResult<Url> {
        join_path(&self.base_url(endpoint)?, path)
    }

    fn authorize(&self, endpoint: &Endpoint, builder: RequestBuilder) -> RequestBuilder {
        if endpoint.is_local {
            match self.local_cookie() {
                Some(cookie) => builder.header(COOKIE, cookie),
                None => builder,
            }
        } else {
            match &endpoint.token {
                Some(token) => builder.header(SESSION_TOKEN_HEADER, token),
                None => builder,
            }
        }
    }

    fn unauthorized(&self, endpoint: &Endpoint) -> ClientError {
        if endpoint.is_local {
            tracing::warn!("Local session rejected, login required");
            self.clear_local_session();
            ClientError::SessionExpired
        } else {
            tracing::warn!(endpoint = %endpoint.id, "Endpoint rejected its token");
            ClientError::Unauthorized {
                endpoint_id: endpoint.id.clone(),
            }
        }
    }
}

/// Appends an absolute path to a base address, keeping any path prefix the
/// base already has.
fn join_path(base: &Url, path: &str) -> ClientResult<Url> {
    let joined = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|_| ProtocolError::InvalidAddress(joined).into())
}

fn connectivity(endpoint: &Endpoint, err: reqwest::Error) -> ClientError {
    ClientError::Connectivity {
        endpoint: endpoint.name.clone(),
        message: err.to_string(),
    }
}

fn expect_success(endpoint: &Endpoint, response: ApiResponse) -> ClientResult<ApiResponse> {
    if response.status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(format!(
            "resource on endpoint {}",
            endpoint.name
        )));
    }
    if !response.status.is_success() {
        return Err(ClientError::Status {
            endpoint: endpoint.name.clone(),
            status: response.status.as_u16(),
        });
    }
    Ok(response)
}

fn decode<T: DeserializeOwned>(body: Option<serde_json::Value>) -> ClientResult<T> {
    let value = body.unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(value).map_err(ProtocolError::from)?)
}
