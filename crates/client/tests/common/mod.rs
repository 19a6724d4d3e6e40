//! Shared helpers for client integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use client::{
    ClientContext, ClientError, ClientResult, Config, Endpoint, EndpointRegistry, Geometry,
    MemoryRenderer, PromptFuture, Prompter, Renderer, RendererFactory, SessionTarget,
    StreamConnector, StreamRequest, TransportStream,
};
use tempfile::TempDir;

/// Returns an http URL on which nothing listens.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Creates a context whose local endpoint is served at `local_url`.
pub fn test_context(local_url: &str) -> (Arc<ClientContext>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.client.data_dir = temp_dir.path().to_path_buf();
    config.local.url = local_url.to_string();
    config.http.request_timeout_secs = 5;
    config.reconnect.base_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;
    let registry = EndpointRegistry::new(config.endpoints_path());
    (ClientContext::new(config, registry).unwrap(), temp_dir)
}

/// Like [`test_context`], but the data directory sits under a regular file
/// so every registry save fails.
pub fn unwritable_context(local_url: &str) -> (Arc<ClientContext>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    let mut config = Config::default();
    config.client.data_dir = blocker.join("data");
    config.local.url = local_url.to_string();
    config.http.request_timeout_secs = 5;
    let registry = EndpointRegistry::new(config.endpoints_path());
    (ClientContext::new(config, registry).unwrap(), temp_dir)
}

/// Registers an authenticated, reachable remote endpoint.
pub fn add_remote(ctx: &ClientContext, name: &str, url: &str, token: &str) -> Endpoint {
    let mut registry = ctx.registry_mut();
    let mut endpoint = registry.add(name, url);
    endpoint.token = Some(token.to_string());
    endpoint.connected = true;
    registry.insert(endpoint.clone());
    endpoint
}

/// Sets the reachability flag of an endpoint without persisting.
pub fn set_connected(ctx: &ClientContext, endpoint_id: &str, connected: bool) {
    ctx.registry_mut().set_connected(endpoint_id, connected);
}

/// Prompter answering from scripted queues; an empty queue means cancel.
#[derive(Default)]
pub struct ScriptedPrompter {
    credentials: Mutex<VecDeque<String>>,
    texts: Mutex<VecDeque<String>>,
    choices: Mutex<VecDeque<String>>,
    /// Names of endpoints a credential was requested for.
    pub credential_requests: Mutex<Vec<String>>,
    /// `(prompt, default)` pairs of text requests.
    pub text_requests: Mutex<Vec<(String, String)>>,
    /// Candidate ids offered to the chooser.
    pub choice_requests: Mutex<Vec<Vec<String>>>,
}

impl ScriptedPrompter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_credential(self: Arc<Self>, secret: &str) -> Arc<Self> {
        self.credentials.lock().unwrap().push_back(secret.to_string());
        self
    }

    pub fn with_text(self: Arc<Self>, text: &str) -> Arc<Self> {
        self.texts.lock().unwrap().push_back(text.to_string());
        self
    }

    pub fn with_choice(self: Arc<Self>, endpoint_id: &str) -> Arc<Self> {
        self.choices
            .lock()
            .unwrap()
            .push_back(endpoint_id.to_string());
        self
    }
}

impl Prompter for ScriptedPrompter {
    fn request_credential(&self, endpoint: &Endpoint) -> PromptFuture<'_> {
        self.credential_requests
            .lock()
            .unwrap()
            .push(endpoint.name.clone());
        let answer = self.credentials.lock().unwrap().pop_front();
        Box::pin(async move { answer })
    }

    fn request_text(&self, prompt: &str, default: &str) -> PromptFuture<'_> {
        self.text_requests
            .lock()
            .unwrap()
            .push((prompt.to_string(), default.to_string()));
        let answer = self.texts.lock().unwrap().pop_front();
        Box::pin(async move { answer })
    }

    fn choose_endpoint(&self, candidates: &[Endpoint]) -> PromptFuture<'_> {
        self.choice_requests
            .lock()
            .unwrap()
            .push(candidates.iter().map(|e| e.id.clone()).collect());
        let answer = self.choices.lock().unwrap().pop_front();
        Box::pin(async move { answer })
    }
}

/// Connector that refuses every stream and records the requests.
#[derive(Default)]
pub struct RefusingConnector {
    pub requests: Mutex<Vec<StreamRequest>>,
}

impl StreamConnector for RefusingConnector {
    fn connect(
        &self,
        request: StreamRequest,
    ) -> Pin<Box<dyn Future<Output = ClientResult<TransportStream>> + Send + '_>> {
        self.requests.lock().unwrap().push(request);
        Box::pin(async {
            Err(ClientError::Connectivity {
                endpoint: "test".to_string(),
                message: "refused".to_string(),
            })
        })
    }
}

/// Factory handing out memory renderers and keeping them for inspection.
#[derive(Default)]
pub struct RecordingRenderers {
    pub created: Mutex<Vec<(SessionTarget, Arc<MemoryRenderer>)>>,
}

impl RecordingRenderers {
    pub fn renderer(&self, index: usize) -> Arc<MemoryRenderer> {
        self.created.lock().unwrap()[index].1.clone()
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

impl RendererFactory for RecordingRenderers {
    fn create(&self, target: &SessionTarget) -> Arc<dyn Renderer> {
        let renderer = Arc::new(MemoryRenderer::new(Geometry::new(24, 80)));
        self.created
            .lock()
            .unwrap()
            .push((target.clone(), renderer.clone()));
        renderer
    }
}
