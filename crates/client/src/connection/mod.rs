//! Live session streams.
//!
//! A [`SessionConnection`] owns at most one stream bound to one
//! (endpoint, session) pair. It relays terminal input and output, and when
//! the stream drops it reconnects on a bounded exponential backoff. Once the
//! budget is spent it parks in [`ConnectionState::Abandoned`] until the next
//! keystroke.
//!
//! All I/O runs in spawned tasks. Every task callback carries the epoch it
//! was created under and does nothing if the epoch has moved on. The epoch
//! advances on `start`, on `disconnect` and on every connection attempt, and
//! the check happens under the same lock that guards renderer writes, so a
//! superseded stream can never reach the renderer.

pub mod backoff;
pub mod transport;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use protocol::{encode_binary_paste, Frame};
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;

use crate::context::ClientContext;
use crate::renderer::Renderer;

pub use backoff::ReconnectPolicy;
pub use transport::{
    StreamConnector, StreamRequest, TransportStream, WebSocketConnector, WireMessage,
};

/// Buffer size for the event broadcast channel.
const EVENT_BUFFER_SIZE: usize = 64;

/// Inline notice written when the retry budget is exhausted.
pub const ABANDONED_NOTICE: &str =
    "\r\n\x1b[31m[Connection lost. Press any key to reconnect.]\x1b[0m\r\n";

/// Inline notice written when a reconnect attempt is scheduled.
pub fn reconnect_notice(attempt: u32, max_attempts: u32) -> String {
    format!(
        "\r\n\x1b[33m[Reconnecting ({}/{})...]\x1b[0m\r\n",
        attempt, max_attempts
    )
}

/// The (endpoint, session) pair a stream is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTarget {
    pub endpoint_id: String,
    pub session_id: String,
}

impl SessionTarget {
    pub fn new(endpoint_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.endpoint_id, self.session_id)
    }
}

/// Lifecycle of a session connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No stream and no pending reconnect.
    #[default]
    Idle,
    /// A stream is being opened.
    Connecting,
    /// The stream is open.
    Open,
    /// The stream is being torn down.
    Closing,
    /// The stream dropped and a reconnect is scheduled.
    Reconnecting,
    /// The retry budget is spent; the next keystroke reconnects.
    Abandoned,
}

/// Events broadcast by a session connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// A reconnect attempt was scheduled.
    ReconnectScheduled {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
}

#[derive(Debug, Default)]
struct Shared {
    epoch: u64,
    target: Option<SessionTarget>,
    state: ConnectionState,
    attempts: u32,
    manual_disconnect: bool,
    resume_armed: bool,
    outgoing: Option<mpsc::Sender<WireMessage>>,
    io_task: Option<AbortHandle>,
    timer: Option<AbortHandle>,
    renderer_disposed: bool,
}

struct Inner {
    ctx: Arc<ClientContext>,
    connector: Arc<dyn StreamConnector>,
    renderer: Arc<dyn Renderer>,
    policy: ReconnectPolicy,
    shared: Mutex<Shared>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

/// A resilient stream to one session.
///
/// All methods are synchronous and never block on I/O. Dropping the
/// connection disconnects it. A connection is single-use: once
/// [`disconnect`](Self::disconnect) has released the renderer, `start` is
/// refused; build a new connection with a fresh renderer instead.
pub struct SessionConnection {
    inner: Arc<Inner>,
}

impl SessionConnection {
    /// Creates an idle connection writing to `renderer`.
    pub fn new(
        ctx: Arc<ClientContext>,
        connector: Arc<dyn StreamConnector>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let policy = ReconnectPolicy::from(&ctx.config().reconnect);
        Self::with_policy(ctx, connector, renderer, policy)
    }

    /// Creates an idle connection with an explicit reconnect policy.
    pub fn with_policy(
        ctx: Arc<ClientContext>,
        connector: Arc<dyn StreamConnector>,
        renderer: Arc<dyn Renderer>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            inner: Arc::new(Inner {
                ctx,
                connector,
                renderer,
                policy,
                shared: Mutex::new(Shared::default()),
                event_tx,
            }),
        }
    }

    /// Binds the connection to `target` and opens a stream.
    ///
    /// Any previous stream and pending reconnect are torn down first.
    /// Ignored after [`disconnect`](Self::disconnect).
    pub fn start(&self, target: SessionTarget) {
        let mut shared = self.inner.lock();
        if shared.renderer_disposed {
            tracing::warn!(target = %target, "Ignoring start on a disconnected session stream");
            return;
        }
        self.inner.teardown(&mut shared);
        tracing::info!(target = %target, "Starting session stream");
        shared.target = Some(target);
        shared.attempts = 0;
        shared.manual_disconnect = false;
        self.inner.connect(&mut shared);
    }

    /// Closes the stream, cancels any pending reconnect and releases the
    /// renderer. No reconnect happens afterwards.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        shared.manual_disconnect = true;
        self.inner.teardown(&mut shared);
        if let Some(target) = shared.target.take() {
            tracing::info!(target = %target, "Session stream disconnected");
        }
        if !shared.renderer_disposed {
            shared.renderer_disposed = true;
            self.inner.renderer.dispose();
        }
    }

    /// Sends keystrokes.
    ///
    /// Dropped unless the stream is open. While abandoned, the keystroke
    /// instead resets the retry budget and reconnects.
    pub fn send_input(&self, data: &str) {
        let mut shared = self.inner.lock();
        if shared.resume_armed {
            shared.resume_armed = false;
            shared.attempts = 0;
            tracing::info!("Resuming abandoned session stream");
            self.inner.connect(&mut shared);
            return;
        }
        if shared.state != ConnectionState::Open {
            tracing::trace!(state = ?shared.state, "Dropping input while not open");
            return;
        }
        match Frame::input(data).to_json() {
            Ok(json) => self.inner.send(&shared, WireMessage::Text(json)),
            Err(e) => tracing::warn!("failed to encode input frame: {}", e),
        }
    }

    /// Sends pasted non-text data as a raw binary frame.
    pub fn send_binary(&self, data: &str) {
        let shared = self.inner.lock();
        if shared.state != ConnectionState::Open {
            return;
        }
        self.inner
            .send(&shared, WireMessage::Binary(encode_binary_paste(data)));
    }

    /// Announces a new viewport size. No-op unless open.
    pub fn resize(&self, rows: u16, cols: u16) {
        let shared = self.inner.lock();
        if shared.state != ConnectionState::Open {
            return;
        }
        self.inner.send_resize(&shared, rows, cols);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Reconnect attempts made since the stream was last open.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn target(&self) -> Option<SessionTarget> {
        self.inner.lock().target.clone()
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.event_tx.subscribe()
    }

    #[cfg(test)]
    fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConnectionEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state == state {
            return;
        }
        tracing::debug!(from = ?shared.state, to = ?state, "Connection state changed");
        shared.state = state;
        self.emit(ConnectionEvent::StateChanged(state));
    }

    fn send(&self, shared: &Shared, message: WireMessage) {
        if let Some(tx) = &shared.outgoing {
            if let Err(e) = tx.try_send(message) {
                tracing::warn!("failed to queue stream message: {}", e);
            }
        }
    }

    fn send_resize(&self, shared: &Shared, rows: u16, cols: u16) {
        match Frame::resize(rows, cols).to_json() {
            Ok(json) => self.send(shared, WireMessage::Text(json)),
            Err(e) => tracing::warn!("failed to encode resize frame: {}", e),
        }
    }

    /// Invalidates every outstanding callback and drops the stream.
    fn teardown(&self, shared: &mut Shared) {
        shared.epoch += 1;
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if let Some(task) = shared.io_task.take() {
            task.abort();
        }
        shared.outgoing = None;
        shared.resume_armed = false;
        if shared.state != ConnectionState::Idle {
            self.set_state(shared, ConnectionState::Closing);
            self.set_state(shared, ConnectionState::Idle);
        }
    }

    /// Opens a stream to the current target under a fresh epoch.
    fn connect(self: &Arc<Self>, shared: &mut Shared) {
        let Some(target) = shared.target.clone() else {
            return;
        };
        shared.epoch += 1;
        shared.outgoing = None;
        let epoch = shared.epoch;

        let request = match self.ctx.stream_request(&target) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(target = %target, "Cannot open session stream: {}", e);
                self.set_state(shared, ConnectionState::Idle);
                return;
            }
        };

        self.set_state(shared, ConnectionState::Connecting);
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_stream(epoch, request).await });
        shared.io_task = Some(task.abort_handle());
    }

    async fn run_stream(self: Arc<Self>, epoch: u64, request: StreamRequest) {
        let stream = match self.connector.connect(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(epoch, "Stream connect failed: {}", e);
                self.on_close(epoch);
                return;
            }
        };

        let TransportStream {
            outgoing,
            mut incoming,
        } = stream;
        if !self.on_open(epoch, outgoing) {
            return;
        }

        while let Some(message) = incoming.recv().await {
            if !self.on_message(epoch, message) {
                return;
            }
        }
        self.on_close(epoch);
    }

    fn on_open(&self, epoch: u64, outgoing: mpsc::Sender<WireMessage>) -> bool {
        let mut shared = self.lock();
        if shared.epoch != epoch || shared.manual_disconnect {
            return false;
        }
        shared.attempts = 0;
        shared.outgoing = Some(outgoing);
        self.set_state(&mut shared, ConnectionState::Open);

        let geometry = self.renderer.geometry();
        self.send_resize(&shared, geometry.rows, geometry.cols);
        if let Some(target) = &shared.target {
            tracing::info!(target = %target, "Session stream open");
        }
        true
    }

    fn on_message(&self, epoch: u64, message: WireMessage) -> bool {
        let shared = self.lock();
        if shared.epoch != epoch || shared.manual_disconnect {
            return false;
        }
        match message {
            WireMessage::Text(text) => match Frame::from_json(&text) {
                Ok(Frame::Output { data }) => self.renderer.write(&data),
                Ok(frame) => tracing::debug!(kind = frame.kind(), "Ignoring frame"),
                Err(e) => tracing::debug!("Dropping malformed frame: {}", e),
            },
            WireMessage::Binary(bytes) => {
                tracing::debug!(len = bytes.len(), "Ignoring binary frame")
            }
        }
        true
    }

    fn on_close(self: &Arc<Self>, epoch: u64) {
        let mut shared = self.lock();
        if shared.epoch != epoch || shared.manual_disconnect {
            return;
        }
        shared.outgoing = None;
        shared.io_task = None;
        if let Some(target) = &shared.target {
            tracing::info!(target = %target, "Session stream closed");
        }
        self.schedule_reconnect(&mut shared);
    }

    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared) {
        let max_attempts = self.policy.max_attempts();
        let Some(delay) = self.policy.delay_for(shared.attempts) else {
            tracing::warn!(attempts = shared.attempts, "Reconnect budget exhausted");
            self.set_state(shared, ConnectionState::Abandoned);
            shared.resume_armed = true;
            self.renderer.write(ABANDONED_NOTICE);
            return;
        };

        shared.attempts += 1;
        let attempt = shared.attempts;
        self.set_state(shared, ConnectionState::Reconnecting);
        self.renderer.write(&reconnect_notice(attempt, max_attempts));
        self.emit(ConnectionEvent::ReconnectScheduled {
            attempt,
            max_attempts,
            delay,
        });
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let epoch = shared.epoch;
        let target = shared.target.clone();
        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timer(epoch, target);
        });
        shared.timer = Some(timer.abort_handle());
    }

    fn on_timer(self: &Arc<Self>, epoch: u64, target: Option<SessionTarget>) {
        let mut shared = self.lock();
        if shared.epoch != epoch || shared.manual_disconnect || shared.target != target {
            return;
        }
        shared.timer = None;
        self.connect(&mut shared);
    }
}
