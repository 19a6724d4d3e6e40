//! Terminal renderer seam.
//!
//! The renderer is an external collaborator: it accepts decoded text and
//! reports its geometry. Each selected session gets its own renderer from a
//! [`RendererFactory`], and the session connection releases it on
//! disconnect.

use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::SessionTarget;

/// Viewport size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Geometry {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Events originating from the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Keystrokes as text.
    Input(String),
    /// Pasted data that is not valid text; forwarded as raw bytes.
    BinaryPaste(String),
    /// The viewport changed size.
    Resize(Geometry),
}

/// A screen that session output is written to.
pub trait Renderer: Send + Sync {
    /// Writes decoded terminal output.
    fn write(&self, text: &str);

    /// Current viewport size.
    fn geometry(&self) -> Geometry;

    /// Releases the renderer. Called once when its connection is torn down.
    fn dispose(&self);
}

/// Creates a renderer for each selected session.
pub trait RendererFactory: Send + Sync {
    fn create(&self, target: &SessionTarget) -> Arc<dyn Renderer>;
}

/// Renderer that collects output in memory.
#[derive(Debug, Default)]
pub struct MemoryRenderer {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    output: String,
    geometry: Geometry,
    disposed: bool,
}

impl MemoryRenderer {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                geometry,
                ..MemoryState::default()
            }),
        }
    }

    /// Everything written so far.
    pub fn output(&self) -> String {
        self.lock().output.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn set_geometry(&self, geometry: Geometry) {
        self.lock().geometry = geometry;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Renderer for MemoryRenderer {
    fn write(&self, text: &str) {
        self.lock().output.push_str(text);
    }

    fn geometry(&self) -> Geometry {
        self.lock().geometry
    }

    fn dispose(&self) {
        self.lock().disposed = true;
    }
}
