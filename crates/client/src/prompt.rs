//! User prompt seam.
//!
//! Flows that need the user (passwords, names, picking an endpoint) go
//! through a [`Prompter`], so the core stays UI-free. Every method resolves
//! to `None` when the user cancels.

use std::future::Future;
use std::pin::Pin;

use crate::registry::Endpoint;

/// Boxed future returned by [`Prompter`] methods.
pub type PromptFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

/// Injected user-prompt capability.
pub trait Prompter: Send + Sync {
    /// Asks for the password of `endpoint`.
    fn request_credential(&self, endpoint: &Endpoint) -> PromptFuture<'_>;

    /// Asks for free text, pre-filled with `default`.
    fn request_text(&self, prompt: &str, default: &str) -> PromptFuture<'_>;

    /// Asks the user to pick one of `candidates`; resolves to its id.
    fn choose_endpoint(&self, candidates: &[Endpoint]) -> PromptFuture<'_>;
}
