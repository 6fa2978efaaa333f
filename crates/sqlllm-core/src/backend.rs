//! Generation backend interface.
//!
//! A backend turns one prompt into one free-text completion. It is created
//! once by the caller and handed to the generation loop by reference; the loop
//! never owns, caches or reconfigures it.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Text-generation capability used by the retry loop.
///
/// Calls may block for as long as the backend takes; timeouts are the
/// backend's own configuration.
pub trait GenerationBackend {
    /// Generate a completion for `prompt`.
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Short human-readable identity, for logs and status lines.
    fn describe(&self) -> String {
        "backend".to_string()
    }
}

impl<B: GenerationBackend + ?Sized> GenerationBackend for &B {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<B: GenerationBackend + ?Sized> GenerationBackend for Box<B> {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Backend not configured: {0}")]
    Config(String),
}

// ============================================================================
// Scripted backend
// ============================================================================

/// Deterministic backend that replays a fixed list of responses in order.
///
/// Once the script runs out every call fails with `InvalidResponse`.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: RefCell<VecDeque<Result<String, GenerationError>>>,
    prompts: RefCell<Vec<String>>,
    calls: Cell<usize>,
}

impl ScriptedBackend {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|s| Ok(s.into())))
    }

    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, GenerationError>>,
    {
        Self {
            responses: RefCell::new(results.into_iter().collect()),
            prompts: RefCell::new(Vec::new()),
            calls: Cell::new(0),
        }
    }

    /// Number of `generate` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.calls.set(self.calls.get() + 1);
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::InvalidResponse("script exhausted".to_string())))
    }

    fn describe(&self) -> String {
        format!("scripted({} left)", self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_backend_replays_in_order_then_fails() {
        let backend = ScriptedBackend::from_results([
            Ok("SELECT 1".to_string()),
            Err(GenerationError::Network("down".to_string())),
        ]);

        assert_eq!(backend.generate("p1").unwrap(), "SELECT 1");
        assert_eq!(
            backend.generate("p2").unwrap_err(),
            GenerationError::Network("down".to_string())
        );
        assert!(matches!(
            backend.generate("p3"),
            Err(GenerationError::InvalidResponse(_))
        ));
        assert_eq!(backend.calls(), 3);
        assert_eq!(backend.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn boxed_and_borrowed_backends_delegate() {
        let backend: Box<dyn GenerationBackend> = Box::new(ScriptedBackend::new(["a"]));
        let by_ref: &dyn GenerationBackend = &backend;
        assert_eq!(by_ref.generate("x").unwrap(), "a");
        assert!(backend.describe().starts_with("scripted("));
    }
}
