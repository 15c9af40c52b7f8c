//! Generation subsystem.
//!
//! # Data Flow
//! ```text
//! GenerationRequest
//!     → service.rs (cache lookup)
//!         → hit:  replay cached text through the formatter
//!         → miss: streaming::relay (producer task → bounded queue → writer)
//!     → cache store (stateless requests only)
//! ```
//!
//! # Design Decisions
//! - The backend is a trait object so tests and other engines plug in
//! - Backends report fragments over a bounded channel; a closed channel
//!   means the consumer is gone and generation should stop
//! - Conversational context excludes a request from caching

pub mod ollama;
pub mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::cache::Fingerprint;
use crate::error::ClientError;

pub use ollama::OllamaGenerator;
pub use service::{GenerationService, ResponseSource};

/// Who spoke a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Everything a backend needs to produce one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub query: String,
    pub model: String,
    pub persona: String,
    pub system_prompt: String,
    /// Prior turns, oldest first. The built-in `/ask` route is stateless and
    /// leaves this empty; conversation features registered as their own
    /// [`FeatureHandler`](crate::dispatch::FeatureHandler) fill it.
    pub context: Vec<Turn>,
}

impl GenerationRequest {
    pub fn new(
        query: impl Into<String>,
        model: impl Into<String>,
        persona: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            model: model.into(),
            persona: persona.into(),
            system_prompt: system_prompt.into(),
            context: Vec::new(),
        }
    }

    /// Attach prior turns. Requests with context bypass the response cache.
    pub fn with_context(mut self, context: Vec<Turn>) -> Self {
        self.context = context;
        self
    }

    /// Cache fingerprint, or `None` when prior turns make the answer stateful.
    pub fn cache_key(&self) -> Option<Fingerprint> {
        if !self.context.is_empty() {
            return None;
        }
        Some(Fingerprint::compute(&self.query, &self.model, &self.persona))
    }

    /// Prompt text with prior turns rendered ahead of the query.
    pub fn prompt(&self) -> String {
        if self.context.is_empty() {
            return self.query.clone();
        }
        let mut prompt = String::new();
        for turn in &self.context {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(speaker);
            prompt.push_str(": ");
            prompt.push_str(&turn.text);
            prompt.push('\n');
        }
        prompt.push_str("User: ");
        prompt.push_str(&self.query);
        prompt.push_str("\nAssistant:");
        prompt
    }
}

/// Failures while producing generated text.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("backend returned status {0}")]
    Status(u16),

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("generation timed out")]
    Timeout,

    #[error("generation cancelled: consumer went away")]
    Cancelled,

    #[error("client write failed: {0}")]
    ClientGone(#[source] std::io::Error),

    #[error("generation slots closed")]
    SlotsClosed,
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else if let Some(status) = err.status() {
            GenerationError::Status(status.as_u16())
        } else {
            GenerationError::Backend(err.to_string())
        }
    }
}

impl GenerationError {
    pub fn label(&self) -> &'static str {
        match self {
            GenerationError::Backend(_) => "backend",
            GenerationError::Status(_) => "status",
            GenerationError::Decode(_) => "decode",
            GenerationError::Timeout => "timeout",
            GenerationError::Cancelled => "cancelled",
            GenerationError::ClientGone(_) => "client_gone",
            GenerationError::SlotsClosed => "slots_closed",
        }
    }
}

impl From<&GenerationError> for ClientError {
    fn from(err: &GenerationError) -> Self {
        match err {
            GenerationError::Timeout => ClientError::Timeout,
            GenerationError::ClientGone(_) | GenerationError::Cancelled => ClientError::Internal,
            _ => ClientError::TemporaryFailure,
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce the whole answer at once.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Send fragments on `tx` as they are produced and return the full text.
    ///
    /// Must stop with [`GenerationError::Cancelled`] once `tx` is closed.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        let text = self.generate(request).await?;
        tx.send(text.clone())
            .await
            .map_err(|_| GenerationError::Cancelled)?;
        Ok(text)
    }

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_disables_caching() {
        let stateless = GenerationRequest::new("hi", "m", "p", "sys");
        assert!(stateless.cache_key().is_some());

        let stateful = stateless.clone().with_context(vec![Turn {
            role: Role::User,
            text: "earlier".into(),
        }]);
        assert!(stateful.cache_key().is_none());
    }

    #[test]
    fn prompt_includes_turns() {
        let request = GenerationRequest::new("and now?", "m", "p", "sys").with_context(vec![
            Turn { role: Role::User, text: "hello".into() },
            Turn { role: Role::Assistant, text: "hi there".into() },
        ]);
        assert_eq!(
            request.prompt(),
            "User: hello\nAssistant: hi there\nUser: and now?\nAssistant:"
        );
    }

    #[test]
    fn client_mapping_hides_detail() {
        let err = GenerationError::Backend("connection refused to 10.0.0.3".into());
        let client = ClientError::from(&err);
        assert_eq!(client, ClientError::TemporaryFailure);
        assert!(!client.phrase().contains("10.0.0.3"));
        assert_eq!(ClientError::from(&GenerationError::Timeout), ClientError::Timeout);
    }
}
