//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed Request (selector, query, flag)
//!     → dispatcher.rs: hard limits (length, symbol ratio, unicode complexity)
//!     → dispatcher.rs: input filter on the query → Allow(normalized) | Block
//!     → router.rs: longest selector-prefix match (Finger goes to its handler)
//!     → FeatureHandler::handle(remainder, sanitized query, context, writer)
//! ```
//!
//! # Design Decisions
//! - Routes are registered at startup and immutable at runtime
//! - Prefixes match on whole path segments: `/ask` matches `/ask/helpful`,
//!   never `/asking`
//! - Handlers never see a query that failed validation or sanitization
//! - Handler failures become a [`ClientError`]; raw error text stays in logs

pub mod dispatcher;
pub mod router;

use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ClientError;
use crate::generation::GenerationError;
use crate::net::ConnectionContext;
use crate::protocol::{ClientWriter, RequestFlag};

pub use dispatcher::Dispatcher;
pub use router::{RouteMatch, Router};

/// Failures raised by feature handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A failure that already has a client-facing category.
    #[error("{0}")]
    Client(ClientError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("client write failed: {0}")]
    Io(#[from] io::Error),
}

impl From<ClientError> for HandlerError {
    fn from(err: ClientError) -> Self {
        HandlerError::Client(err)
    }
}

impl From<&HandlerError> for ClientError {
    fn from(err: &HandlerError) -> Self {
        match err {
            HandlerError::Client(client) => client.clone(),
            HandlerError::Generation(gen) => ClientError::from(gen),
            HandlerError::Io(_) => ClientError::Internal,
        }
    }
}

impl HandlerError {
    /// Whether the client socket is known to be unusable.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            HandlerError::Io(_) | HandlerError::Generation(GenerationError::ClientGone(_))
        )
    }
}

/// What a feature handler is given for one request.
#[derive(Debug, Clone, Copy)]
pub struct HandlerRequest<'a> {
    /// Selector text after the matched route prefix, without a leading `/`.
    pub remainder: &'a str,
    /// Query text after input sanitization.
    pub query: Option<&'a str>,
    pub flag: &'a RequestFlag,
    pub context: &'a ConnectionContext,
}

/// A feature reachable by selector prefix.
#[async_trait]
pub trait FeatureHandler: Send + Sync {
    /// Write a complete response body to `writer`.
    ///
    /// The session renders errors and emits the protocol terminator.
    async fn handle(
        &self,
        request: HandlerRequest<'_>,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError>;

    /// Handler name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_errors_map_to_safe_categories() {
        let io = HandlerError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(io.is_disconnect());
        assert_eq!(ClientError::from(&io), ClientError::Internal);

        let gen = HandlerError::from(GenerationError::Status(500));
        assert!(!gen.is_disconnect());
        assert_eq!(ClientError::from(&gen), ClientError::TemporaryFailure);

        let client = HandlerError::from(ClientError::NotFound);
        assert_eq!(ClientError::from(&client), ClientError::NotFound);
    }
}
