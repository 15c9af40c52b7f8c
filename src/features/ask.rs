//! AI answers.
//!
//! `/ask` uses the default persona, `/ask/<persona>` a named one. Without a
//! query the client is prompted for one.

use async_trait::async_trait;

use super::Services;
use crate::dispatch::{FeatureHandler, HandlerError, HandlerRequest};
use crate::error::ClientError;
use crate::generation::GenerationRequest;
use crate::protocol::ClientWriter;

pub struct AskHandler {
    services: Services,
}

impl AskHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl FeatureHandler for AskHandler {
    async fn handle(
        &self,
        request: HandlerRequest<'_>,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError> {
        let persona = self
            .services
            .resolve_persona(request.remainder)
            .ok_or(ClientError::NotFound)?;

        let Some(query) = request.query else {
            writer
                .input_required(&format!("Ask {} a question", persona.name))
                .await?;
            return Ok(());
        };

        let generation = GenerationRequest::new(
            query,
            self.services.model_for(persona),
            persona.name.as_str(),
            persona.system_prompt.as_str(),
        );
        let source = self.services.generation.respond(generation, writer).await?;

        tracing::info!(
            connection_id = %request.context.id,
            protocol = %request.context.protocol,
            persona = %persona.name,
            source = ?source,
            "Answer served"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ask"
    }
}
