//! Finger directory of personas.
//!
//! An empty query lists every persona; a name shows one. `/W` adds the model
//! and backend serving it.

use async_trait::async_trait;

use super::Services;
use crate::config::PersonaConfig;
use crate::dispatch::{FeatureHandler, HandlerError, HandlerRequest};
use crate::error::ClientError;
use crate::protocol::{ClientWriter, RequestFlag};

pub struct FingerHandler {
    services: Services,
}

impl FingerHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn describe(
        &self,
        persona: &PersonaConfig,
        verbose: bool,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError> {
        writer.line(&format!("Login: {}", persona.name)).await?;
        if !persona.description.is_empty() {
            writer.line(&format!("Name: {}", persona.description)).await?;
        }
        if verbose {
            writer
                .line(&format!("Model: {}", self.services.model_for(persona)))
                .await?;
            writer
                .line(&format!("Backend: {}", self.services.generation.backend_name()))
                .await?;
        }
        let host = &self.services.config.server.hostname;
        writer
            .line(&format!("Plan: ask me at gopher://{host}/7/ask/{}", persona.name))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FeatureHandler for FingerHandler {
    async fn handle(
        &self,
        request: HandlerRequest<'_>,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError> {
        let verbose = matches!(request.flag, RequestFlag::Verbose);

        if request.remainder.is_empty() {
            writer.line("Login        Name").await?;
            for persona in &self.services.config.personas {
                writer
                    .line(&format!("{:<12} {}", persona.name, persona.description))
                    .await?;
            }
            if verbose {
                writer.line("").await?;
                for persona in &self.services.config.personas {
                    self.describe(persona, true, writer).await?;
                    writer.line("").await?;
                }
            }
            return Ok(());
        }

        let persona = self
            .services
            .config
            .persona(request.remainder)
            .ok_or(ClientError::NotFound)?;
        self.describe(persona, verbose, writer).await
    }

    fn name(&self) -> &'static str {
        "finger"
    }
}
