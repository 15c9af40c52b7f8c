//! Root menu.

use async_trait::async_trait;

use super::Services;
use crate::dispatch::{FeatureHandler, HandlerError, HandlerRequest};
use crate::protocol::{ClientWriter, LinkKind};

pub struct MenuHandler {
    services: Services,
}

impl MenuHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl FeatureHandler for MenuHandler {
    async fn handle(
        &self,
        _request: HandlerRequest<'_>,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError> {
        let identity = &self.services.config.server;
        writer.line(&format!("Welcome to {}", identity.hostname)).await?;
        writer.text(&identity.description).await?;
        writer.line("").await?;

        writer.link(LinkKind::Search, "Ask a question", "/ask").await?;
        for persona in &self.services.config.personas {
            let display = format!("Ask {}", persona.name);
            writer
                .link(LinkKind::Search, &display, &format!("/ask/{}", persona.name))
                .await?;
        }
        writer.line("").await?;
        writer.link(LinkKind::Menu, "Personas", "/personas").await?;
        writer.link(LinkKind::Menu, "About this server", "/about").await?;
        writer.link(LinkKind::Menu, "Server status", "/status").await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "menu"
    }
}
