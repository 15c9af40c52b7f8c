//! Persona directory.

use async_trait::async_trait;

use super::Services;
use crate::dispatch::{FeatureHandler, HandlerError, HandlerRequest};
use crate::protocol::{ClientWriter, LinkKind};

pub struct PersonasHandler {
    services: Services,
}

impl PersonasHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl FeatureHandler for PersonasHandler {
    async fn handle(
        &self,
        _request: HandlerRequest<'_>,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError> {
        writer.line("Personas").await?;
        writer.line("").await?;
        for persona in &self.services.config.personas {
            let display = if persona.description.is_empty() {
                persona.name.clone()
            } else {
                format!("{}: {}", persona.name, persona.description)
            };
            writer
                .link(LinkKind::Search, &display, &format!("/ask/{}", persona.name))
                .await?;
        }
        writer.line("").await?;
        writer.link(LinkKind::Menu, "Back", "/").await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "personas"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::testing::{context, output, services, writer, NO_FLAG};
    use crate::protocol::Protocol;

    #[tokio::test]
    async fn lists_personas_with_descriptions() {
        let services = services();
        let handler = PersonasHandler::new(services.clone());
        let ctx = context(Protocol::Gemini);
        let (mut w, client) = writer(&services, Protocol::Gemini);
        let request = HandlerRequest { remainder: "", query: None, flag: &NO_FLAG, context: &ctx };
        handler.handle(request, &mut w).await.unwrap();

        let out = output(w, client).await;
        assert!(out.contains("=> /ask/pirate pirate: Talks like a pirate.\r\n"));
        assert!(out.contains("=> /ask/helpful helpful: "));
        assert!(!out.contains("You are a pirate"));
    }
}
