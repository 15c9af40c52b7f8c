//! About page.

use async_trait::async_trait;

use super::Services;
use crate::dispatch::{FeatureHandler, HandlerError, HandlerRequest};
use crate::protocol::{ClientWriter, LinkKind};

pub struct AboutHandler {
    services: Services,
}

impl AboutHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl FeatureHandler for AboutHandler {
    async fn handle(
        &self,
        _request: HandlerRequest<'_>,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError> {
        let config = &self.services.config;
        writer
            .line(&format!("burrow {}", env!("CARGO_PKG_VERSION")))
            .await?;
        writer.line("").await?;
        writer.text(&config.server.description).await?;
        writer.line("").await?;

        let mut protocols: Vec<&str> = config.listeners.iter().map(|l| l.protocol.as_str()).collect();
        protocols.sort_unstable();
        protocols.dedup();
        writer
            .line(&format!("Protocols: {}", protocols.join(", ")))
            .await?;
        writer
            .line(&format!("Personas: {}", config.personas.len()))
            .await?;
        writer
            .line("Answers are generated by a language model and may be wrong.")
            .await?;
        writer.line("").await?;
        writer.link(LinkKind::Menu, "Back", "/").await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "about"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::testing::{context, output, services, writer, NO_FLAG};
    use crate::protocol::Protocol;

    #[tokio::test]
    async fn describes_server() {
        let services = services();
        let handler = AboutHandler::new(services.clone());
        let ctx = context(Protocol::Finger);
        let (mut w, client) = writer(&services, Protocol::Finger);
        let request = HandlerRequest { remainder: "", query: None, flag: &NO_FLAG, context: &ctx };
        handler.handle(request, &mut w).await.unwrap();

        let out = output(w, client).await;
        assert!(out.contains("Test burrow.\r\n"));
        assert!(out.contains("Protocols: finger, gemini, gopher\r\n"));
        assert!(out.contains("Personas: 2\r\n"));
    }
}
