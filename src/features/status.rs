//! Server status page: admission, cache and backend statistics.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::{format_uptime, Services};
use crate::dispatch::{FeatureHandler, HandlerError, HandlerRequest};
use crate::protocol::{ClientWriter, LinkKind};

pub struct StatusHandler {
    services: Services,
}

impl StatusHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    fn lines(&self) -> Vec<String> {
        let services = &self.services;
        let blocklist = services.gate.blocklist().stats();
        let limiter = services.gate.limiter().stats();
        let cache = services.generation.cache().stats();

        let last_refresh = match blocklist.last_refresh {
            Some(at) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(at);
                format!("{}s ago", now.saturating_sub(at))
            }
            None => "never".to_string(),
        };

        vec![
            "Server status".to_string(),
            String::new(),
            format!("Uptime:              {}", format_uptime(services.started_at.elapsed())),
            format!("Active connections:  {}", services.tracker.active_count()),
            String::new(),
            format!("Blocked addresses:   {}", blocklist.exact_count),
            format!("Blocked networks:    {}", blocklist.cidr_count),
            format!("Blocklist refreshed: {last_refresh}"),
            format!("Tracked clients:     {}", limiter.tracked),
            format!("Active bans:         {}", limiter.banned),
            String::new(),
            format!("Cached answers:      {} / {}", cache.size, cache.capacity),
            format!("Cache hit rate:      {:.1}%", cache.hit_rate * 100.0),
            format!(
                "Generations:         {} of {} slots busy",
                services.generation.in_flight(),
                services.generation.max_concurrent()
            ),
        ]
    }
}

#[async_trait]
impl FeatureHandler for StatusHandler {
    async fn handle(
        &self,
        _request: HandlerRequest<'_>,
        writer: &mut ClientWriter,
    ) -> Result<(), HandlerError> {
        for line in self.lines() {
            writer.line(&line).await?;
        }
        writer.line("").await?;
        writer.link(LinkKind::Menu, "Back", "/").await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "status"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::testing::{context, output, services, writer, NO_FLAG};
    use crate::protocol::Protocol;

    #[tokio::test]
    async fn reports_subsystem_counters() {
        let services = services();
        services.gate.blocklist().load_source("test", "192.0.2.1\n203.0.113.0/24\n");
        let handler = StatusHandler::new(services.clone());
        let ctx = context(Protocol::Finger);
        let (mut w, client) = writer(&services, Protocol::Finger);
        let request = HandlerRequest { remainder: "", query: None, flag: &NO_FLAG, context: &ctx };
        handler.handle(request, &mut w).await.unwrap();

        let out = output(w, client).await;
        assert!(out.contains("Blocked addresses:   1\r\n"));
        assert!(out.contains("Blocked networks:    1\r\n"));
        assert!(out.contains("Cached answers:      0 / 1000\r\n"));
        assert!(out.contains("Generations:         0 of 4 slots busy\r\n"));
    }
}
