//! Cache-aware generation front end used by feature handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWrite;
use tokio::sync::Semaphore;

use super::{GenerationError, GenerationRequest, Generator};
use crate::cache::ResponseCache;
use crate::config::{ServerConfig, StreamingConfig};
use crate::observability::metrics;
use crate::protocol::ResponseWriter;
use crate::sanitize::OutputFilter;
use crate::streaming::{relay, replay, LineSink, RelaySettings};

/// Where a response's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cached,
    Generated,
}

/// Answers generation requests from the cache or the backend.
pub struct GenerationService {
    generator: Arc<dyn Generator>,
    cache: Arc<ResponseCache>,
    output: OutputFilter,
    streaming: StreamingConfig,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    queue_capacity: usize,
    timeout: Duration,
}

impl GenerationService {
    pub fn new(
        generator: Arc<dyn Generator>,
        cache: Arc<ResponseCache>,
        output: OutputFilter,
        config: &ServerConfig,
    ) -> Self {
        let max_concurrent = config.generation.max_concurrent.max(1);
        Self {
            generator,
            cache,
            output,
            streaming: config.streaming.clone(),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queue_capacity: config.generation.queue_capacity.max(1),
            timeout: Duration::from_secs(config.timeouts.generation_secs),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn backend_name(&self) -> &str {
        self.generator.name()
    }

    /// Generations currently holding a backend slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stream an answer for `request` to `writer`.
    ///
    /// On a cache hit the stored text is replayed through the same formatter
    /// and output filter as live output. On a miss the backend is streamed
    /// and, if the request is stateless, the raw text is stored.
    pub async fn respond<W>(
        &self,
        request: GenerationRequest,
        writer: &mut ResponseWriter<W>,
    ) -> Result<ResponseSource, GenerationError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let start = Instant::now();
        let key = request.cache_key();

        if let Some(cached) = key.as_ref().and_then(|k| self.cache.get(k)) {
            tracing::debug!(persona = %request.persona, "Serving cached response");
            let mut sink = LineSink::new(writer, &self.output, &self.streaming);
            replay(&cached, &mut sink)
                .await
                .map_err(GenerationError::ClientGone)?;
            metrics::record_generation("cached", start);
            return Ok(ResponseSource::Cached);
        }

        let settings = RelaySettings {
            queue_capacity: self.queue_capacity,
            deadline: tokio::time::Instant::now() + self.timeout,
        };
        let persona = request.persona.clone();
        let result = {
            let mut sink = LineSink::new(writer, &self.output, &self.streaming);
            relay(
                Arc::clone(&self.generator),
                request,
                Arc::clone(&self.slots),
                settings,
                &mut sink,
            )
            .await
        };

        match result {
            Ok(text) => {
                metrics::record_generation("ok", start);
                tracing::debug!(
                    persona = %persona,
                    chars = text.chars().count(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Generation completed"
                );
                if let Some(key) = key {
                    if !text.trim().is_empty() {
                        self.cache.put(key, text);
                    }
                }
                Ok(ResponseSource::Generated)
            }
            Err(e) => {
                metrics::record_generation(e.label(), start);
                tracing::warn!(
                    persona = %persona,
                    backend = self.generator.name(),
                    error = %e,
                    "Generation failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerIdentity;
    use crate::generation::{Role, Turn};
    use crate::protocol::Protocol;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, DuplexStream};

    struct Counting {
        calls: AtomicUsize,
        answer: &'static str,
    }

    #[async_trait]
    impl Generator for Counting {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.to_string())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn service(answer: &'static str) -> (GenerationService, Arc<Counting>) {
        let generator = Arc::new(Counting { calls: AtomicUsize::new(0), answer });
        let config = ServerConfig::default();
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let service = GenerationService::new(
            generator.clone(),
            cache,
            OutputFilter::default(),
            &config,
        );
        (service, generator)
    }

    async fn run(service: &GenerationService, request: GenerationRequest) -> (ResponseSource, String) {
        let (mut client, server): (DuplexStream, DuplexStream) = tokio::io::duplex(64 * 1024);
        let mut writer = ResponseWriter::new(Protocol::Finger, server, &ServerIdentity::default());
        let source = service.respond(request, &mut writer).await.unwrap();
        writer.finish().await.unwrap();
        drop(writer);
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        (source, out)
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let (service, generator) = service("Gophers dig burrows.");
        let request = GenerationRequest::new("What do gophers do?", "m", "helpful", "sys");

        let (first, out1) = run(&service, request.clone()).await;
        let (second, out2) = run(&service, request).await;

        assert_eq!(first, ResponseSource::Generated);
        assert_eq!(second, ResponseSource::Cached);
        assert_eq!(out1, out2);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn normalized_queries_share_an_entry() {
        let (service, generator) = service("Yes.");
        run(&service, GenerationRequest::new("Is it  raining?", "m", "p", "")).await;
        let (source, _) = run(&service, GenerationRequest::new("  is it raining? ", "m", "p", "")).await;
        assert_eq!(source, ResponseSource::Cached);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_text_is_redacted_on_replay() {
        let (service, _) = service("Reach me at 192.168.1.20 please.");
        let request = GenerationRequest::new("where?", "m", "p", "");
        let (_, live) = run(&service, request.clone()).await;
        let (_, cached) = run(&service, request).await;
        assert!(!live.contains("192.168.1.20"));
        assert_eq!(live, cached);
    }

    #[tokio::test]
    async fn empty_answers_are_not_cached() {
        let (service, generator) = service("   ");
        let request = GenerationRequest::new("q", "m", "p", "");
        run(&service, request.clone()).await;
        run(&service, request).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn requests_with_context_bypass_the_cache() {
        let (service, generator) = service("Still digging.");
        let request = GenerationRequest::new("and then?", "m", "p", "").with_context(vec![Turn {
            role: Role::User,
            text: "What do gophers do?".into(),
        }]);
        let (first, _) = run(&service, request.clone()).await;
        let (second, _) = run(&service, request).await;
        assert_eq!(first, ResponseSource::Generated);
        assert_eq!(second, ResponseSource::Generated);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn slots_are_released_after_each_request() {
        let (service, _) = service("done");
        run(&service, GenerationRequest::new("a", "m", "p", "")).await;
        run(&service, GenerationRequest::new("b", "m", "p", "")).await;
        tokio::task::yield_now().await;
        assert_eq!(service.in_flight(), 0);
    }
}
