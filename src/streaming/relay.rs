//! Producer/consumer relay from a generator to a client socket.
//!
//! # Data Flow
//! ```text
//! producer task (holds a generation slot)
//!     → generate_stream → bounded mpsc (queue_capacity fragments)
//! consumer (session task)
//!     → StreamRedactor::push → StreamFormatter::push
//!     → ResponseWriter::line → flush
//! ```
//!
//! # Design Decisions
//! - Redaction runs on the raw stream before line boundaries are chosen, so
//!   a secret or prompt sentence is never split across two lines unredacted
//! - The consumer flushes each line before taking the next fragment; the
//!   bounded queue pauses the producer when the client is slow
//! - Client disconnect, deadline or consumer drop abort the producer task,
//!   which releases its slot
//! - Output already sent is never retracted

use std::io;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use crate::config::StreamingConfig;
use crate::generation::{GenerationError, GenerationRequest, Generator};
use crate::protocol::ResponseWriter;
use crate::sanitize::{OutputFilter, StreamRedactor};
use crate::streaming::formatter::StreamFormatter;

/// Writes one generation to a client: redact the stream, cut it into
/// lines, strip each line break, escape.
pub struct LineSink<'a, W> {
    writer: &'a mut ResponseWriter<W>,
    redactor: StreamRedactor<'a>,
    formatter: StreamFormatter,
}

impl<'a, W: AsyncWrite + Unpin + Send> LineSink<'a, W> {
    pub fn new(
        writer: &'a mut ResponseWriter<W>,
        filter: &'a OutputFilter,
        config: &StreamingConfig,
    ) -> Self {
        Self {
            writer,
            redactor: filter.stream(),
            formatter: StreamFormatter::new(config),
        }
    }

    /// Take one raw fragment and write every line it completes.
    pub async fn push(&mut self, fragment: &str) -> io::Result<()> {
        let clean = self.redactor.push(fragment);
        if clean.is_empty() {
            return Ok(());
        }
        let chunks = self.formatter.push(&clean);
        self.emit_all(chunks).await
    }

    /// Release held-back text and write the final lines.
    pub async fn finish(&mut self) -> io::Result<()> {
        let clean = self.redactor.finish();
        let mut chunks = self.formatter.push(&clean);
        chunks.extend(self.formatter.finish());
        self.emit_all(chunks).await
    }

    async fn emit_all(&mut self, chunks: Vec<String>) -> io::Result<()> {
        for chunk in chunks {
            let line = chunk.trim_end_matches(['\r', '\n']);
            self.writer.line(line).await?;
            self.writer.flush().await?;
        }
        Ok(())
    }
}

/// Re-emit stored text as if it were streamed.
pub async fn replay<W>(text: &str, sink: &mut LineSink<'_, W>) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    sink.push(text).await?;
    sink.finish().await
}

/// Limits for one relayed generation.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub queue_capacity: usize,
    pub deadline: Instant,
}

/// Aborts the producer if the consumer stops early for any reason.
struct ProducerGuard(JoinHandle<Result<String, GenerationError>>);

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `request` on a producer task and stream its output to `sink`.
///
/// Returns the full generated text (before redaction) on success.
pub async fn relay<W>(
    generator: Arc<dyn Generator>,
    request: GenerationRequest,
    slots: Arc<Semaphore>,
    settings: RelaySettings,
    sink: &mut LineSink<'_, W>,
) -> Result<String, GenerationError>
where
    W: AsyncWrite + Unpin + Send,
{
    let permit = timeout_at(settings.deadline, slots.acquire_owned())
        .await
        .map_err(|_| GenerationError::Timeout)?
        .map_err(|_| GenerationError::SlotsClosed)?;

    let (tx, mut rx) = mpsc::channel::<String>(settings.queue_capacity.max(1));
    let mut producer = ProducerGuard(tokio::spawn(async move {
        let _permit = permit;
        generator.generate_stream(&request, tx).await
    }));

    let mut streamed = String::new();

    loop {
        match timeout_at(settings.deadline, rx.recv()).await {
            Err(_) => return Err(GenerationError::Timeout),
            Ok(None) => break,
            Ok(Some(fragment)) => {
                streamed.push_str(&fragment);
                sink.push(&fragment).await.map_err(GenerationError::ClientGone)?;
            }
        }
    }

    // The channel closed: the producer has returned or is about to.
    let outcome = match timeout_at(settings.deadline, &mut producer.0).await {
        Err(_) => return Err(GenerationError::Timeout),
        Ok(Err(join)) => Err(GenerationError::Backend(format!("generation task failed: {join}"))),
        Ok(Ok(result)) => result,
    };

    // Flush what was produced even if the backend failed part way.
    sink.finish().await.map_err(GenerationError::ClientGone)?;

    outcome.map(|_| streamed)
}
