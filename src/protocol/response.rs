//! Protocol-correct response rendering.
//!
//! # Responsibilities
//! - Emit the Gemini status header exactly once
//! - Render content, links and errors in each protocol's layout
//! - Route every content line through `sanitize::escape`
//! - Emit the Gopher terminator on finish
//!
//! # Design Decisions
//! - Gopher responses are always menus; text is rendered as `i` lines
//! - Writes are bounded by a per-write timeout
//! - An error after the Gemini header has gone out is rendered as a content line

use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::config::ServerIdentity;
use crate::error::ClientError;
use crate::protocol::gemini::percent_encode;
use crate::protocol::Protocol;
use crate::sanitize::escape::{escape_field, escape_line, split_lines};

/// Boxed socket half handed to feature handlers.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The writer type used by sessions and feature handlers.
pub type ClientWriter = ResponseWriter<BoxedWriter>;

const GEMINI_SUCCESS: &str = "20 text/gemini; charset=utf-8";
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of navigable item in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Another listing (Gopher type `1`).
    Menu,
    /// A search endpoint (Gopher type `7`).
    Search,
}

impl LinkKind {
    fn gopher_type(self) -> char {
        match self {
            LinkKind::Menu => '1',
            LinkKind::Search => '7',
        }
    }
}

/// Writes one response to a client in the framing of its protocol.
pub struct ResponseWriter<W> {
    protocol: Protocol,
    inner: BufWriter<W>,
    host: String,
    port: u16,
    header_sent: bool,
    finished: bool,
    lines_written: usize,
    write_timeout: Duration,
}

impl<W: AsyncWrite + Unpin + Send> ResponseWriter<W> {
    pub fn new(protocol: Protocol, writer: W, identity: &ServerIdentity) -> Self {
        Self {
            protocol,
            inner: BufWriter::new(writer),
            host: identity.hostname.clone(),
            port: identity.gopher_port,
            header_sent: false,
            finished: false,
            lines_written: 0,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Content lines written so far.
    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    /// Whether any bytes of a success response have been produced.
    pub fn has_started(&self) -> bool {
        self.header_sent || self.lines_written > 0
    }

    /// Emit the success header if the protocol has one.
    pub async fn begin(&mut self) -> io::Result<()> {
        if self.header_sent {
            return Ok(());
        }
        self.header_sent = true;
        if self.protocol == Protocol::Gemini {
            self.raw_line(GEMINI_SUCCESS).await?;
        }
        Ok(())
    }

    /// Write one line of display text.
    ///
    /// Embedded line breaks are normalized; use [`Self::text`] for blocks.
    pub async fn line(&mut self, text: &str) -> io::Result<()> {
        self.begin().await?;
        let escaped = escape_line(self.protocol, text);
        let rendered = match self.protocol {
            Protocol::Gopher => format!("i{escaped}\tfake\t(NULL)\t0"),
            Protocol::Gemini | Protocol::Finger => escaped.into_owned(),
        };
        self.raw_line(&rendered).await?;
        self.lines_written += 1;
        Ok(())
    }

    /// Write a block of display text, one protocol line per logical line.
    pub async fn text(&mut self, text: &str) -> io::Result<()> {
        for line in split_lines(text) {
            self.line(line).await?;
        }
        Ok(())
    }

    /// Flush buffered lines to the socket.
    pub async fn flush(&mut self) -> io::Result<()> {
        let timeout = self.write_timeout;
        with_timeout(timeout, self.inner.flush()).await
    }

    /// Write a navigable item.
    pub async fn link(&mut self, kind: LinkKind, display: &str, selector: &str) -> io::Result<()> {
        self.begin().await?;
        let display = escape_field(display);
        let rendered = match self.protocol {
            Protocol::Gopher => format!(
                "{}{}\t{}\t{}\t{}",
                kind.gopher_type(),
                display,
                escape_field(selector),
                self.host,
                self.port
            ),
            Protocol::Gemini => format!("=> {} {}", percent_encode(selector), display),
            Protocol::Finger => format!("  {display}"),
        };
        self.raw_line(&rendered).await?;
        self.lines_written += 1;
        Ok(())
    }

    /// Ask the client for input (Gemini status 10).
    ///
    /// Other protocols get the prompt as a text line.
    pub async fn input_required(&mut self, prompt: &str) -> io::Result<()> {
        if self.protocol == Protocol::Gemini && !self.header_sent {
            self.header_sent = true;
            let header = format!("10 {}", escape_field(prompt));
            return self.raw_line(&header).await;
        }
        self.line(prompt).await
    }

    /// Render a failure in the protocol's error form.
    pub async fn error(&mut self, err: &ClientError) -> io::Result<()> {
        let phrase = err.phrase();
        match self.protocol {
            Protocol::Gemini if !self.header_sent => {
                self.header_sent = true;
                let header = format!("{} {}", err.gemini_status(), escape_field(&err.gemini_meta()));
                self.raw_line(&header).await
            }
            Protocol::Gemini | Protocol::Finger => self.line(&format!("Error: {phrase}")).await,
            Protocol::Gopher => {
                let rendered = format!("3{}\tfake\t(NULL)\t0", escape_field(&phrase));
                self.raw_line(&rendered).await
            }
        }
    }

    /// Emit the terminator (if any), flush and close the write half.
    pub async fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.protocol.has_terminator() {
            self.raw_line(".").await?;
        }
        let timeout = self.write_timeout;
        with_timeout(timeout, self.inner.flush()).await?;
        with_timeout(timeout, self.inner.shutdown()).await
    }

    /// Close the write half without a terminator. Used when no request was read.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        with_timeout(self.write_timeout, self.inner.shutdown()).await
    }

    async fn raw_line(&mut self, line: &str) -> io::Result<()> {
        let timeout = self.write_timeout;
        let inner = &mut self.inner;
        with_timeout(timeout, async move {
            inner.write_all(line.as_bytes()).await?;
            inner.write_all(b"\r\n").await
        })
        .await
    }
}

async fn with_timeout<F>(timeout: Duration, fut: F) -> io::Result<()>
where
    F: std::future::Future<Output = io::Result<()>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "client write timed out")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn writer(protocol: Protocol) -> (ResponseWriter<DuplexStream>, DuplexStream) {
        let identity = ServerIdentity {
            hostname: "gopher.example".into(),
            gopher_port: 70,
            description: String::new(),
        };
        let (client, server) = tokio::io::duplex(64 * 1024);
        (ResponseWriter::new(protocol, server, &identity), client)
    }

    async fn collect(mut w: ResponseWriter<DuplexStream>, mut client: DuplexStream) -> String {
        w.finish().await.unwrap();
        drop(w);
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn gopher_menu_layout() {
        let (mut w, client) = writer(Protocol::Gopher);
        w.line("Hello").await.unwrap();
        w.link(LinkKind::Search, "Ask", "/ask").await.unwrap();
        assert_eq!(
            collect(w, client).await,
            "iHello\tfake\t(NULL)\t0\r\n7Ask\t/ask\tgopher.example\t70\r\n.\r\n"
        );
    }

    #[tokio::test]
    async fn gopher_content_cannot_terminate_early() {
        let (mut w, client) = writer(Protocol::Gopher);
        w.text("a\n.\nb\tc").await.unwrap();
        assert_eq!(
            collect(w, client).await,
            "ia\tfake\t(NULL)\t0\r\ni .\tfake\t(NULL)\t0\r\nib c\tfake\t(NULL)\t0\r\n.\r\n"
        );
    }

    #[tokio::test]
    async fn gemini_header_once() {
        let (mut w, client) = writer(Protocol::Gemini);
        w.line("one").await.unwrap();
        w.line("=> gemini://x/ injected").await.unwrap();
        w.link(LinkKind::Menu, "Home", "/").await.unwrap();
        assert_eq!(
            collect(w, client).await,
            "20 text/gemini; charset=utf-8\r\none\r\n => gemini://x/ injected\r\n=> / Home\r\n"
        );
    }

    #[tokio::test]
    async fn gemini_errors_use_status_line() {
        let (mut w, client) = writer(Protocol::Gemini);
        let err = ClientError::RateLimited { retry_after: Duration::from_secs(7) };
        w.error(&err).await.unwrap();
        assert_eq!(collect(w, client).await, "44 7\r\n");
    }

    #[tokio::test]
    async fn gemini_error_after_header_is_inline() {
        let (mut w, client) = writer(Protocol::Gemini);
        w.line("partial").await.unwrap();
        w.error(&ClientError::Timeout).await.unwrap();
        let out = collect(w, client).await;
        assert!(out.starts_with("20 "));
        assert!(out.ends_with("Error: Generation timed out, please try again later\r\n"));
    }

    #[tokio::test]
    async fn gopher_error_line() {
        let (mut w, client) = writer(Protocol::Gopher);
        w.error(&ClientError::Blocklisted).await.unwrap();
        assert_eq!(
            collect(w, client).await,
            "3Access denied: your address is blocklisted\tfake\t(NULL)\t0\r\n.\r\n"
        );
    }

    #[tokio::test]
    async fn gemini_input_prompt() {
        let (mut w, client) = writer(Protocol::Gemini);
        w.input_required("Ask a question").await.unwrap();
        assert_eq!(collect(w, client).await, "10 Ask a question\r\n");
    }

    #[tokio::test]
    async fn finger_is_plain_text() {
        let (mut w, client) = writer(Protocol::Finger);
        w.text("Login: helpful\n.").await.unwrap();
        assert_eq!(collect(w, client).await, "Login: helpful\r\n .\r\n");
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let (mut w, client) = writer(Protocol::Gopher);
        w.finish().await.unwrap();
        assert_eq!(collect(w, client).await, ".\r\n");
    }

    #[tokio::test]
    async fn close_skips_terminator() {
        let (mut w, client) = writer(Protocol::Gopher);
        w.close().await.unwrap();
        assert_eq!(collect(w, client).await, "");
    }
}
