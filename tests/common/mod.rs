//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use burrow::config::{ListenerConfig, ServerConfig};
use burrow::generation::{GenerationError, GenerationRequest, Generator};
use burrow::protocol::Protocol;
use burrow::{App, Server, Shutdown};

/// Backend that answers with a fixed text and counts its calls.
pub struct ScriptedBackend {
    answer: String,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(answer: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.into(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedBackend {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }

    async fn generate_stream(
        &self,
        _request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for word in self.answer.split_inclusive(' ') {
            tx.send(word.to_string())
                .await
                .map_err(|_| GenerationError::Cancelled)?;
        }
        Ok(self.answer.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Configuration listening on ephemeral loopback ports for every protocol.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.hostname = "burrow.test".into();
    config.listeners = vec![
        ListenerConfig::new(Protocol::Gopher, "127.0.0.1:0"),
        ListenerConfig::new(Protocol::Gemini, "127.0.0.1:0"),
        ListenerConfig::new(Protocol::Finger, "127.0.0.1:0"),
    ];
    config.blocklist.sources.clear();
    config.timeouts.idle_secs = 2;
    config
}

/// A running server plus handles to reach into it.
pub struct TestServer {
    pub app: Arc<App>,
    pub shutdown: Shutdown,
    gopher: SocketAddr,
    gemini: SocketAddr,
    finger: SocketAddr,
}

impl TestServer {
    pub async fn start(config: ServerConfig, backend: Arc<dyn Generator>) -> Self {
        let app = Arc::new(App::build(Arc::new(config), backend).unwrap());
        let server = Server::bind(Arc::clone(&app)).await.unwrap();
        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 3, "expected one listener per protocol");

        let shutdown = Shutdown::new();
        server.spawn(&shutdown);

        Self {
            app,
            shutdown,
            gopher: addrs[0],
            gemini: addrs[1],
            finger: addrs[2],
        }
    }

    pub fn addr(&self, protocol: Protocol) -> SocketAddr {
        match protocol {
            Protocol::Gopher => self.gopher,
            Protocol::Gemini => self.gemini,
            Protocol::Finger => self.finger,
        }
    }

    /// Send one request line and read the whole response.
    pub async fn request(&self, protocol: Protocol, line: &str) -> String {
        send(self.addr(protocol), line).await
    }

    pub async fn gopher(&self, line: &str) -> String {
        self.request(Protocol::Gopher, line).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Connect, write `line` with a CRLF and read until the server closes.
pub async fn send(addr: SocketAddr, line: &str) -> String {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\r\n").await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    };
    tokio::time::timeout(Duration::from_secs(10), exchange)
        .await
        .expect("server did not close the connection")
}
