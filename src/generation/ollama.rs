//! Ollama-compatible HTTP backend.
//!
//! Posts to `{backend_url}/api/generate`. Streaming responses are
//! newline-delimited JSON objects of the form `{"response": "...", "done": bool}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{GenerationError, GenerationRequest, Generator};

/// Largest single NDJSON line accepted from the backend.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Client for an Ollama-style `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GenerationError::from)?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
        })
    }

    async fn post(&self, request: &GenerationRequest, stream: bool) -> Result<reqwest::Response, GenerationError> {
        let body = GenerateBody {
            model: &request.model,
            prompt: request.prompt(),
            system: &request.system_prompt,
            stream,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let response = self.post(request, false).await?;
        let chunk: GenerateChunk = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(GenerationError::Backend(error));
        }
        Ok(chunk.response)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        let mut response = self.post(request, true).await?;
        let mut decoder = NdjsonDecoder::default();
        let mut full = String::new();

        while let Some(bytes) = response.chunk().await? {
            for chunk in decoder.feed(&bytes)? {
                if let Some(error) = chunk.error {
                    return Err(GenerationError::Backend(error));
                }
                if !chunk.response.is_empty() {
                    full.push_str(&chunk.response);
                    tx.send(chunk.response)
                        .await
                        .map_err(|_| GenerationError::Cancelled)?;
                }
                if chunk.done {
                    return Ok(full);
                }
            }
        }

        // Stream ended without a done marker; accept a final unterminated line.
        if let Some(chunk) = decoder.finish()? {
            if !chunk.response.is_empty() {
                full.push_str(&chunk.response);
                tx.send(chunk.response)
                    .await
                    .map_err(|_| GenerationError::Cancelled)?;
            }
        }
        Ok(full)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Splits a byte stream into JSON lines.
#[derive(Debug, Default)]
struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<GenerateChunk>, GenerationError> {
        self.pending.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(chunk) = parse_line(&line)? {
                chunks.push(chunk);
            }
        }
        if self.pending.len() > MAX_LINE_BYTES {
            return Err(GenerationError::Decode("response line too long".into()));
        }
        Ok(chunks)
    }

    fn finish(&mut self) -> Result<Option<GenerateChunk>, GenerationError> {
        let line = std::mem::take(&mut self.pending);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Result<Option<GenerateChunk>, GenerationError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(trimmed)
        .map(Some)
        .map_err(|e| GenerationError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = NdjsonDecoder::default();
        let first = decoder.feed(br#"{"response":"Hel"#).unwrap();
        assert!(first.is_empty());
        let rest = decoder
            .feed(b"lo\",\"done\":false}\n{\"response\":\" world\",\"done\":true}\n")
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].response, "Hello");
        assert!(rest[1].done);
    }

    #[test]
    fn decoder_rejects_garbage() {
        let mut decoder = NdjsonDecoder::default();
        assert!(matches!(
            decoder.feed(b"not json\n"),
            Err(GenerationError::Decode(_))
        ));
    }

    #[test]
    fn body_omits_empty_system() {
        let body = GenerateBody {
            model: "llama3.2",
            prompt: "hi".into(),
            system: "",
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["stream"], true);
    }

    #[tokio::test]
    async fn streams_from_http_backend() {
        use axum::{routing::post, Router};

        let app = Router::new().route(
            "/api/generate",
            post(|| async {
                "{\"response\":\"Gopher \",\"done\":false}\n{\"response\":\"lives.\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let generator = OllamaGenerator::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let request = GenerationRequest::new("q", "llama3.2", "helpful", "");
        let full = generator.generate_stream(&request, tx).await.unwrap();
        assert_eq!(full, "Gopher lives.");

        let mut fragments = Vec::new();
        while let Some(f) = rx.recv().await {
            fragments.push(f);
        }
        assert_eq!(fragments, vec!["Gopher ".to_string(), "lives.".to_string()]);
    }
}
