//! burrow: an AI text server for Gopher, Gemini and Finger.

// Wire protocols and request handling
pub mod dispatch;
pub mod features;
pub mod protocol;
pub mod server;

// Generation pipeline
pub mod cache;
pub mod generation;
pub mod sanitize;
pub mod streaming;

// Core subsystems
pub mod config;
pub mod error;
pub mod net;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::ServerConfig;
pub use error::ClientError;
pub use lifecycle::Shutdown;
pub use server::{App, Server};
