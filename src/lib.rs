//! # memq
//!
//! memq is a lightweight in-memory publish/subscribe message broker. Clients
//! connect over TCP, exchange newline-delimited JSON commands, and route
//! messages by topic. A bounded per-topic replay cache lets late or
//! reconnecting subscribers catch up on messages they missed.
//!
//! ## Architecture Overview
//!
//! - [`broker`] - TCP server, per-session command loop, and delivery engine
//! - [`protocol`] - wire types, newline framing, and command validation
//! - [`registry`] - two-way mapping between topics and subscribed sessions
//! - [`cache`] - bounded per-topic replay cache with catch-up semantics
//! - [`config`] - broker configuration and environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memq::{BrokerConfig, BrokerServer};
//!
//! #[tokio::main]
//! async fn main() -> memq::Result<()> {
//!     let config = BrokerConfig {
//!         port: 7000,
//!         ..Default::default()
//!     };
//!
//!     let server = BrokerServer::bind(&config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! Each client frame is a single line terminated by `\n` (a preceding `\r`
//! is tolerated) carrying one JSON object: `subscribe`, `unsubscribe`, or
//! `send`. Every server frame is a JSON object terminated by `\r\n`. The
//! literal record `quit` closes the session. Messages published with
//! delivery `"all"` are retained in the topic's replay cache and can be
//! replayed to subscribers that pass a `last_seen` high-water mark.

pub mod broker;
pub mod cache;
pub mod config;
pub mod protocol;
pub mod registry;

pub use broker::{BrokerServer, MessageHandler};
pub use cache::ReplayCache;
pub use config::BrokerConfig;
pub use registry::TopicRegistry;

use thiserror::Error;

/// memq error types.
#[derive(Debug, Error)]
pub enum MemqError {
    /// Socket and listener I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation and parsing errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for memq operations.
pub type Result<T> = std::result::Result<T, MemqError>;
