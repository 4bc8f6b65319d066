//! The broker runtime: TCP server, per-session command loop, and the
//! delivery engine.
//!
//! Two components make up the runtime:
//!
//! - [`server`] - the acceptor that listens for TCP clients and drives one
//!   session task per connection
//! - [`handler`] - the shared broker state (session table, topic registry,
//!   replay caches, per-topic index counters) and the command dispatch that
//!   mutates it atomically

pub mod handler;
pub mod server;

pub use handler::{MessageHandler, OutboundSender};
pub use server::BrokerServer;
