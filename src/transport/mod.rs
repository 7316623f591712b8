// src/transport/mod.rs - Client-Facing Transport
//! Line-based TCP transport: protocol parsing and the session server

pub mod line;
pub mod server;

pub use line::{ParseError, Reply, Request};
pub use server::TradingServer;
