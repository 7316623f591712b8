// src/lib.rs - Trading Venue Library Root
//! # Trading Venue - Multi-Symbol In-Memory Matching Engine
//!
//! An in-memory trading venue built in Rust with focus on:
//! - Per-symbol limit order books with price-time priority matching
//! - Conditional orders: stop-loss, stop-limit, and trailing stops
//! - VWAP execution schedules that slice parent orders into limit children
//! - A line-based TCP request/response protocol with authenticated sessions
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  TCP Line Protocol                       │
//! │      (LOGIN / ORDER / VWAP_ORDER / CANCEL / BOOK)        │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │
//!                ┌─────────────▼─────────────┐
//!                │      Matching Engine      │
//!                │ (routing, ids, validation)│
//!                └─────────────┬─────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//! ┌──────▼───────┐    ┌────────▼────────┐   ┌────────▼────────┐
//! │  Order Books │    │ VWAP Calculators│   │   Worker Pool   │
//! │ (per symbol) │    │  (per symbol)   │   │  + Scheduler    │
//! └──────────────┘    └─────────────────┘   └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use trading_venue::prelude::*;
//! use trading_venue::OrderKind;
//!
//! let engine = MatchingEngine::new(EngineConfig::default());
//! let id = engine
//!     .submit_order("AAPL", OrderKind::Limit { price: 150.0 }, OrderSide::Buy, 100.0, "DEMO")
//!     .unwrap();
//! println!("Order accepted: {}", id);
//! ```

use serde::Deserialize;

pub use anyhow::{Error as AnyhowError, Result as AnyhowResult};
pub use chrono::{DateTime, Utc};

// Core modules
pub mod core;
pub mod engine;
pub mod transport;

// Re-export core types for convenience
pub use crate::core::{
    events::{TradeCallback, TradeTick},
    order::{Order, OrderKind, OrderSide, OrderStatus, VwapState},
    types::{BookSnapshot, ClientId, OrderId, Price, Quantity, Symbol, VwapOrderSnapshot},
};
pub use crate::engine::{book::OrderBook, vwap::VwapCalculator, EngineConfig, MatchingEngine};

/// Prelude module that re-exports the most commonly used types
pub mod prelude {
    //! Convenient imports for library consumers

    pub use crate::{
        core::{
            order::{Order, OrderKind, OrderSide, OrderStatus},
            types::{BookSnapshot, ClientId, OrderId, Price, Quantity, Symbol},
        },
        engine::{EngineConfig, MatchingEngine},
        VenueError, VenueResult,
    };
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Application configuration loaded at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Engine configuration
    pub engine: engine::EngineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum number of concurrent client sessions
    pub max_connections: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format ("json" or "pretty")
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: constants::DEFAULT_PORT,
                max_connections: 1024,
            },
            engine: engine::EngineConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

/// Error types used throughout the library
#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    /// Submission failed validation; no side effects occurred
    #[error("Order validation failed: {0}")]
    Validation(String),

    /// Session / authorization failure
    #[error("Session error: {0}")]
    Session(String),

    /// Wire protocol parse failure
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No book exists for the requested symbol
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Internal invariant violation; indicates an engine bug
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type used throughout the library
pub type VenueResult<T> = Result<T, VenueError>;

/// Utility functions
pub mod utils {
    //! Shared validation helpers

    use super::{VenueError, VenueResult};

    /// Validate a price: strictly positive and finite
    pub fn validate_price(price: f64) -> VenueResult<()> {
        if !price.is_finite() {
            return Err(VenueError::Validation("Invalid price value".to_string()));
        }
        if price <= 0.0 {
            return Err(VenueError::Validation("Price must be positive".to_string()));
        }
        Ok(())
    }

    /// Validate a quantity: strictly positive and finite
    pub fn validate_quantity(quantity: f64) -> VenueResult<()> {
        if !quantity.is_finite() {
            return Err(VenueError::Validation("Invalid quantity value".to_string()));
        }
        if quantity <= 0.0 {
            return Err(VenueError::Validation(
                "Quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate a symbol: non-empty
    pub fn validate_symbol(symbol: &str) -> VenueResult<()> {
        if symbol.is_empty() {
            return Err(VenueError::Validation("Symbol is required".to_string()));
        }
        Ok(())
    }

    /// Validate a client identifier: non-empty
    pub fn validate_client_id(client_id: &str) -> VenueResult<()> {
        if client_id.is_empty() {
            return Err(VenueError::Validation("Client ID is required".to_string()));
        }
        Ok(())
    }
}

/// Constants used throughout the library
pub mod constants {
    //! System-wide constants

    /// Default listener port
    pub const DEFAULT_PORT: u16 = 8080;

    /// Reserved order id meaning "rejected"
    pub const REJECTED_ORDER_ID: u64 = 0;

    /// Maximum VWAP execution duration in minutes
    pub const MAX_VWAP_DURATION_MINUTES: u64 = 480;

    /// Rolling VWAP window in seconds
    pub const VWAP_ROLLING_WINDOW_SECS: u64 = 300;

    /// Interval between VWAP scheduler steps in seconds
    pub const VWAP_CHECK_INTERVAL_SECS: u64 = 30;

    /// Minimum seconds between child orders of one VWAP parent
    pub const MIN_CHILD_ORDER_INTERVAL_SECS: u64 = 30;

    /// Minimum relative price move that justifies a fresh child order
    pub const MIN_CHILD_REPRICE_FRACTION: f64 = 0.001;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.engine.worker_threads, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_price() {
        assert!(utils::validate_price(100.0).is_ok());
        assert!(utils::validate_price(0.0).is_err());
        assert!(utils::validate_price(-1.5).is_err());
        assert!(utils::validate_price(f64::NAN).is_err());
        assert!(utils::validate_price(f64::INFINITY).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(utils::validate_quantity(10.0).is_ok());
        assert!(utils::validate_quantity(0.0).is_err());
        assert!(utils::validate_quantity(-10.0).is_err());
        assert!(utils::validate_quantity(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_symbol() {
        assert!(utils::validate_symbol("AAPL").is_ok());
        assert!(utils::validate_symbol("BRK.A").is_ok());
        assert!(utils::validate_symbol(&"A".repeat(25)).is_ok());
        assert!(utils::validate_symbol("").is_err());
    }

    #[test]
    fn test_validate_client_id() {
        assert!(utils::validate_client_id("client1").is_ok());
        assert!(utils::validate_client_id("").is_err());
    }
}
