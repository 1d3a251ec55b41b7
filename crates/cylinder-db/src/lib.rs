//! # cylinder-db: Persistence and Engine for the Cylinder Ledger
//!
//! SQLite storage for ledger chains, warehouse stock and reference
//! sequences, plus the [`LedgerEngine`] that mutates them transactionally.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Cylinder Ledger Data Flow                        │
//! │                                                                         │
//! │  Caller (REST handler, admin binary)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   cylinder-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ LedgerEngine  │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │ (engine.rs)   │───►│  ledger       │    │  (embedded)  │  │   │
//! │  │   │               │    │  stock        │    │              │  │   │
//! │  │   │ one write tx  │    │  reference    │    │ 001_init.sql │  │   │
//! │  │   │ per operation │    │  transfer ... │    │              │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           │                                                     │   │
//! │  │           ▼                                                     │   │
//! │  │   cylinder-core: chain replay, validation, reference format     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL, foreign keys, busy timeout)                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`config`] - Engine and environment configuration
//! - [`engine`] - Transactional ledger, transfer and receipt operations
//! - [`error`] - Database error types and the API error payload
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cylinder_db::{AppConfig, Database};
//!
//! let config = AppConfig::load()?;
//! let db = Database::new(config.db).await?;
//! let engine = db.engine(config.engine);
//!
//! let balance = engine.current_balance("cust-1", Some("v-14kg")).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{AppConfig, ConfigError, EngineConfig};
pub use engine::LedgerEngine;
pub use error::{ApiError, DbError, DbResult, ErrorKind};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::ledger::LedgerRepository;
pub use repository::master::MasterDataRepository;
pub use repository::receipt::ReceiptRepository;
pub use repository::reference::ReferenceRepository;
pub use repository::stock::StockRepository;
pub use repository::transfer::TransferRepository;
