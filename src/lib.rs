//! AQL: a JSON-like repository item query language compiled to SQL.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use aql::backend::sqlite::SqliteProvider;
//! use aql::backend::StaticPermissions;
//! use aql::{AqlConfig, AqlService};
//!
//! # fn main() -> aql::Result<()> {
//! let provider = Arc::new(SqliteProvider::open("items.db")?);
//! let service = AqlService::new(provider, AqlConfig::default());
//! let rows = service.execute_eager(
//!     r#"items.find({"repo":"libs","name":{"$match":"*.jar"}})"#,
//!     &StaticPermissions::allow_all(),
//! )?;
//! println!("{} rows", rows.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod query;
pub mod service;

pub use config::{AqlConfig, ConfigError};
pub use error::{AqlError, Result};
pub use service::{explain, AqlService};
