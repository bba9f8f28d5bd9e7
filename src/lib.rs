//! file-storage-provider: declarative management of file-storage export sets
//!
//! Desired mount targets, export sets and export-set queries are declared in
//! a YAML configuration, diffed against recorded state and applied to a
//! file-storage control plane.
//!
//! # Architecture
//!
//! - **Client**: the `FileStorageClient` trait over control-plane operations,
//!   with an in-process `MemoryFileStorage` implementation.
//! - **Resources**: per-type handlers carrying an attribute schema; force-new
//!   attributes decide between in-place update and replacement.
//! - **Plan / Engine**: diff configuration against state, then create, update,
//!   replace or delete in dependency order and read data sources.
//! - **State**: flat `key -> string` attributes per resource address.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use file_storage_provider::client::memory::MemoryFileStorage;
//! use file_storage_provider::config::Config;
//! use file_storage_provider::engine::Engine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file(Path::new("config.yaml"))?;
//! config.validate()?;
//!
//! let engine = Engine::new(Arc::new(MemoryFileStorage::default()), config.timeouts);
//! println!("{}", engine.plan(&config)?);
//! println!("{}", engine.apply(&config).await?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod datasource;
pub mod engine;
pub mod env;
pub mod error;
pub mod plan;
pub mod resource;
pub mod state;

pub use error::{ProviderError, Result};
