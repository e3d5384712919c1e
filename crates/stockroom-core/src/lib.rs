//! stockroom-core - Core library for Stockroom
//!
//! This crate contains the product models, the local durable queue, the remote
//! store contract, and the reconciliation engine that keeps locally created
//! products and server-confirmed products converged across devices.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod remote;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{PendingProduct, Product, ProductEntry, ProductInput, TempId};
pub use sync::{SyncEngine, SyncState, SyncStatus};
