//! Local database layer for Stockroom

mod connection;
mod migrations;

pub use connection::Database;
