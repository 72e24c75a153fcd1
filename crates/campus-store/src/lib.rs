//! # campus-store
//!
//! SQLite persistence for users, direct messages and group messages.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model, plus the history queries that resolve reply previews.

pub mod database;
pub mod group_messages;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod replies;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
