//! # strata-store
//!
//! Local persistence for the strata sync engine, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for rooms, chunks,
//! events, state, local echoes, account data, the sync token and key
//! material. Writes belonging to one sync payload go through a single
//! [`StoreTxn`].

pub mod account_data;
pub mod chunks;
pub mod database;
pub mod devices;
pub mod events;
pub mod local_echo;
pub mod migrations;
pub mod models;
pub mod rooms;
pub mod sessions;
pub mod state;
pub mod sync_token;

mod error;

pub use database::{lock, Database, SharedDatabase, StoreTxn, Tables};
pub use error::{Result, StoreError};
pub use models::*;
pub use state::StateMap;
