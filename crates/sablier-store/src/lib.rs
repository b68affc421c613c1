//! # sablier-store
//!
//! Local database projections of config-controlled state: profiles,
//! groups, communities, interactions and the durable config dumps.
//!
//! These rows are projections, never the source of truth — they are only
//! written as the result of a successful config merge or a local edit that
//! was already staged into the in-memory config state. The crate exposes a
//! synchronous `Database` handle wrapping a `rusqlite::Connection` with
//! typed CRUD helpers; every helper also exists as a free function over
//! `&Connection` so merge transactions can compose them atomically.

pub mod config_dumps;
pub mod database;
pub mod groups;
pub mod interactions;
pub mod migrations;
pub mod models;
pub mod open_groups;
pub mod profiles;
pub mod reactions;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
