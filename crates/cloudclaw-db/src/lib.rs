//! # CloudClaw DB
//!
//! SQLite-backed [`TaskStore`](cloudclaw_core::traits::TaskStore).
//! One connection behind a mutex; WAL mode for concurrent readers.

pub mod sqlite;

pub use sqlite::PanelDb;
