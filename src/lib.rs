//! Offline-first engine for a news-reading client.
//!
//! Two halves: a SQLite-backed article cache pruned by age and size,
//! and bookmark state that applies every change locally first, queues
//! it durably, and reconciles with the server once a session and
//! connectivity exist.

pub mod api;
pub mod bookmarks;
pub mod config;
pub mod news;
pub mod session;
pub mod storage;
