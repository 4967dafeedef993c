//! Persistence

pub mod sqlite;
