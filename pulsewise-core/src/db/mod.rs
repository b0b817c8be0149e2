//! Database layer for pulsewise
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries, always scoped by `company_id`
//! - Atomic create-if-absent and serialized message appends

pub mod repo;
pub mod schema;

pub use repo::{ConversationFilter, Database, InstanceStats};
