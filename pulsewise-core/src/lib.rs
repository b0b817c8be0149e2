//! # pulsewise-core
//!
//! Core library for pulsewise - conversational agent orchestration for HR.
//!
//! This library provides:
//! - Domain types for agent templates, instances, conversations and summaries
//! - Database storage layer with SQLite
//! - The orchestrator that runs agents and handles employee replies
//! - Summarization and company-wide analytics
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Components, leaves first:
//! - **Audience** resolves who an instance talks to
//! - **Schedule** computes when it next runs
//! - **Registry** owns the per-company instance catalog
//! - **Store** (`db`) enforces one active conversation per (instance, employee)
//!   and serializes message appends
//! - **Orchestrator** runs instances and drives the conversation state machine
//! - **Summarizer / Analytics** derive sentiment, risk and dashboard numbers
//!
//! ## Example
//!
//! ```rust,no_run
//! use pulsewise_core::{Config, Database, Orchestrator};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open_with(&Config::database_path(), &config.store)
//!     .expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! // Run every due schedule
//! let orchestrator = Orchestrator::new(&db, &config);
//! let tick = orchestrator.run_due(chrono::Utc::now()).expect("tick failed");
//! println!("{} runs", tick.runs.len());
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{Analytics, AnalyticsSnapshot};
pub use config::Config;
pub use db::{ConversationFilter, Database};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, ReplyOutcome, RunReport, TickReport};
pub use registry::{AgentRegistry, InstanceOverview, NewInstance};
pub use summarizer::{LexiconClassifier, SentimentClassifier, Summarizer};
pub use types::*;

// Public modules
pub mod analytics;
pub mod audience;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod schedule;
pub mod seed;
pub mod summarizer;
pub mod types;
