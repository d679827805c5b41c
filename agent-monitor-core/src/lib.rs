//! # agent-monitor-core
//!
//! Core library for agent-monitor - a live dashboard backend for AI agent
//! tool activity.
//!
//! This library provides:
//! - The [`Event`] model for hook-delivered tool-use records
//! - A bounded in-memory [`EventStore`] with running tallies
//! - A [`BroadcastHub`] that fans events out to live viewers
//! - Transcript-derived views (token usage, conversation) behind a TTL cache
//! - The HTTP API router and the agent hook installer
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! Two independent data sources feed the dashboard:
//! - **Live events:** hook → `POST /event` → store → hub → `/api/stream` viewers
//! - **Transcript:** the agent's JSONL log, discovered from event payloads and
//!   re-parsed on change for `/api/usage` and `/api/conversation`
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_monitor_core::{api, AppState, Config};
//!
//! # async fn run() -> agent_monitor_core::Result<()> {
//! let config = Config::load()?;
//! let listener = tokio::net::TcpListener::bind(config.server.bind_addr()).await?;
//! api::serve(listener, AppState::new()).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use api::AppState;
pub use config::Config;
pub use error::{Error, Result};
pub use event::Event;
pub use hub::{BroadcastHub, Closed, Subscription};
pub use store::{EventStore, Stats};
pub use transcript::{CacheState, Conversation, TranscriptCache, UsageTotals};

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod hub;
pub mod logging;
pub mod store;
pub mod transcript;
