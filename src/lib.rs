//! # coach-context
//!
//! Conversational context management for AI running-coach sessions.
//!
//! This crate provides:
//! - Multi-turn sessions against a pluggable completion service
//! - Token-budget accounting with automatic history compaction
//! - A per-session busy guard (one in-flight completion call at a time)
//! - A registry multiplexing sessions across users
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use coach_context::{CompletionService, SessionRegistry};
//!
//! # async fn example(service: Arc<dyn CompletionService>) -> coach_context::Result<()> {
//! let registry = SessionRegistry::new(service);
//!
//! let session = registry.create_session("runner-42")?;
//! let analysis = session.start_analysis(Some("10k easy, 5:40/km, felt strong")).await?;
//! println!("{analysis}");
//!
//! let reply = session.ask_question("How should I taper this week?").await?;
//! println!("{reply}");
//!
//! let final_stats = registry.end_session("runner-42")?;
//! println!("{} messages exchanged", final_stats.message_count);
//! # Ok(())
//! # }
//! ```

pub mod compaction;
pub mod error;
pub mod registry;
pub mod service;
pub mod session;

pub use compaction::{CompactionOutcome, ContextCompactor};
pub use error::{CoachError, Result, ServiceErrorKind};
pub use registry::SessionRegistry;
pub use service::{ChatTurn, CompletionService};
pub use session::{
    ChatSession, ConversationExport, ConversationStats, ExportedMessage, Message, MessageRole,
    SessionState, estimate_tokens,
};

/// Compaction policy for sessions created by a registry.
///
/// The defaults are fixed policy constants; overriding them changes when
/// conversations shrink, not the compaction contract itself.
pub struct Config {
    /// Message count above which compaction is triggered
    pub max_messages: usize,
    /// Estimated token total above which compaction is triggered
    pub max_tokens: usize,
    /// Number of trailing messages kept verbatim through a compaction
    pub recent_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_messages: compaction::DEFAULT_MAX_MESSAGES,
            max_tokens: compaction::DEFAULT_MAX_TOKENS,
            recent_window: compaction::DEFAULT_RECENT_WINDOW,
        }
    }
}
