//! Session management and message handling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compaction::{CompactionOutcome, ContextCompactor};
use crate::error::{CoachError, Result};
use crate::service::{self, CompletionService};

/// Estimate the token cost of a piece of text, at roughly 4 characters per
/// token. Deterministic and intentionally approximate.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Role of a message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl FromStr for MessageRole {
    type Err = CoachError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(CoachError::InvalidRole(other.to_string())),
        }
    }
}

/// A single message in a conversation.
///
/// Immutable once constructed; a session only ever appends new messages or
/// replaces its sequence wholesale during compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    role: MessageRole,
    content: String,
    created_at: DateTime<Utc>,
    token_estimate: usize,
}

impl Message {
    /// Create a new message. Content must be non-empty; the token estimate
    /// is derived from the content here and never changes afterwards.
    pub fn new(role: MessageRole, content: String) -> Result<Self> {
        if content.is_empty() {
            return Err(CoachError::EmptyContent);
        }
        let token_estimate = estimate_tokens(&content);
        Ok(Self {
            id: Uuid::new_v4(),
            role,
            content,
            created_at: Utc::now(),
            token_estimate,
        })
    }

    /// Create a new system message
    pub fn system(content: String) -> Result<Self> {
        Self::new(MessageRole::System, content)
    }

    /// Create a new user message
    pub fn user(content: String) -> Result<Self> {
        Self::new(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: String) -> Result<Self> {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> &MessageRole {
        &self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn token_estimate(&self) -> usize {
        self.token_estimate
    }
}

/// Lifecycle state of a session. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Active,
    Ended,
}

/// Statistics about a conversation, as returned by [`ChatSession::stats`]
/// and embedded in exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_token_estimate: usize,
    pub duration_seconds: i64,
    /// How many times compaction fell back to dropping unsummarized history.
    pub lossy_compactions: u64,
}

/// One entry in an exported conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Serializable snapshot of a conversation.
///
/// Reflects only what the session currently retains: content removed by an
/// earlier compaction is not recoverable from an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ExportedMessage>,
    pub stats: ConversationStats,
}

impl ConversationExport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

const COACH_SYSTEM_PROMPT: &str = "\
You are an experienced AI running coach specializing in half-marathon preparation.

Your personality:
- Professional but encouraging and motivational
- Data-driven but also considers subjective runner feedback
- Focuses on practical, actionable advice
- Remembers context from earlier parts of the conversation

Your capabilities:
- Analyze workout patterns and performance trends
- Provide training recommendations and race preparation
- Answer specific questions about running technique, nutrition, recovery
- Help with race strategy and goal setting

Always keep the runner's specific workout data and the prior conversation in mind when responding.";

fn initial_context_message(key: &str, context: &str) -> String {
    format!(
        "RUNNER PROFILE: {key}\n\nWORKOUT DATA FOR ANALYSIS:\n{context}\n\n\
         Please analyze this runner's training data and be ready to answer \
         follow-up questions about it."
    )
}

struct SessionInner {
    state: SessionState,
    /// True exactly while a completion-service call is outstanding.
    busy: bool,
    messages: Vec<Message>,
    /// Number of leading messages compaction must never remove (1 or 2).
    anchor_len: usize,
    last_activity_at: DateTime<Utc>,
    lossy_compactions: u64,
}

/// One ongoing multi-turn conversation for a single key.
///
/// All turn-taking methods take `&self`; interior state lives behind a mutex
/// so a session can be shared across tasks. The mutex is only held for
/// bookkeeping, never across a completion-service call: the `busy` flag is
/// what serializes turns, and a second concurrent call fails fast with
/// [`CoachError::SessionBusy`] instead of queueing.
pub struct ChatSession {
    key: String,
    created_at: DateTime<Utc>,
    service: Arc<dyn CompletionService>,
    compactor: ContextCompactor,
    inner: Mutex<SessionInner>,
}

impl ChatSession {
    pub fn new(
        key: impl Into<String>,
        service: Arc<dyn CompletionService>,
        compactor: ContextCompactor,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            created_at: now,
            service,
            compactor,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                busy: false,
                messages: Vec::new(),
                anchor_len: 0,
                last_activity_at: now,
                lossy_compactions: 0,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Perform the opening exchange: build the anchor messages (coach system
    /// prompt, plus the runner's workout context if provided), send them to
    /// the completion service, and record the reply.
    ///
    /// Nothing is appended and the session stays in `Created` if the service
    /// call fails, so a failed start can simply be retried.
    pub async fn start_analysis(&self, initial_context: Option<&str>) -> Result<String> {
        {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Created => {}
                SessionState::Active => {
                    return Err(CoachError::SessionAlreadyActive(self.key.clone()));
                }
                SessionState::Ended => return Err(CoachError::SessionEnded(self.key.clone())),
            }
            if inner.busy {
                return Err(CoachError::SessionBusy(self.key.clone()));
            }
            inner.busy = true;
        }

        let anchor = match self.build_anchor(initial_context) {
            Ok(anchor) => anchor,
            Err(e) => {
                self.lock().busy = false;
                return Err(e);
            }
        };

        let outcome = self.service.complete(&service::to_turns(&anchor)).await;

        let mut inner = self.lock();
        inner.busy = false;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                warn!(key = %self.key, error = %e, "initial analysis failed");
                return Err(e);
            }
        };
        let assistant = Message::assistant(reply.clone())?;
        inner.anchor_len = anchor.len();
        inner.messages = anchor;
        inner.messages.push(assistant);
        inner.state = SessionState::Active;
        inner.last_activity_at = Utc::now();
        info!(key = %self.key, anchor_len = inner.anchor_len, "session active");
        Ok(reply)
    }

    fn build_anchor(&self, initial_context: Option<&str>) -> Result<Vec<Message>> {
        let mut anchor = vec![Message::system(COACH_SYSTEM_PROMPT.to_string())?];
        if let Some(context) = initial_context {
            anchor.push(Message::user(initial_context_message(&self.key, context))?);
        }
        Ok(anchor)
    }

    /// Ask a follow-up question in the conversation.
    ///
    /// Appends the question, compacts the history if the size thresholds are
    /// crossed, sends the full sequence to the completion service, and
    /// appends the reply. On service failure the question stays in the
    /// history, so a caller-level retry should call this again for the next
    /// turn rather than resubmitting the same text.
    pub async fn ask_question(&self, question: &str) -> Result<String> {
        let question = Message::user(question.to_string())?;

        {
            let mut inner = self.lock();
            if inner.state != SessionState::Active {
                return Err(CoachError::SessionEnded(self.key.clone()));
            }
            if inner.busy {
                return Err(CoachError::SessionBusy(self.key.clone()));
            }
            inner.busy = true;
            inner.messages.push(question);
        }

        self.compact_if_needed().await;

        let turns = {
            let inner = self.lock();
            service::to_turns(&inner.messages)
        };
        let outcome = self.service.complete(&turns).await;

        let mut inner = self.lock();
        inner.busy = false;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                debug!(key = %self.key, error = %e, "completion call failed, question retained");
                return Err(e);
            }
        };
        let assistant = Message::assistant(reply.clone())?;
        inner.messages.push(assistant);
        inner.last_activity_at = Utc::now();
        Ok(reply)
    }

    /// Run the compactor if the session has outgrown its thresholds.
    ///
    /// Only called while `busy` is held, so the sequence cannot change
    /// between the snapshot and the replacement.
    async fn compact_if_needed(&self) {
        let snapshot = {
            let inner = self.lock();
            if !self.compactor.needs_compaction(&inner.messages) {
                return;
            }
            (inner.messages.clone(), inner.anchor_len)
        };
        let (messages, anchor_len) = snapshot;

        match self
            .compactor
            .compact(&messages, anchor_len, self.service.as_ref())
            .await
        {
            CompactionOutcome::Unchanged => {}
            CompactionOutcome::Summarized(compacted) => {
                let mut inner = self.lock();
                debug!(
                    key = %self.key,
                    before = inner.messages.len(),
                    after = compacted.len(),
                    "conversation summarized"
                );
                inner.messages = compacted;
            }
            CompactionOutcome::Truncated(compacted) => {
                let mut inner = self.lock();
                warn!(
                    key = %self.key,
                    before = inner.messages.len(),
                    after = compacted.len(),
                    "conversation truncated without summary"
                );
                inner.messages = compacted;
                inner.lossy_compactions += 1;
            }
        }
    }

    /// Get statistics about the current conversation. Read-only.
    pub fn stats(&self) -> ConversationStats {
        let inner = self.lock();
        self.stats_locked(&inner)
    }

    fn stats_locked(&self, inner: &SessionInner) -> ConversationStats {
        ConversationStats {
            message_count: inner.messages.len(),
            user_messages: inner
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::User)
                .count(),
            assistant_messages: inner
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::Assistant)
                .count(),
            total_token_estimate: inner.messages.iter().map(|m| m.token_estimate).sum(),
            duration_seconds: (Utc::now() - self.created_at).num_seconds(),
            lossy_compactions: inner.lossy_compactions,
        }
    }

    /// Export the currently retained conversation for saving or analysis.
    pub fn export(&self) -> ConversationExport {
        let inner = self.lock();
        ConversationExport {
            key: self.key.clone(),
            created_at: self.created_at,
            messages: inner
                .messages
                .iter()
                .map(|m| ExportedMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                    timestamp: m.created_at,
                })
                .collect(),
            stats: self.stats_locked(&inner),
        }
    }

    /// End the session and return the final statistics snapshot.
    ///
    /// Fails with [`CoachError::AlreadyEnded`] on a second call so callers
    /// can detect double-end bugs, and with [`CoachError::SessionBusy`] if a
    /// completion call is still in flight.
    pub fn end(&self) -> Result<ConversationStats> {
        let mut inner = self.lock();
        if inner.state == SessionState::Ended {
            return Err(CoachError::AlreadyEnded(self.key.clone()));
        }
        if inner.busy {
            return Err(CoachError::SessionBusy(self.key.clone()));
        }
        inner.state = SessionState::Ended;
        let stats = self.stats_locked(&inner);
        info!(
            key = %self.key,
            messages = stats.message_count,
            tokens = stats.total_token_estimate,
            "session ended"
        );
        Ok(stats)
    }
}
