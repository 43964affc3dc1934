//! Context compaction
//!
//! When a conversation outgrows its size thresholds, the middle of the
//! history is condensed into a single summary message by the completion
//! service. The anchor (system prompt and initial workout context) and the
//! most recent turns always survive untouched.

use tracing::{debug, warn};

use crate::service::{self, ChatTurn, CompletionService};
use crate::session::{Message, MessageRole};

/// Default trigger: more than this many messages.
pub const DEFAULT_MAX_MESSAGES: usize = 20;
/// Default trigger: more than this many estimated tokens.
pub const DEFAULT_MAX_TOKENS: usize = 3000;
/// How many trailing messages are kept verbatim through a compaction.
pub const DEFAULT_RECENT_WINDOW: usize = 8;

pub(crate) const CONDENSE_INSTRUCTION: &str = "\
Summarize the conversation so far between the runner and their coach. \
Keep it short, but preserve the coaching-relevant facts and any numeric \
details (dates, distances, paces) that were mentioned. Reply with 2-3 \
sentences.";

const SUMMARY_PREFIX: &str = "[CONVERSATION SUMMARY]: ";

/// Result of a compaction attempt.
#[derive(Debug)]
pub enum CompactionOutcome {
    /// Nothing between anchor and tail; no service call was made.
    Unchanged,
    /// The middle was condensed into a single summary message.
    Summarized(Vec<Message>),
    /// Condensation failed and the middle was dropped outright. The session
    /// records this in its lossy-compaction counter.
    Truncated(Vec<Message>),
}

/// Stateless compactor with fixed policy thresholds.
///
/// The defaults are deliberate policy constants; they can be overridden via
/// [`Config`](crate::Config) but changing them changes when conversations
/// shrink.
#[derive(Debug, Clone)]
pub struct ContextCompactor {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub recent_window: usize,
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_tokens: DEFAULT_MAX_TOKENS,
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }
}

impl ContextCompactor {
    /// True when the sequence has crossed either size threshold.
    pub fn needs_compaction(&self, messages: &[Message]) -> bool {
        messages.len() > self.max_messages || total_estimate(messages) > self.max_tokens
    }

    /// Reduce an over-budget sequence to `anchor + [summary] + tail`.
    ///
    /// `anchor_len` is the number of leading messages that must survive
    /// verbatim. When there is nothing strictly between anchor and tail this
    /// returns [`CompactionOutcome::Unchanged`] without touching the service,
    /// so running the compactor twice in a row is a no-op.
    pub async fn compact(
        &self,
        messages: &[Message],
        anchor_len: usize,
        service: &dyn CompletionService,
    ) -> CompactionOutcome {
        if messages.len() <= anchor_len + self.recent_window {
            return CompactionOutcome::Unchanged;
        }
        let tail_start = messages.len() - self.recent_window;
        let anchor = &messages[..anchor_len];
        let middle = &messages[anchor_len..tail_start];
        let tail = &messages[tail_start..];
        if middle.is_empty() {
            return CompactionOutcome::Unchanged;
        }

        let mut request = service::to_turns(anchor);
        request.extend(service::to_turns(middle));
        request.push(ChatTurn::new(MessageRole::User, CONDENSE_INSTRUCTION));

        match service.complete(&request).await {
            Ok(summary) => {
                let Ok(summary_message) =
                    Message::assistant(format!("{SUMMARY_PREFIX}{summary}"))
                else {
                    // the prefix keeps the content non-empty
                    return self.truncate(anchor, tail);
                };
                debug!(
                    condensed = middle.len(),
                    "condensed conversation middle into one summary message"
                );
                let mut compacted = anchor.to_vec();
                compacted.push(summary_message);
                compacted.extend_from_slice(tail);
                CompactionOutcome::Summarized(compacted)
            }
            Err(e) => {
                warn!(error = %e, dropped = middle.len(), "condensation failed, dropping middle");
                self.truncate(anchor, tail)
            }
        }
    }

    fn truncate(&self, anchor: &[Message], tail: &[Message]) -> CompactionOutcome {
        let mut compacted = anchor.to_vec();
        compacted.extend_from_slice(tail);
        CompactionOutcome::Truncated(compacted)
    }
}

fn total_estimate(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.token_estimate()).sum()
}
