//! Completion-service boundary
//!
//! The text-generation collaborator is abstracted behind [`CompletionService`]
//! so sessions can be driven against a real API client or a scripted test
//! double. The core treats the service as a black box: an ordered list of
//! role-tagged turns goes in, generated text comes out.

use async_trait::async_trait;

use crate::error::Result;
use crate::session::{Message, MessageRole};

/// One role-tagged turn in the wire format the completion service accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role().clone(),
            content: message.content().to_string(),
        }
    }
}

/// Convert a message sequence to the wire format, preserving order.
pub fn to_turns(messages: &[Message]) -> Vec<ChatTurn> {
    messages.iter().map(ChatTurn::from).collect()
}

/// External text-generation collaborator.
///
/// Implementations own their transport, credentials, and timeout policy.
/// Failures must be reported as [`CoachError::Service`] with the
/// transient/permanent kind preserved so callers can decide whether to retry.
///
/// [`CoachError::Service`]: crate::error::CoachError::Service
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate a reply for the given turn sequence.
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::compaction::CONDENSE_INSTRUCTION;
    use crate::error::{CoachError, ServiceErrorKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Completion-service double that replies from a script, falling back to
    /// a canned reply, and records what it was asked.
    pub(crate) struct ScriptedService {
        script: Mutex<VecDeque<Result<String>>>,
        turn_counts: Mutex<Vec<usize>>,
        calls: AtomicUsize,
        saw_condensation: AtomicBool,
    }

    impl ScriptedService {
        pub(crate) fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                turn_counts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                saw_condensation: AtomicBool::new(false),
            }
        }

        /// Queue a failure for the next completion call.
        pub(crate) fn fail_next(&self, kind: ServiceErrorKind) {
            self.script.lock().unwrap().push_back(Err(CoachError::Service {
                kind,
                message: "scripted failure".to_string(),
            }));
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn turn_counts(&self) -> Vec<usize> {
            self.turn_counts.lock().unwrap().clone()
        }

        /// True once any call ended with the condensation instruction.
        pub(crate) fn saw_condensation(&self) -> bool {
            self.saw_condensation.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(&self, turns: &[ChatTurn]) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.turn_counts.lock().unwrap().push(turns.len());
            if turns.last().is_some_and(|t| t.content == CONDENSE_INSTRUCTION) {
                self.saw_condensation.store(true, Ordering::SeqCst);
            }
            if let Some(outcome) = self.script.lock().unwrap().pop_front() {
                return outcome;
            }
            Ok(format!("coach reply {n}"))
        }
    }
}
