//! Conversation-context store.
//!
//! Append-only ordered log bounded to `N` non-system messages. The
//! system message is pinned at position 0 and never evicted. Only the
//! Turn Controller mutates this store.

use crate::pipeline::messages::{PromptMessage, Role};

/// Append-only conversation log with a fixed non-system message budget.
#[derive(Debug, Clone)]
pub struct ContextStore {
    system_prompt: String,
    /// Non-system messages, oldest first. Normally alternates `User`,
    /// `Assistant`, `User`, `Assistant`, ... except that a turn whose
    /// assistant reply was empty contributes no `Assistant` entry, so
    /// two `User` entries can end up adjacent.
    messages: Vec<PromptMessage>,
    max_non_system: usize,
}

impl ContextStore {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, max_non_system: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            max_non_system,
        }
    }

    /// Append a final user transcript. Only called once a turn's
    /// transcript is final, never for interim/non-final text.
    pub fn append_user(&mut self, text: impl Into<String>) {
        self.messages.push(PromptMessage {
            role: Role::User,
            text: text.into(),
        });
        self.evict_if_needed();
    }

    /// Append the assistant's reply, called when a turn is committed
    /// either naturally (full reply spoken) or on interruption (the
    /// spoken prefix only).
    ///
    /// An empty reply is a no-op: nothing is appended and the eviction
    /// budget is untouched. This covers a turn that was interrupted
    /// before any audio was spoken, or one whose LLM output was empty
    /// outright — there is no assistant text worth retaining, and it
    /// must not count as a reason to evict an older, real exchange.
    pub fn append_assistant(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.messages.push(PromptMessage {
            role: Role::Assistant,
            text,
        });
        self.evict_if_needed();
    }

    fn evict_if_needed(&mut self) {
        while self.messages.len() > self.max_non_system {
            self.messages.remove(0);
        }
    }

    /// Read-only copy of the full message list (system + history), for
    /// prompt assembly.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PromptMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(PromptMessage {
            role: Role::System,
            text: self.system_prompt.clone(),
        });
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Number of non-system messages currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Session end: system message retained, history cleared.
    pub fn reset(&mut self) {
        self.messages.clear();
    }
}
