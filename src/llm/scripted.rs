// Replays canned replies, for offline runs and tests.

use super::{ChatMessage, LlmClient};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<String>>,
    repeat_last: bool,
    last: Mutex<Option<String>>,
    calls: AtomicU64,
}

impl ScriptedClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Keep answering with the final reply once the script runs out.
    pub fn repeating_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn push(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(reply.into());
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

impl LlmClient for ScriptedClient {
    fn chat(&self, _messages: &[ChatMessage]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => {
                *self.last.lock() = Some(reply.clone());
                Ok(reply)
            }
            None if self.repeat_last => self
                .last
                .lock()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("scripted client has no replies")),
            None => anyhow::bail!("scripted client exhausted after {} call(s)", self.calls()),
        }
    }
}
