//! Accumulates partial transcription fragments for the turn in progress.

use crate::assistant::Message;

/// Two string buffers fed by transcription deltas and flushed into the
/// message log exactly once per completed turn. Until the flush, nothing is
/// visible to the UI, so partial sentences never flicker through.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    input: String,
    output: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, fragment: &str) {
        self.input.push_str(fragment);
    }

    pub fn push_output(&mut self, fragment: &str) {
        self.output.push_str(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    /// Drains both sides into at most two messages, user side first.
    /// Whitespace-only accumulation produces no message.
    pub fn flush(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        let user = std::mem::take(&mut self.input);
        let assistant = std::mem::take(&mut self.output);

        let user = user.trim();
        if !user.is_empty() {
            messages.push(Message::user(user));
        }
        let assistant = assistant.trim();
        if !assistant.is_empty() {
            messages.push(Message::assistant(assistant));
        }
        messages
    }

    /// Discards any partial accumulation without emitting messages.
    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}
