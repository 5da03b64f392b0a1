//! UI-facing conversation state: status, message log, and error surface.

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

/// The single conversation status driving all UI affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantStatus {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Thinking,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAuthor {
    User,
    Assistant,
}

/// One entry in the append-only message log. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub author: MessageAuthor,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: format!("user-{}", Uuid::new_v4()),
            author: MessageAuthor::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: format!("assistant-{}", Uuid::new_v4()),
            author: MessageAuthor::Assistant,
            text: text.into(),
        }
    }
}

/// A point-in-time copy of everything the UI renders.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: AssistantStatus,
    pub messages: Vec<Message>,
    pub error: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            status: AssistantStatus::Idle,
            messages: Vec::new(),
            error: None,
        }
    }
}

/// Owned conversation state, published to the UI over a watch channel after
/// every mutation. Only the session controller mutates it.
pub struct AssistantState {
    status: AssistantStatus,
    messages: Vec<Message>,
    error: Option<String>,
    tx: watch::Sender<Snapshot>,
}

impl AssistantState {
    pub fn new() -> (Self, watch::Receiver<Snapshot>) {
        let (tx, rx) = watch::channel(Snapshot::default());
        (
            Self {
                status: AssistantStatus::Idle,
                messages: Vec::new(),
                error: None,
                tx,
            },
            rx,
        )
    }

    pub fn status(&self) -> AssistantStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn set_status(&mut self, status: AssistantStatus) {
        if self.status != status {
            tracing::debug!("status: {:?} -> {:?}", self.status, status);
            self.status = status;
            self.publish();
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.publish();
    }

    /// Records an error and moves to the error status in one update.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("assistant error: {message}");
        self.error = Some(message);
        self.status = AssistantStatus::Error;
        self.publish();
    }

    pub fn clear_error(&mut self) {
        if self.error.take().is_some() {
            self.publish();
        }
    }

    pub fn clear_messages(&mut self) {
        if !self.messages.is_empty() {
            self.messages.clear();
            self.publish();
        }
    }

    fn publish(&self) {
        let _ = self.tx.send(Snapshot {
            status: self.status,
            messages: self.messages.clone(),
            error: self.error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_error_sets_status_and_message() {
        let (mut state, rx) = AssistantState::new();
        state.record_error("microphone denied");

        assert_eq!(state.status(), AssistantStatus::Error);
        assert_eq!(state.error(), Some("microphone denied"));
        let snapshot = rx.borrow();
        assert_eq!(snapshot.status, AssistantStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("microphone denied"));
    }

    #[test]
    fn messages_append_in_order() {
        let (mut state, rx) = AssistantState::new();
        state.push_message(Message::user("hello"));
        state.push_message(Message::assistant("hi there"));

        let snapshot = rx.borrow();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].author, MessageAuthor::User);
        assert_eq!(snapshot.messages[1].author, MessageAuthor::Assistant);
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::user("x");
        let b = Message::user("x");
        assert_ne!(a.id, b.id);
    }
}
