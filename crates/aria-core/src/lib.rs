pub mod assistant;
pub mod chat;
pub mod peer;
pub mod scheduler;
pub mod session;
pub mod speech;
pub mod transcript;

pub use assistant::{AssistantStatus, Message, MessageAuthor, Snapshot};
pub use session::{Command, SessionController, SessionHandle};
