use parley_storage::{Credentials, Identity, MessageRecord, NewAccount, UserId};

use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::profile::UserIdentity;

/// Input from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    SignIn(Credentials),
    SignUp(NewAccount),
    SignOut,
    Select(UserId),
    ClearSelection,
    EditDraft(String),
    Send,
    /// Replaces the draft with the text and sends it. While a send is in flight the draft is
    /// left alone and nothing is sent.
    SendText(String),
    /// Reloads the conversation list and the open thread.
    Refresh,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient message for the user; never changes state on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

impl From<&ChatError> for Notice {
    fn from(error: &ChatError) -> Self {
        match error {
            ChatError::SendInFlight { .. } => Self::info(error.to_string()),
            _ => Self::error(error.to_string()),
        }
    }
}

/// Which surface the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateView {
    /// Startup session check pending; show neither the prompt nor the chat.
    Checking,
    SignedOut,
    SignedIn(Identity),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadView {
    pub counterpart: Option<UserIdentity>,
    pub loading: bool,
    pub messages: Vec<MessageRecord>,
}

/// Output towards the presentation layer. Every list and thread event carries the full view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Gate(GateView),
    Conversations(Vec<Conversation>),
    Thread(ThreadView),
    Draft(String),
    Notice(Notice),
}
