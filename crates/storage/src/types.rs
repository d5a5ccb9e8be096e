use std::fmt;

use super::ids::{MessageId, UserId};

/// Tables exposed by the store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Messages,
    Profiles,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub content: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub created_at_unix_millis: u64,
}

impl MessageRecord {
    /// Returns the participant that is not `user_id`, or `None` when the user is not a party.
    ///
    /// Self-addressed messages return the user themself.
    pub fn counterpart_of(&self, user_id: UserId) -> Option<UserId> {
        if self.sender_id == user_id {
            Some(self.receiver_id)
        } else if self.receiver_id == user_id {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// True when the message was exchanged between `left` and `right` in either direction.
    pub fn is_between(&self, left: UserId, right: UserId) -> bool {
        (self.sender_id == left && self.receiver_id == right)
            || (self.sender_id == right && self.receiver_id == left)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
}

/// One row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub id: UserId,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

/// Authenticated identity as reported by the store's auth service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub username: String,
}

/// Row filter for message queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFilter {
    /// Messages where the user is sender or receiver.
    Involving(UserId),
    /// Messages exchanged between two users, either direction.
    Between(UserId, UserId),
}

impl MessageFilter {
    pub fn matches(&self, message: &MessageRecord) -> bool {
        match *self {
            Self::Involving(user_id) => message.counterpart_of(user_id).is_some(),
            Self::Between(left, right) => message.is_between(left, right),
        }
    }
}

/// Ordering by `created_at`; equal timestamps fall back to the message id in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn sort(&self, messages: &mut [MessageRecord]) {
        messages.sort_by(|left, right| {
            let ordering = left
                .created_at_unix_millis
                .cmp(&right.created_at_unix_millis)
                .then_with(|| left.id.cmp(&right.id));
            match self {
                Self::Ascending => ordering,
                Self::Descending => ordering.reverse(),
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Event-type filter applied by a table subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => *only == kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangedRow {
    Message(MessageRecord),
    Profile(ProfileRecord),
}

impl ChangedRow {
    pub fn table(&self) -> Table {
        match self {
            Self::Message(_) => Table::Messages,
            Self::Profile(_) => Table::Profiles,
        }
    }
}

/// Row-level change notification delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub row: ChangedRow,
}

impl ChangeEvent {
    pub fn message_inserted(message: MessageRecord) -> Self {
        Self {
            kind: ChangeKind::Insert,
            row: ChangedRow::Message(message),
        }
    }

    pub fn table(&self) -> Table {
        self.row.table()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}
