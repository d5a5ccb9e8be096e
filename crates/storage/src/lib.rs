//! Contract between the chat client and its hosted backend.
//!
//! The backend owns authentication, the `messages`/`profiles` tables and the realtime
//! change feed. Everything here is a boundary; the client never assumes more than these
//! traits promise.

pub mod error;
pub mod feed;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

use futures::future::BoxFuture;

pub use error::{StoreError, StoreResult};
pub use feed::{
    AuthHub, AuthSubscription, ChangeHub, FeedHub, FeedItem, Subscription, SubscriptionId,
    TableSubscription,
};
pub use ids::{MessageId, UserId};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use types::{
    AuthEvent, ChangeEvent, ChangeKind, ChangedRow, Credentials, EventFilter, Identity,
    MessageFilter, MessageRecord, NewAccount, NewMessage, ProfileRecord, SortOrder, Table,
};

pub trait MessageStore: Send + Sync {
    fn query_messages<'a>(
        &'a self,
        filter: MessageFilter,
        order: SortOrder,
    ) -> BoxFuture<'a, StoreResult<Vec<MessageRecord>>>;
    fn insert_message<'a>(&'a self, input: NewMessage) -> BoxFuture<'a, StoreResult<MessageRecord>>;
}

pub trait ProfileStore: Send + Sync {
    /// Returns the profile rows that exist among `ids`; unknown ids are simply absent.
    fn query_profiles<'a>(&'a self, ids: Vec<UserId>)
    -> BoxFuture<'a, StoreResult<Vec<ProfileRecord>>>;
}

pub trait AuthStore: Send + Sync {
    fn current_session<'a>(&'a self) -> BoxFuture<'a, StoreResult<Option<Identity>>>;
    fn sign_in<'a>(&'a self, credentials: Credentials) -> BoxFuture<'a, StoreResult<Identity>>;
    fn sign_up<'a>(&'a self, account: NewAccount) -> BoxFuture<'a, StoreResult<Identity>>;
    fn sign_out<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>>;
    fn on_auth_state_change(&self) -> AuthSubscription;
}

pub trait ChangeFeed: Send + Sync {
    fn subscribe_to_table(&self, table: Table, filter: EventFilter) -> TableSubscription;
}

pub trait Backend: MessageStore + ProfileStore + AuthStore + ChangeFeed {}

impl<T> Backend for T where T: MessageStore + ProfileStore + AuthStore + ChangeFeed {}
