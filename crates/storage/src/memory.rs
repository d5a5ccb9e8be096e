//! Process-local backend used by tests and demos.
//!
//! Behaves like the hosted service from the client's point of view: async calls, auth
//! events on their own channel, row changes on the table feed. Faults and latency can be
//! injected to exercise the client's recovery paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future::BoxFuture;
use snafu::ensure;

use super::error::{
    ConflictSnafu, InvalidCredentialsSnafu, InvalidRowSnafu, NotFoundSnafu, StoreResult,
    UnavailableSnafu,
};
use super::feed::{AuthHub, AuthSubscription, ChangeHub, TableSubscription};
use super::ids::{MessageId, UserId};
use super::types::{
    AuthEvent, ChangeEvent, ChangeKind, ChangedRow, Credentials, EventFilter, Identity,
    MessageFilter, MessageRecord, NewAccount, NewMessage, ProfileRecord, SortOrder, Table,
};
use super::{AuthStore, ChangeFeed, MessageStore, ProfileStore};

#[derive(Debug)]
struct MemoryAccount {
    identity: Identity,
    password: String,
}

#[derive(Debug, Default)]
struct MemoryTables {
    messages: Vec<MessageRecord>,
    profiles: HashMap<UserId, ProfileRecord>,
    accounts: HashMap<String, MemoryAccount>,
    session: Option<Identity>,
    last_created_at: u64,
}

#[derive(Debug, Default)]
struct FaultPlan {
    failing_inserts: usize,
    failing_message_queries: usize,
    fail_profile_queries: bool,
    fail_session_check: bool,
    message_query_delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<MemoryTables>,
    faults: Mutex<FaultPlan>,
    changes: ChangeHub,
    auth: AuthHub,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account and its profile row without signing in or emitting events.
    pub fn register_account(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> Identity {
        let identity = Identity {
            user_id: UserId::new_v7(),
            email: normalize_email(email),
        };
        let mut tables = self.tables();
        tables.accounts.insert(
            identity.email.clone(),
            MemoryAccount {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );
        tables.profiles.insert(
            identity.user_id,
            ProfileRecord {
                id: identity.user_id,
                username: username.map(str::to_string),
                avatar_url: None,
            },
        );
        identity
    }

    pub fn seed_profile(&self, profile: ProfileRecord) {
        self.tables().profiles.insert(profile.id, profile);
    }

    /// Stores a historical message with an explicit timestamp. No change event is emitted.
    pub fn seed_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
        created_at_unix_millis: u64,
    ) -> MessageRecord {
        let record = MessageRecord {
            id: MessageId::new_v7(),
            content: content.to_string(),
            sender_id,
            receiver_id,
            created_at_unix_millis,
        };
        let mut tables = self.tables();
        tables.last_created_at = tables.last_created_at.max(created_at_unix_millis);
        tables.messages.push(record.clone());
        record
    }

    /// Removes a message and notifies `messages` subscribers with a delete event.
    pub fn delete_message(&self, message_id: MessageId) -> StoreResult<MessageRecord> {
        let mut tables = self.tables();
        let position = tables
            .messages
            .iter()
            .position(|message| message.id == message_id);
        let Some(position) = position else {
            return NotFoundSnafu {
                stage: "memory-delete-message",
                table: "messages",
                id: message_id.to_string(),
            }
            .fail();
        };
        let removed = tables.messages.remove(position);

        self.changes.publish(ChangeEvent {
            kind: ChangeKind::Delete,
            row: ChangedRow::Message(removed.clone()),
        });
        Ok(removed)
    }

    /// Pushes an arbitrary event to the table feed, e.g. to simulate redelivery.
    pub fn publish_change(&self, event: ChangeEvent) -> usize {
        self.changes.publish(event)
    }

    pub fn message_count(&self) -> usize {
        self.tables().messages.len()
    }

    pub fn change_subscriber_count(&self) -> usize {
        self.changes.subscriber_count()
    }

    pub fn fail_next_inserts(&self, count: usize) {
        self.faults().failing_inserts = count;
    }

    pub fn fail_next_message_queries(&self, count: usize) {
        self.faults().failing_message_queries = count;
    }

    pub fn fail_profile_queries(&self, failing: bool) {
        self.faults().fail_profile_queries = failing;
    }

    pub fn fail_session_check(&self, failing: bool) {
        self.faults().fail_session_check = failing;
    }

    pub fn set_message_query_delay(&self, delay: Option<Duration>) {
        self.faults().message_query_delay = delay;
    }

    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, FaultPlan> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_fault(counter: &mut usize) -> bool {
        if *counter == 0 {
            return false;
        }
        *counter -= 1;
        true
    }

    fn sign_in_identity(&self, identity: Identity) {
        self.tables().session = Some(identity.clone());
        self.auth.publish(AuthEvent::SignedIn(identity));
    }
}

impl MessageStore for MemoryBackend {
    fn query_messages<'a>(
        &'a self,
        filter: MessageFilter,
        order: SortOrder,
    ) -> BoxFuture<'a, StoreResult<Vec<MessageRecord>>> {
        async move {
            let (delay, failing) = {
                let mut faults = self.faults();
                let failing = Self::take_fault(&mut faults.failing_message_queries);
                (faults.message_query_delay, failing)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            ensure!(
                !failing,
                UnavailableSnafu {
                    stage: "memory-query-messages",
                    details: "injected query failure".to_string(),
                }
            );

            let mut rows = self
                .tables()
                .messages
                .iter()
                .filter(|message| filter.matches(message))
                .cloned()
                .collect::<Vec<_>>();
            order.sort(&mut rows);
            Ok(rows)
        }
        .boxed()
    }

    fn insert_message<'a>(&'a self, input: NewMessage) -> BoxFuture<'a, StoreResult<MessageRecord>> {
        async move {
            let failing = Self::take_fault(&mut self.faults().failing_inserts);
            ensure!(
                !failing,
                UnavailableSnafu {
                    stage: "memory-insert-message",
                    details: "injected insert failure".to_string(),
                }
            );
            ensure!(
                !input.content.trim().is_empty(),
                InvalidRowSnafu {
                    stage: "memory-insert-message",
                    table: "messages",
                    details: "content must not be empty".to_string(),
                }
            );

            // Publishing under the table lock keeps feed order equal to timestamp order.
            let mut tables = self.tables();
            let created_at_unix_millis = unix_timestamp_millis().max(tables.last_created_at + 1);
            tables.last_created_at = created_at_unix_millis;
            let record = MessageRecord {
                id: MessageId::new_v7(),
                content: input.content,
                sender_id: input.sender_id,
                receiver_id: input.receiver_id,
                created_at_unix_millis,
            };
            tables.messages.push(record.clone());
            self.changes.publish(ChangeEvent::message_inserted(record.clone()));
            Ok(record)
        }
        .boxed()
    }
}

impl ProfileStore for MemoryBackend {
    fn query_profiles<'a>(
        &'a self,
        ids: Vec<UserId>,
    ) -> BoxFuture<'a, StoreResult<Vec<ProfileRecord>>> {
        async move {
            let failing = self.faults().fail_profile_queries;
            ensure!(
                !failing,
                UnavailableSnafu {
                    stage: "memory-query-profiles",
                    details: "injected profile failure".to_string(),
                }
            );

            let tables = self.tables();
            Ok(ids
                .iter()
                .filter_map(|id| tables.profiles.get(id).cloned())
                .collect())
        }
        .boxed()
    }
}

impl AuthStore for MemoryBackend {
    fn current_session<'a>(&'a self) -> BoxFuture<'a, StoreResult<Option<Identity>>> {
        async move {
            let failing = self.faults().fail_session_check;
            ensure!(
                !failing,
                UnavailableSnafu {
                    stage: "memory-current-session",
                    details: "injected session check failure".to_string(),
                }
            );
            Ok(self.tables().session.clone())
        }
        .boxed()
    }

    fn sign_in<'a>(&'a self, credentials: Credentials) -> BoxFuture<'a, StoreResult<Identity>> {
        async move {
            let email = normalize_email(&credentials.email);
            let identity = {
                let tables = self.tables();
                tables
                    .accounts
                    .get(&email)
                    .filter(|account| account.password == credentials.password)
                    .map(|account| account.identity.clone())
            };
            let Some(identity) = identity else {
                return InvalidCredentialsSnafu {
                    stage: "memory-sign-in",
                    email,
                }
                .fail();
            };

            self.sign_in_identity(identity.clone());
            Ok(identity)
        }
        .boxed()
    }

    fn sign_up<'a>(&'a self, account: NewAccount) -> BoxFuture<'a, StoreResult<Identity>> {
        async move {
            let email = normalize_email(&account.email);
            ensure!(
                !email.is_empty() && !account.password.is_empty(),
                InvalidRowSnafu {
                    stage: "memory-sign-up",
                    table: "accounts",
                    details: "email and password are required".to_string(),
                }
            );
            let exists = self.tables().accounts.contains_key(&email);
            ensure!(
                !exists,
                ConflictSnafu {
                    stage: "memory-sign-up",
                    table: "accounts",
                    details: format!("account '{email}' already exists"),
                }
            );

            let username = account.username.trim();
            let identity = self.register_account(
                &email,
                &account.password,
                (!username.is_empty()).then_some(username),
            );
            self.sign_in_identity(identity.clone());
            Ok(identity)
        }
        .boxed()
    }

    fn sign_out<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            let previous = self.tables().session.take();
            if previous.is_some() {
                self.auth.publish(AuthEvent::SignedOut);
            }
            Ok(())
        }
        .boxed()
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.auth.subscribe_auth()
    }
}

impl ChangeFeed for MemoryBackend {
    fn subscribe_to_table(&self, table: Table, filter: EventFilter) -> TableSubscription {
        self.changes.subscribe_table(table, filter)
    }
}

pub(crate) fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub(crate) fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;

    #[tokio::test]
    async fn insert_publishes_and_orders_after_seeded_history() {
        let backend = MemoryBackend::new();
        let alice = UserId::new_v7();
        let bob = UserId::new_v7();
        let future_millis = unix_timestamp_millis() + 60_000;
        backend.seed_message(alice, bob, "seeded", future_millis);
        let mut feed = backend.subscribe_to_table(Table::Messages, EventFilter::All);

        let inserted = backend
            .insert_message(NewMessage {
                sender_id: bob,
                receiver_id: alice,
                content: "live".to_string(),
            })
            .await
            .expect("insert succeeds");

        assert!(inserted.created_at_unix_millis > future_millis);
        assert_eq!(
            feed.recv().await,
            Some(FeedItem::Event(ChangeEvent::message_inserted(inserted)))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_reach_the_feed_in_timestamp_order() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let (alice, bob) = (UserId::new_v7(), UserId::new_v7());
        let mut feed = backend.subscribe_to_table(Table::Messages, EventFilter::All);

        let writers = (0..100)
            .map(|index| {
                let backend = std::sync::Arc::clone(&backend);
                tokio::spawn(async move {
                    backend
                        .insert_message(NewMessage {
                            sender_id: alice,
                            receiver_id: bob,
                            content: format!("message {index}"),
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();
        for writer in writers {
            writer.await.expect("writer task").expect("insert succeeds");
        }

        let mut previous = 0;
        for _ in 0..100 {
            let Some(FeedItem::Event(ChangeEvent {
                row: ChangedRow::Message(message),
                ..
            })) = feed.recv().await
            else {
                panic!("expected a message insert");
            };
            assert!(message.created_at_unix_millis > previous);
            previous = message.created_at_unix_millis;
        }
    }

    #[tokio::test]
    async fn between_filter_returns_both_directions_only() {
        let backend = MemoryBackend::new();
        let (alice, bob, carol) = (UserId::new_v7(), UserId::new_v7(), UserId::new_v7());
        backend.seed_message(alice, bob, "one", 10);
        backend.seed_message(bob, alice, "two", 20);
        backend.seed_message(alice, carol, "other", 15);

        let rows = backend
            .query_messages(MessageFilter::Between(alice, bob), SortOrder::Ascending)
            .await
            .expect("query succeeds");

        let contents = rows.iter().map(|row| row.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, ["one", "two"]);
    }

    #[tokio::test]
    async fn injected_insert_failure_is_consumed_once() {
        let backend = MemoryBackend::new();
        let (alice, bob) = (UserId::new_v7(), UserId::new_v7());
        backend.fail_next_inserts(1);
        let input = NewMessage {
            sender_id: alice,
            receiver_id: bob,
            content: "retry me".to_string(),
        };

        assert!(backend.insert_message(input.clone()).await.is_err());
        assert!(backend.insert_message(input).await.is_ok());
        assert_eq!(backend.message_count(), 1);
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_emits_auth_events() {
        let backend = MemoryBackend::new();
        let mut auth = backend.on_auth_state_change();

        let created = backend
            .sign_up(NewAccount {
                email: " Ada@Example.com ".to_string(),
                password: "pw".to_string(),
                username: "Ada".to_string(),
            })
            .await
            .expect("sign up succeeds");
        assert_eq!(created.email, "ada@example.com");
        assert_eq!(
            auth.recv().await,
            Some(FeedItem::Event(AuthEvent::SignedIn(created.clone())))
        );

        backend.sign_out().await.expect("sign out succeeds");
        assert_eq!(auth.recv().await, Some(FeedItem::Event(AuthEvent::SignedOut)));

        let wrong = backend
            .sign_in(Credentials {
                email: "ada@example.com".to_string(),
                password: "nope".to_string(),
            })
            .await;
        assert!(wrong.is_err());

        let profiles = backend
            .query_profiles(vec![created.user_id])
            .await
            .expect("profile query succeeds");
        assert_eq!(profiles[0].username.as_deref(), Some("Ada"));
    }
}
