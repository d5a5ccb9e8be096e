use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::{
    ConflictSnafu, CreateSqliteDirectorySnafu, InvalidCredentialsSnafu, InvalidRowSnafu,
    SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu, SqliteQuerySnafu,
    StoreError, StoreResult,
};
use super::feed::{AuthHub, AuthSubscription, ChangeHub, TableSubscription};
use super::ids::{MessageId, UserId};
use super::memory::{normalize_email, unix_timestamp_millis};
use super::types::{
    AuthEvent, ChangeEvent, ChangeKind, ChangedRow, Credentials, EventFilter, Identity,
    MessageFilter, MessageRecord, NewAccount, NewMessage, ProfileRecord, SortOrder, Table,
};
use super::{AuthStore, ChangeFeed, MessageStore, ProfileStore};

/// Local stand-in for the hosted backend.
///
/// Rows live in SQLite; change and auth notifications are fanned out in-process, so only
/// clients sharing this value observe each other's writes live.
///
/// Message inserts are serialized: the timestamp is taken, the row written and the change
/// published under one lock, so feed order matches `created_at` order.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    database_url: String,
    changes: ChangeHub,
    auth: AuthHub,
    message_clock: Arc<Mutex<u64>>,
}

impl SqliteBackend {
    pub async fn open(database_location: &str) -> StoreResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // One connection keeps `:memory:` databases shared across calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        let last_created_at =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(created_at), 0) FROM messages")
                .fetch_one(&pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sqlite-open-last-created-at",
                })?;

        tracing::info!(database_url = %database_url, "opened sqlite backend");
        Ok(Self {
            pool,
            database_url,
            changes: ChangeHub::default(),
            auth: AuthHub::default(),
            message_clock: Arc::new(Mutex::new(i64_to_u64(
                last_created_at,
                "sqlite-open-last-created-at",
            )?)),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn store_session(&self, identity: &Identity, stage: &'static str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO current_session (slot, user_id) VALUES (1, ?) ON CONFLICT(slot) DO UPDATE SET user_id = excluded.user_id",
        )
        .bind(identity.user_id.to_string())
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu { stage })?;
        Ok(())
    }
}

impl MessageStore for SqliteBackend {
    fn query_messages<'a>(
        &'a self,
        filter: MessageFilter,
        order: SortOrder,
    ) -> BoxFuture<'a, StoreResult<Vec<MessageRecord>>> {
        async move {
            let direction = match order {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            let rows = match filter {
                MessageFilter::Involving(user_id) => {
                    sqlx::query_as::<_, MessageRow>(&format!(
                        "SELECT id, content, sender_id, receiver_id, created_at FROM messages WHERE sender_id = ? OR receiver_id = ? ORDER BY created_at {direction}, id {direction}"
                    ))
                    .bind(user_id.to_string())
                    .bind(user_id.to_string())
                    .fetch_all(&self.pool)
                    .await
                }
                MessageFilter::Between(left, right) => {
                    sqlx::query_as::<_, MessageRow>(&format!(
                        "SELECT id, content, sender_id, receiver_id, created_at FROM messages WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?) ORDER BY created_at {direction}, id {direction}"
                    ))
                    .bind(left.to_string())
                    .bind(right.to_string())
                    .bind(right.to_string())
                    .bind(left.to_string())
                    .fetch_all(&self.pool)
                    .await
                }
            }
            .context(SqliteQuerySnafu {
                stage: "message-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        }
        .boxed()
    }

    fn insert_message<'a>(&'a self, input: NewMessage) -> BoxFuture<'a, StoreResult<MessageRecord>> {
        async move {
            ensure!(
                !input.content.trim().is_empty(),
                InvalidRowSnafu {
                    stage: "message-insert-validate",
                    table: "messages",
                    details: "content must not be empty".to_string(),
                }
            );

            let mut last_created_at = self.message_clock.lock().await;
            let record = MessageRecord {
                id: MessageId::new_v7(),
                content: input.content,
                sender_id: input.sender_id,
                receiver_id: input.receiver_id,
                created_at_unix_millis: unix_timestamp_millis().max(*last_created_at + 1),
            };

            sqlx::query(
                "INSERT INTO messages (id, content, sender_id, receiver_id, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(record.id.to_string())
            .bind(record.content.clone())
            .bind(record.sender_id.to_string())
            .bind(record.receiver_id.to_string())
            .bind(u64_to_i64(record.created_at_unix_millis, "message-insert-created-at")?)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-insert",
            })?;

            *last_created_at = record.created_at_unix_millis;
            self.changes.publish(ChangeEvent::message_inserted(record.clone()));
            Ok(record)
        }
        .boxed()
    }
}

impl ProfileStore for SqliteBackend {
    fn query_profiles<'a>(
        &'a self,
        ids: Vec<UserId>,
    ) -> BoxFuture<'a, StoreResult<Vec<ProfileRecord>>> {
        async move {
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            let placeholders = vec!["?"; ids.len()].join(", ");
            let statement =
                format!("SELECT id, username, avatar_url FROM profiles WHERE id IN ({placeholders})");
            let mut query = sqlx::query_as::<_, ProfileRow>(&statement);
            for id in &ids {
                query = query.bind(id.to_string());
            }

            let rows = query.fetch_all(&self.pool).await.context(SqliteQuerySnafu {
                stage: "profile-query",
            })?;
            rows.into_iter().map(profile_row_to_record).collect()
        }
        .boxed()
    }
}

impl AuthStore for SqliteBackend {
    fn current_session<'a>(&'a self) -> BoxFuture<'a, StoreResult<Option<Identity>>> {
        async move {
            let row = sqlx::query_as::<_, AccountRow>(
                "SELECT accounts.id, accounts.email, accounts.password_hash, accounts.password_salt FROM current_session JOIN accounts ON accounts.id = current_session.user_id WHERE current_session.slot = 1",
            )
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-current-query",
            })?;

            row.map(|row| {
                Ok(Identity {
                    user_id: UserId::parse(&row.id)?,
                    email: row.email,
                })
            })
            .transpose()
        }
        .boxed()
    }

    fn sign_in<'a>(&'a self, credentials: Credentials) -> BoxFuture<'a, StoreResult<Identity>> {
        async move {
            let email = normalize_email(&credentials.email);
            let row = sqlx::query_as::<_, AccountRow>(
                "SELECT id, email, password_hash, password_salt FROM accounts WHERE email = ?",
            )
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "sign-in-load-account",
            })?;

            let Some(row) = row.filter(|row| {
                hash_password(&row.password_salt, &credentials.password) == row.password_hash
            }) else {
                return InvalidCredentialsSnafu {
                    stage: "sign-in-verify",
                    email,
                }
                .fail();
            };

            let identity = Identity {
                user_id: UserId::parse(&row.id)?,
                email: row.email,
            };
            self.store_session(&identity, "sign-in-store-session").await?;
            tracing::info!(user_id = %identity.user_id, "signed in");
            self.auth.publish(AuthEvent::SignedIn(identity.clone()));
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
                    stage: "sign-up-validate",
                    table: "accounts",
                    details: "email and password are required".to_string(),
                }
            );

            let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts WHERE email = ?")
                .bind(&email)
                .fetch_one(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sign-up-check-existing",
                })?;
            ensure!(
                existing == 0,
                ConflictSnafu {
                    stage: "sign-up-check-existing",
                    table: "accounts",
                    details: format!("account '{email}' already exists"),
                }
            );

            let identity = Identity {
                user_id: UserId::new_v7(),
                email,
            };
            let salt = Uuid::new_v4().simple().to_string();
            let username = account.username.trim().to_string();
            let profile = ProfileRecord {
                id: identity.user_id,
                username: (!username.is_empty()).then_some(username),
                avatar_url: None,
            };

            let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
                stage: "sign-up-begin",
            })?;
            sqlx::query(
                "INSERT INTO accounts (id, email, password_hash, password_salt, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(identity.user_id.to_string())
            .bind(&identity.email)
            .bind(hash_password(&salt, &account.password))
            .bind(&salt)
            .bind(u64_to_i64(unix_timestamp_millis(), "sign-up-created-at")?)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "sign-up-insert-account",
            })?;
            sqlx::query("INSERT INTO profiles (id, username, avatar_url) VALUES (?, ?, NULL)")
                .bind(profile.id.to_string())
                .bind(profile.username.clone())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sign-up-insert-profile",
                })?;
            tx.commit().await.context(SqliteQuerySnafu {
                stage: "sign-up-commit",
            })?;

            self.changes.publish(ChangeEvent {
                kind: ChangeKind::Insert,
                row: ChangedRow::Profile(profile),
            });
            self.store_session(&identity, "sign-up-store-session").await?;
            tracing::info!(user_id = %identity.user_id, "registered account");
            self.auth.publish(AuthEvent::SignedIn(identity.clone()));
            Ok(identity)
        }
        .boxed()
    }

    fn sign_out<'a>(&'a self) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            let removed = sqlx::query("DELETE FROM current_session WHERE slot = 1")
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sign-out-delete-session",
                })?
                .rows_affected();

            if removed > 0 {
                tracing::info!("signed out");
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

impl ChangeFeed for SqliteBackend {
    fn subscribe_to_table(&self, table: Table, filter: EventFilter) -> TableSubscription {
        self.changes.subscribe_table(table, filter)
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    content: String,
    sender_id: String,
    receiver_id: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: String,
    username: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: String,
    email: String,
    password_hash: String,
    password_salt: String,
}

fn message_row_to_record(row: MessageRow) -> StoreResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        content: row.content,
        sender_id: UserId::parse(&row.sender_id)?,
        receiver_id: UserId::parse(&row.receiver_id)?,
        created_at_unix_millis: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

fn profile_row_to_record(row: ProfileRow) -> StoreResult<ProfileRecord> {
    Ok(ProfileRecord {
        id: UserId::parse(&row.id)?,
        username: row.username,
        avatar_url: row.avatar_url,
    })
}

/// Salted SHA-256 digest of a password.
///
/// Good enough for a local single-user stand-in; this is not a password KDF and offers no
/// resistance to offline guessing if the database file leaks.
fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn i64_to_u64(value: i64, stage: &'static str) -> StoreResult<u64> {
    value
        .try_into()
        .map_err(|_| StoreError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StoreResult<i64> {
    value
        .try_into()
        .map_err(|_| StoreError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StoreResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;

    async fn open_temp() -> (tempfile::TempDir, SqliteBackend) {
        let directory = tempfile::tempdir().expect("temp dir");
        let path = directory.path().join("parley.db");
        let backend = SqliteBackend::open(path.to_str().expect("utf-8 path"))
            .await
            .expect("open sqlite backend");
        (directory, backend)
    }

    fn account(email: &str, username: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password: "correct horse".to_string(),
            username: username.to_string(),
        }
    }

    #[tokio::test]
    async fn session_survives_reopen_and_clears_on_sign_out() {
        let directory = tempfile::tempdir().expect("temp dir");
        let path = directory.path().join("nested").join("parley.db");
        let location = path.to_str().expect("utf-8 path").to_string();

        let first = SqliteBackend::open(&location).await.expect("open");
        let identity = first
            .sign_up(account("ada@example.com", "Ada"))
            .await
            .expect("sign up");
        drop(first);

        let reopened = SqliteBackend::open(&location).await.expect("reopen");
        assert_eq!(
            reopened.current_session().await.expect("session check"),
            Some(identity)
        );

        reopened.sign_out().await.expect("sign out");
        assert_eq!(reopened.current_session().await.expect("session check"), None);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let (_directory, backend) = open_temp().await;
        backend
            .sign_up(account("ada@example.com", "Ada"))
            .await
            .expect("sign up");

        let error = backend
            .sign_in(Credentials {
                email: "ADA@example.com".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .expect_err("wrong password");
        assert!(matches!(error, StoreError::InvalidCredentials { .. }));

        let duplicate = backend
            .sign_up(account("ada@example.com", "Other"))
            .await
            .expect_err("duplicate email");
        assert!(matches!(duplicate, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn inserted_messages_are_queryable_and_published() {
        let (_directory, backend) = open_temp().await;
        let ada = backend
            .sign_up(account("ada@example.com", "Ada"))
            .await
            .expect("sign up");
        let bob = backend
            .sign_up(account("bob@example.com", ""))
            .await
            .expect("sign up");
        let mut feed = backend.subscribe_to_table(Table::Messages, EventFilter::Only(ChangeKind::Insert));

        let first = backend
            .insert_message(NewMessage {
                sender_id: ada.user_id,
                receiver_id: bob.user_id,
                content: "hi".to_string(),
            })
            .await
            .expect("insert");
        let second = backend
            .insert_message(NewMessage {
                sender_id: bob.user_id,
                receiver_id: ada.user_id,
                content: "yo".to_string(),
            })
            .await
            .expect("insert");

        assert_eq!(
            feed.recv().await,
            Some(FeedItem::Event(ChangeEvent::message_inserted(first.clone())))
        );

        let newest_first = backend
            .query_messages(
                MessageFilter::Between(bob.user_id, ada.user_id),
                SortOrder::Descending,
            )
            .await
            .expect("query");
        assert_eq!(newest_first, vec![second, first]);

        let profiles = backend
            .query_profiles(vec![ada.user_id, bob.user_id, UserId::new_v7()])
            .await
            .expect("profiles");
        assert_eq!(profiles.len(), 2);
        assert!(
            profiles
                .iter()
                .any(|profile| profile.id == bob.user_id && profile.username.is_none())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_are_published_in_timestamp_order() {
        let (_directory, backend) = open_temp().await;
        let (ada, bob) = (UserId::new_v7(), UserId::new_v7());
        let mut feed = backend.subscribe_to_table(Table::Messages, EventFilter::All);

        let writers = (0..100)
            .map(|index| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend
                        .insert_message(NewMessage {
                            sender_id: if index % 2 == 0 { ada } else { bob },
                            receiver_id: if index % 2 == 0 { bob } else { ada },
                            content: format!("message {index}"),
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();
        for writer in writers {
            writer.await.expect("writer task").expect("insert");
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
    async fn blank_content_is_rejected_before_touching_sqlite() {
        let (_directory, backend) = open_temp().await;
        let error = backend
            .insert_message(NewMessage {
                sender_id: UserId::new_v7(),
                receiver_id: UserId::new_v7(),
                content: "   ".to_string(),
            })
            .await
            .expect_err("blank content");
        assert_eq!(error.stage(), "message-insert-validate");
    }
}
