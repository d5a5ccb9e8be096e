//! In-process fan-out used by the local backends to emulate realtime notifications.
//!
//! A [`FeedHub`] owns one broadcast channel; each [`Subscription`] is an independent
//! receiver with its own filter. Dropping a subscription is the unsubscribe.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::{self, error::RecvError};

use super::types::{AuthEvent, ChangeEvent, EventFilter, Table};

pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "sub-{}", self.0)
    }
}

/// Item yielded by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem<T> {
    Event(T),
    /// The subscriber fell behind and `skipped` events were dropped; derived state must be reloaded.
    Lagged { skipped: u64 },
}

type FeedFilter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

pub struct Subscription<T> {
    id: SubscriptionId,
    label: String,
    events: broadcast::Receiver<T>,
    filter: FeedFilter<T>,
}

pub type TableSubscription = Subscription<ChangeEvent>;
pub type AuthSubscription = Subscription<AuthEvent>;

impl<T: Clone> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event that passes this subscription's filter.
    ///
    /// Returns `None` once the publishing side is gone. Cancel safe.
    pub async fn recv(&mut self) -> Option<FeedItem<T>> {
        loop {
            match self.events.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(FeedItem::Event(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        subscription = %self.id,
                        label = %self.label,
                        skipped,
                        "subscription lagged behind feed"
                    );
                    return Some(FeedItem::Lagged { skipped });
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Releases the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        tracing::debug!(subscription = %self.id, label = %self.label, "subscription released");
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct FeedHub<T> {
    sender: broadcast::Sender<T>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for FeedHub<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T: Clone + Send + 'static> Default for FeedHub<T> {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl<T: Clone + Send + 'static> FeedHub<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publishes to every live subscription and returns how many receivers saw it.
    pub fn publish(&self, event: T) -> usize {
        // No receivers is not an error for a notification feed.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe_filtered<F>(&self, label: impl Into<String>, filter: F) -> Subscription<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = label.into();
        tracing::debug!(subscription = %id, label = %label, "subscription opened");
        Subscription {
            id,
            label,
            events: self.sender.subscribe(),
            filter: Box::new(filter),
        }
    }
}

pub type ChangeHub = FeedHub<ChangeEvent>;
pub type AuthHub = FeedHub<AuthEvent>;

impl FeedHub<ChangeEvent> {
    pub fn subscribe_table(&self, table: Table, filter: EventFilter) -> TableSubscription {
        self.subscribe_filtered(format!("{table}:{filter:?}"), move |event: &ChangeEvent| {
            event.table() == table && filter.accepts(event.kind)
        })
    }
}

impl FeedHub<AuthEvent> {
    pub fn subscribe_auth(&self) -> AuthSubscription {
        self.subscribe_filtered("auth", |_: &AuthEvent| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MessageId, UserId};
    use crate::types::{ChangeKind, ChangedRow, MessageRecord, ProfileRecord};

    fn message_event(kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            kind,
            row: ChangedRow::Message(MessageRecord {
                id: MessageId::new_v7(),
                content: "hello".to_string(),
                sender_id: UserId::new_v7(),
                receiver_id: UserId::new_v7(),
                created_at_unix_millis: 1,
            }),
        }
    }

    #[tokio::test]
    async fn table_subscription_skips_other_tables_and_kinds() {
        let hub = ChangeHub::default();
        let mut inserts = hub.subscribe_table(Table::Messages, EventFilter::Only(ChangeKind::Insert));

        hub.publish(ChangeEvent {
            kind: ChangeKind::Insert,
            row: ChangedRow::Profile(ProfileRecord {
                id: UserId::new_v7(),
                username: None,
                avatar_url: None,
            }),
        });
        hub.publish(message_event(ChangeKind::Delete));
        let wanted = message_event(ChangeKind::Insert);
        hub.publish(wanted.clone());

        assert_eq!(inserts.recv().await, Some(FeedItem::Event(wanted)));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_much_it_missed() {
        let hub = ChangeHub::new(2);
        let mut all = hub.subscribe_table(Table::Messages, EventFilter::All);

        for _ in 0..5 {
            hub.publish(message_event(ChangeKind::Insert));
        }

        assert_eq!(all.recv().await, Some(FeedItem::Lagged { skipped: 3 }));
        assert!(matches!(all.recv().await, Some(FeedItem::Event(_))));
    }

    #[test]
    fn dropping_a_subscription_detaches_it() {
        let hub = AuthHub::default();
        let subscription = hub.subscribe_auth();
        assert_eq!(hub.subscriber_count(), 1);

        subscription.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(AuthEvent::SignedOut), 0);
    }
}
