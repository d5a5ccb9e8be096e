//! Conversation list derived from the signed-in user's messages.
//!
//! The index is recomputed wholesale from a fresh query on every change to the `messages`
//! table. Incremental patching is deliberately absent: one query per change keeps the list
//! trivially consistent with the store.

use std::cmp::Ordering;
use std::collections::HashMap;

use parley_storage::{
    MessageFilter, MessageId, MessageRecord, MessageStore, ProfileStore, SortOrder, StoreResult,
    UserId,
};

use crate::profile::{PLACEHOLDER_DISPLAY_NAME, ProfileResolver, UserIdentity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub counterpart: UserIdentity,
    pub last_message_id: MessageId,
    pub last_message: String,
    pub last_message_at_unix_millis: u64,
    pub unread_count: u32,
}

impl Conversation {
    pub fn counterpart_id(&self) -> UserId {
        self.counterpart.id
    }
}

/// Latest message per counterpart, before identities are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDigest {
    pub counterpart_id: UserId,
    pub latest: MessageRecord,
    pub unread_count: u32,
}

/// Per-counterpart timestamp of the newest message seen with that thread open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadMarks {
    marks: HashMap<UserId, u64>,
}

impl ReadMarks {
    /// Advances the mark; never moves it backwards.
    pub fn mark(&mut self, counterpart_id: UserId, seen_at_unix_millis: u64) -> bool {
        let mark = self.marks.entry(counterpart_id).or_insert(0);
        if seen_at_unix_millis > *mark {
            *mark = seen_at_unix_millis;
            return true;
        }
        false
    }

    pub fn get(&self, counterpart_id: UserId) -> Option<u64> {
        self.marks.get(&counterpart_id).copied()
    }

    pub fn clear(&mut self) {
        self.marks.clear();
    }

    fn is_unread(&self, counterpart_id: UserId, created_at_unix_millis: u64) -> bool {
        self.get(counterpart_id)
            .is_none_or(|mark| created_at_unix_millis > mark)
    }
}

/// Newest first; equal timestamps fall back to the newer (larger) message id.
pub fn recency_order(left: &MessageRecord, right: &MessageRecord) -> Ordering {
    right
        .created_at_unix_millis
        .cmp(&left.created_at_unix_millis)
        .then_with(|| right.id.cmp(&left.id))
}

/// Groups `messages` by counterpart of `user_id`, keeping the latest message of each group.
///
/// Messages the user is not a party to are ignored. The result is ordered by
/// [`recency_order`] of each group's latest message.
pub fn digest_conversations(
    user_id: UserId,
    messages: &[MessageRecord],
    read_marks: &ReadMarks,
) -> Vec<ConversationDigest> {
    let mut positions: HashMap<UserId, usize> = HashMap::new();
    let mut digests: Vec<ConversationDigest> = Vec::new();

    for message in messages {
        let Some(counterpart_id) = message.counterpart_of(user_id) else {
            continue;
        };
        let received = message.receiver_id == user_id && message.sender_id != user_id;
        let unread = u32::from(
            received && read_marks.is_unread(counterpart_id, message.created_at_unix_millis),
        );

        match positions.get(&counterpart_id) {
            Some(&position) => {
                let digest = &mut digests[position];
                digest.unread_count = digest.unread_count.saturating_add(unread);
                if recency_order(message, &digest.latest) == Ordering::Less {
                    digest.latest = message.clone();
                }
            }
            None => {
                positions.insert(counterpart_id, digests.len());
                digests.push(ConversationDigest {
                    counterpart_id,
                    latest: message.clone(),
                    unread_count: unread,
                });
            }
        }
    }

    digests.sort_by(|left, right| recency_order(&left.latest, &right.latest));
    digests
}

/// Raw inputs of one index refresh: the user's messages plus resolved counterpart identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub messages: Vec<MessageRecord>,
    pub identities: HashMap<UserId, UserIdentity>,
}

pub async fn fetch_index_snapshot<S>(
    store: &S,
    resolver: &ProfileResolver,
    user_id: UserId,
) -> StoreResult<IndexSnapshot>
where
    S: MessageStore + ProfileStore + ?Sized,
{
    let messages = store
        .query_messages(MessageFilter::Involving(user_id), SortOrder::Descending)
        .await?;
    let counterparts = messages
        .iter()
        .filter_map(|message| message.counterpart_of(user_id))
        .collect::<Vec<_>>();
    let identities = resolver.resolve_many(store, &counterparts).await;

    Ok(IndexSnapshot {
        messages,
        identities,
    })
}

/// Ordered conversation list for the signed-in user.
///
/// Keeps the last snapshot so read-mark changes can recount unread badges without a query.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    snapshot: IndexSnapshot,
    entries: Vec<Conversation>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Conversation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, counterpart_id: UserId) -> Option<&Conversation> {
        self.entries
            .iter()
            .find(|conversation| conversation.counterpart_id() == counterpart_id)
    }

    pub fn identity(&self, counterpart_id: UserId) -> Option<&UserIdentity> {
        self.snapshot.identities.get(&counterpart_id)
    }

    pub fn apply_snapshot(&mut self, user_id: UserId, snapshot: IndexSnapshot, marks: &ReadMarks) {
        self.snapshot = snapshot;
        self.rebuild(user_id, marks);
    }

    /// Recounts unread badges after read marks moved.
    pub fn rebuild(&mut self, user_id: UserId, marks: &ReadMarks) {
        self.entries = digest_conversations(user_id, &self.snapshot.messages, marks)
            .into_iter()
            .map(|digest| {
                let counterpart = self
                    .snapshot
                    .identities
                    .get(&digest.counterpart_id)
                    .cloned()
                    .unwrap_or_else(|| {
                        UserIdentity::placeholder(digest.counterpart_id, PLACEHOLDER_DISPLAY_NAME)
                    });
                Conversation {
                    counterpart,
                    last_message_id: digest.latest.id,
                    last_message: digest.latest.content,
                    last_message_at_unix_millis: digest.latest.created_at_unix_millis,
                    unread_count: digest.unread_count,
                }
            })
            .collect();
    }

    pub fn clear(&mut self) {
        self.snapshot = IndexSnapshot::default();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use parley_storage::{MemoryBackend, ProfileRecord};

    fn message(sender: UserId, receiver: UserId, content: &str, at: u64) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            content: content.to_string(),
            sender_id: sender,
            receiver_id: receiver,
            created_at_unix_millis: at,
        }
    }

    #[test]
    fn latest_message_per_counterpart_newest_first() {
        let (a, b, c) = (UserId::new_v7(), UserId::new_v7(), UserId::new_v7());
        let messages = vec![
            message(a, b, "hi", 1),
            message(b, a, "yo", 2),
            message(a, c, "hey", 3),
        ];

        let digests = digest_conversations(a, &messages, &ReadMarks::default());

        let summary = digests
            .iter()
            .map(|digest| (digest.counterpart_id, digest.latest.content.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(summary, [(c, "hey"), (b, "yo")]);
        assert_eq!(digests[0].latest.created_at_unix_millis, 3);
        assert_eq!(digests[1].latest.created_at_unix_millis, 2);
    }

    #[test]
    fn one_entry_per_counterpart_regardless_of_volume_or_direction() {
        let user = UserId::new_v7();
        let peers = (0..5).map(|_| UserId::new_v7()).collect::<Vec<_>>();
        let stranger = UserId::new_v7();
        let mut messages = Vec::new();
        for (round, peer) in peers.iter().cycle().take(40).enumerate() {
            let at = (round as u64 * 7919) % 101;
            if round % 2 == 0 {
                messages.push(message(user, *peer, "out", at));
            } else {
                messages.push(message(*peer, user, "in", at));
            }
        }
        messages.push(message(stranger, peers[0], "not mine", 500));

        let digests = digest_conversations(user, &messages, &ReadMarks::default());

        let counterparts = digests
            .iter()
            .map(|digest| digest.counterpart_id)
            .collect::<HashSet<_>>();
        assert_eq!(digests.len(), peers.len());
        assert_eq!(counterparts, peers.iter().copied().collect::<HashSet<_>>());
        for pair in digests.windows(2) {
            assert!(
                pair[0].latest.created_at_unix_millis >= pair[1].latest.created_at_unix_millis
            );
        }
        for digest in &digests {
            let newest = messages
                .iter()
                .filter(|candidate| candidate.counterpart_of(user) == Some(digest.counterpart_id))
                .map(|candidate| candidate.created_at_unix_millis)
                .max();
            assert_eq!(Some(digest.latest.created_at_unix_millis), newest);
        }
    }

    #[test]
    fn equal_timestamps_break_ties_on_newer_message_id() {
        let (a, b, c) = (UserId::new_v7(), UserId::new_v7(), UserId::new_v7());
        let older = message(a, b, "first", 10);
        let newer = message(a, c, "second", 10);
        let (older, newer) = if older.id < newer.id {
            (older, newer)
        } else {
            (newer, older)
        };

        let digests = digest_conversations(a, &[older.clone(), newer.clone()], &ReadMarks::default());

        assert_eq!(digests[0].latest.id, newer.id);
        assert_eq!(digests[1].latest.id, older.id);
    }

    #[test]
    fn unread_counts_only_received_messages_after_the_mark() {
        let (a, b) = (UserId::new_v7(), UserId::new_v7());
        let messages = vec![
            message(b, a, "one", 1),
            message(b, a, "two", 2),
            message(a, b, "mine", 3),
            message(b, a, "three", 4),
        ];
        let mut marks = ReadMarks::default();
        assert_eq!(digest_conversations(a, &messages, &marks)[0].unread_count, 3);

        assert!(marks.mark(b, 2));
        assert!(!marks.mark(b, 1));
        assert_eq!(digest_conversations(a, &messages, &marks)[0].unread_count, 1);

        marks.mark(b, 4);
        assert_eq!(digest_conversations(a, &messages, &marks)[0].unread_count, 0);
    }

    #[test]
    fn self_addressed_messages_form_their_own_conversation() {
        let a = UserId::new_v7();
        let digests = digest_conversations(a, &[message(a, a, "note to self", 5)], &ReadMarks::default());

        assert_eq!(digests.len(), 1);
        assert_eq!(digests[0].counterpart_id, a);
        assert_eq!(digests[0].unread_count, 0);
    }

    #[tokio::test]
    async fn index_keeps_conversations_whose_profile_is_missing() {
        let backend = MemoryBackend::new();
        let (a, b, c) = (UserId::new_v7(), UserId::new_v7(), UserId::new_v7());
        backend.seed_profile(ProfileRecord {
            id: b,
            username: Some("Bea".to_string()),
            avatar_url: None,
        });
        backend.seed_message(a, b, "hi", 1);
        backend.seed_message(c, a, "who dis", 2);

        let snapshot = fetch_index_snapshot(&backend, &ProfileResolver::default(), a)
            .await
            .expect("snapshot");
        let mut index = ConversationIndex::new();
        index.apply_snapshot(a, snapshot, &ReadMarks::default());

        let names = index
            .entries()
            .iter()
            .map(|conversation| conversation.counterpart.display_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, [PLACEHOLDER_DISPLAY_NAME, "Bea"]);
        assert_eq!(index.get(c).map(|conversation| conversation.unread_count), Some(1));
    }

    #[tokio::test]
    async fn user_without_messages_gets_an_empty_index() {
        let backend = MemoryBackend::new();
        let snapshot = fetch_index_snapshot(&backend, &ProfileResolver::default(), UserId::new_v7())
            .await
            .expect("empty snapshot is not an error");

        let mut index = ConversationIndex::new();
        index.apply_snapshot(UserId::new_v7(), snapshot, &ReadMarks::default());
        assert!(index.is_empty());
    }
}
