use std::collections::HashSet;

use parley_storage::{MessageFilter, MessageId, MessageRecord, MessageStore, SortOrder, StoreResult, UserId};

/// The two participants a message stream is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub user_id: UserId,
    pub counterpart_id: UserId,
}

impl PairKey {
    pub const fn new(user_id: UserId, counterpart_id: UserId) -> Self {
        Self {
            user_id,
            counterpart_id,
        }
    }

    /// Exact match on `{sender, receiver}` in either direction.
    pub fn matches(&self, message: &MessageRecord) -> bool {
        message.is_between(self.user_id, self.counterpart_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    /// History query in flight; live inserts are buffered.
    Loading,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamUpdate {
    /// Event belongs to another pair, or no pair is open.
    Ignored,
    Buffered,
    Appended,
    /// Same id already present; redelivery or overlap with the history query.
    Duplicate,
}

/// Ordered message history for the selected pair, kept live from insert events.
#[derive(Debug, Default)]
pub struct MessageStream {
    pair: Option<PairKey>,
    phase: StreamPhase,
    messages: Vec<MessageRecord>,
    known_ids: HashSet<MessageId>,
    buffered: Vec<MessageRecord>,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pair(&self) -> Option<PairKey> {
        self.pair
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn latest_at(&self) -> Option<u64> {
        self.messages
            .last()
            .map(|message| message.created_at_unix_millis)
    }

    /// Drops whatever was shown and starts loading `pair`.
    pub fn open(&mut self, pair: PairKey) {
        self.clear_rows();
        self.pair = Some(pair);
        self.phase = StreamPhase::Loading;
    }

    /// Re-enters loading for the current pair, keeping rows on screen until the new history lands.
    pub fn reload(&mut self) -> Option<PairKey> {
        let pair = self.pair?;
        self.buffered.clear();
        self.phase = StreamPhase::Loading;
        Some(pair)
    }

    pub fn close(&mut self) {
        self.clear_rows();
        self.pair = None;
        self.phase = StreamPhase::Idle;
    }

    /// Installs the loaded history, then replays inserts that arrived during the load.
    pub fn finish_load(&mut self, mut history: Vec<MessageRecord>) {
        let Some(pair) = self.pair else {
            return;
        };

        history.retain(|message| pair.matches(message));
        SortOrder::Ascending.sort(&mut history);

        self.messages.clear();
        self.known_ids.clear();
        for message in history {
            if self.known_ids.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.phase = StreamPhase::Live;
        self.replay_buffered();
    }

    /// Leaves the stream live but empty when the history query failed; buffered inserts still show.
    pub fn fail_load(&mut self) {
        if self.pair.is_none() {
            return;
        }
        self.phase = StreamPhase::Live;
        self.replay_buffered();
    }

    pub fn apply_insert(&mut self, message: MessageRecord) -> StreamUpdate {
        let Some(pair) = self.pair else {
            return StreamUpdate::Ignored;
        };
        if !pair.matches(&message) {
            return StreamUpdate::Ignored;
        }

        match self.phase {
            StreamPhase::Idle => StreamUpdate::Ignored,
            StreamPhase::Loading => {
                self.buffered.push(message);
                StreamUpdate::Buffered
            }
            StreamPhase::Live => {
                if !self.known_ids.insert(message.id) {
                    return StreamUpdate::Duplicate;
                }
                self.place(message);
                StreamUpdate::Appended
            }
        }
    }

    fn replay_buffered(&mut self) {
        for message in std::mem::take(&mut self.buffered) {
            if self.known_ids.insert(message.id) {
                self.place(message);
            }
        }
    }

    /// Inserts at the `(created_at, id)` position; feeds may deliver slightly out of order.
    fn place(&mut self, message: MessageRecord) {
        let key = (message.created_at_unix_millis, message.id);
        let position = self
            .messages
            .partition_point(|existing| (existing.created_at_unix_millis, existing.id) <= key);
        self.messages.insert(position, message);
    }

    fn clear_rows(&mut self) {
        self.messages.clear();
        self.known_ids.clear();
        self.buffered.clear();
    }
}

pub async fn fetch_thread<S>(store: &S, pair: PairKey) -> StoreResult<Vec<MessageRecord>>
where
    S: MessageStore + ?Sized,
{
    store
        .query_messages(
            MessageFilter::Between(pair.user_id, pair.counterpart_id),
            SortOrder::Ascending,
        )
        .await
}
