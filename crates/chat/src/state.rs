//! Client state machine.
//!
//! [`ChatState`] never awaits. Each handler mutates state and returns the [`Effect`]s the
//! driver has to carry out. Async results come back through the `*_loaded`/`*_finished`
//! handlers together with the ticket they were started under; a ticket that no longer
//! matches the current session, selection or refresh generation is dropped.

use parley_storage::{
    AuthEvent, ChangeEvent, ChangeKind, ChangedRow, Credentials, FeedItem, Identity,
    MessageRecord, NewAccount, StoreError, StoreResult, UserId,
};

use crate::composer::{Composer, OutgoingMessage, SubmitOutcome};
use crate::conversation::{Conversation, ConversationIndex, IndexSnapshot, ReadMarks};
use crate::error::ChatError;
use crate::events::{ClientCommand, ClientEvent, GateView, Notice, ThreadView};
use crate::profile::UserIdentity;
use crate::session::{GateState, GateTransition, SessionEpoch, SessionGate};
use crate::stream::{MessageStream, PairKey, StreamPhase, StreamUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Startup,
    /// The auth feed lagged; the store's session is re-read.
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    SignIn,
    SignUp,
    SignOut,
}

impl AuthAction {
    fn describe(self) -> &'static str {
        match self {
            Self::SignIn => "sign in",
            Self::SignUp => "sign up",
            Self::SignOut => "sign out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTicket {
    pub session: SessionEpoch,
    pub generation: u64,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTicket {
    pub session: SessionEpoch,
    pub generation: u64,
    pub pair: PairKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTicket {
    pub session: SessionEpoch,
    pub selection: u64,
}

/// Result of one thread load: the pair's history plus the counterpart's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub messages: Vec<MessageRecord>,
    pub counterpart: UserIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CheckSession(SessionCheck),
    SignIn(Credentials),
    SignUp(NewAccount),
    SignOut,
    OpenIndexFeed,
    CloseIndexFeed,
    OpenThreadFeed(PairKey),
    CloseThreadFeed,
    LoadIndex(IndexTicket),
    LoadThread(ThreadTicket),
    Insert(SendTicket, OutgoingMessage),
    Emit(ClientEvent),
}

#[derive(Debug)]
pub struct ChatState {
    gate: SessionGate,
    placeholder_name: String,
    index: ConversationIndex,
    read_marks: ReadMarks,
    stream: MessageStream,
    counterpart: Option<UserIdentity>,
    composer: Composer,
    selection_epoch: u64,
    index_generation: u64,
    thread_generation: u64,
}

impl ChatState {
    pub fn new(placeholder_name: impl Into<String>) -> Self {
        Self {
            gate: SessionGate::new(),
            placeholder_name: placeholder_name.into(),
            index: ConversationIndex::new(),
            read_marks: ReadMarks::default(),
            stream: MessageStream::new(),
            counterpart: None,
            composer: Composer::new(),
            selection_epoch: 0,
            index_generation: 0,
            thread_generation: 0,
        }
    }

    pub fn gate(&self) -> &GateState {
        self.gate.state()
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.index.entries()
    }

    pub fn selection(&self) -> Option<UserId> {
        self.stream.pair().map(|pair| pair.counterpart_id)
    }

    pub fn thread(&self) -> &[MessageRecord] {
        self.stream.messages()
    }

    pub fn draft(&self) -> &str {
        self.composer.draft()
    }

    pub fn start(&mut self) -> Vec<Effect> {
        vec![
            Effect::Emit(ClientEvent::Gate(self.gate_view())),
            Effect::CheckSession(SessionCheck::Startup),
        ]
    }

    pub fn handle_command(&mut self, command: ClientCommand) -> Vec<Effect> {
        match command {
            ClientCommand::SignIn(credentials) => vec![Effect::SignIn(credentials)],
            ClientCommand::SignUp(account) => vec![Effect::SignUp(account)],
            ClientCommand::SignOut => vec![Effect::SignOut],
            ClientCommand::Select(counterpart_id) => self.select(counterpart_id),
            ClientCommand::ClearSelection => self.clear_selection(),
            ClientCommand::EditDraft(draft) => {
                self.composer.set_draft(draft);
                Vec::new()
            }
            ClientCommand::Send => self.send(),
            ClientCommand::SendText(text) => {
                if self.composer.is_sending() {
                    return vec![rejection(ChatError::SendInFlight {
                        stage: "send-text",
                    })];
                }
                self.composer.set_draft(text);
                self.send()
            }
            ClientCommand::Refresh => self.refresh(),
            ClientCommand::Shutdown => Vec::new(),
        }
    }

    pub fn session_checked(
        &mut self,
        check: SessionCheck,
        result: StoreResult<Option<Identity>>,
    ) -> Vec<Effect> {
        let transition = match check {
            SessionCheck::Startup => self.gate.resolve_startup(result),
            SessionCheck::Resync => self.gate.reconcile(result),
        };
        self.apply_transition(transition)
    }

    /// Result of a forwarded auth call. The gate itself only moves on auth events.
    pub fn auth_finished(&mut self, action: AuthAction, result: StoreResult<()>) -> Vec<Effect> {
        match result {
            Ok(()) => {
                tracing::debug!(action = action.describe(), "auth call acknowledged");
                Vec::new()
            }
            Err(source) => vec![store_failure("auth-call", action.describe(), source)],
        }
    }

    pub fn auth_event(&mut self, item: FeedItem<AuthEvent>) -> Vec<Effect> {
        match item {
            FeedItem::Event(event) => {
                let transition = self.gate.apply_auth_event(event);
                self.apply_transition(transition)
            }
            FeedItem::Lagged { .. } => vec![Effect::CheckSession(SessionCheck::Resync)],
        }
    }

    pub fn index_loaded(
        &mut self,
        ticket: IndexTicket,
        result: StoreResult<IndexSnapshot>,
    ) -> Vec<Effect> {
        if !self.gate.is_current(ticket.session) || ticket.generation != self.index_generation {
            tracing::debug!(
                generation = ticket.generation,
                current = self.index_generation,
                "discarding stale conversation index load"
            );
            return Vec::new();
        }

        match result {
            Ok(snapshot) => {
                self.index
                    .apply_snapshot(ticket.user_id, snapshot, &self.read_marks);
                vec![self.conversations_event()]
            }
            Err(source) => vec![store_failure("load-index", "loading conversations", source)],
        }
    }

    pub fn thread_loaded(
        &mut self,
        ticket: ThreadTicket,
        result: StoreResult<ThreadSnapshot>,
    ) -> Vec<Effect> {
        if !self.gate.is_current(ticket.session)
            || ticket.generation != self.thread_generation
            || self.stream.pair() != Some(ticket.pair)
        {
            tracing::debug!(
                counterpart = %ticket.pair.counterpart_id,
                generation = ticket.generation,
                current = self.thread_generation,
                "discarding stale thread load"
            );
            return Vec::new();
        }

        let mut effects = Vec::new();
        match result {
            Ok(snapshot) => {
                self.counterpart = Some(snapshot.counterpart);
                self.stream.finish_load(snapshot.messages);
            }
            Err(source) => {
                self.stream.fail_load();
                effects.push(store_failure("load-thread", "loading messages", source));
            }
        }
        effects.extend(self.mark_thread_read());
        effects.push(self.thread_event());
        effects
    }

    pub fn send_finished(
        &mut self,
        ticket: SendTicket,
        outgoing: OutgoingMessage,
        result: StoreResult<MessageRecord>,
    ) -> Vec<Effect> {
        if !self.gate.is_current(ticket.session) {
            tracing::debug!("discarding send result from a previous session");
            return Vec::new();
        }
        if ticket.selection != self.selection_epoch {
            // Draft belongs to another thread now; only a failure is worth telling about.
            tracing::debug!("send finished after the selection changed");
            return match result {
                Ok(_) => Vec::new(),
                Err(source) => vec![store_failure("send-message", "sending message", source)],
            };
        }

        match result {
            Ok(record) => {
                tracing::info!(message_id = %record.id, "message sent");
                if self.composer.acknowledge(&outgoing) {
                    vec![Effect::Emit(ClientEvent::Draft(String::new()))]
                } else {
                    Vec::new()
                }
            }
            Err(source) => {
                self.composer.reject();
                vec![
                    store_failure("send-message", "sending message", source),
                    Effect::Emit(ClientEvent::Draft(self.composer.draft().to_string())),
                ]
            }
        }
    }

    /// Any change on `messages`, or a lag, triggers a full recompute.
    pub fn index_change(&mut self, item: FeedItem<ChangeEvent>) -> Vec<Effect> {
        if let FeedItem::Event(event) = &item {
            tracing::debug!(kind = ?event.kind, "messages changed; recomputing conversations");
        }
        self.reload_index().into_iter().collect()
    }

    pub fn thread_change(&mut self, item: FeedItem<ChangeEvent>) -> Vec<Effect> {
        let event = match item {
            FeedItem::Event(event) => event,
            FeedItem::Lagged { .. } => return self.reload_thread(),
        };
        if event.kind != ChangeKind::Insert {
            return Vec::new();
        }
        let ChangedRow::Message(message) = event.row else {
            return Vec::new();
        };

        match self.stream.apply_insert(message) {
            StreamUpdate::Appended => {
                let mut effects = self.mark_thread_read().into_iter().collect::<Vec<_>>();
                effects.push(self.thread_event());
                effects
            }
            StreamUpdate::Buffered => Vec::new(),
            update @ (StreamUpdate::Ignored | StreamUpdate::Duplicate) => {
                tracing::debug!(?update, "insert event not applied to thread");
                Vec::new()
            }
        }
    }

    fn select(&mut self, counterpart_id: UserId) -> Vec<Effect> {
        let Some(context) = self.gate.context() else {
            return vec![rejection(ChatError::NotSignedIn {
                stage: "select-counterpart",
            })];
        };
        let session = context.epoch;
        let pair = PairKey::new(context.user_id(), counterpart_id);
        if self.stream.pair() == Some(pair) {
            return vec![self.thread_event()];
        }

        let mut effects = Vec::new();
        if self.stream.pair().is_some() {
            effects.push(Effect::CloseThreadFeed);
        }
        self.selection_epoch += 1;
        self.thread_generation += 1;
        self.stream.open(pair);
        self.composer.reset();
        self.counterpart = Some(
            self.index
                .identity(counterpart_id)
                .cloned()
                .unwrap_or_else(|| UserIdentity::placeholder(counterpart_id, &self.placeholder_name)),
        );
        tracing::info!(counterpart = %counterpart_id, "conversation opened");

        effects.push(Effect::OpenThreadFeed(pair));
        effects.push(Effect::LoadThread(ThreadTicket {
            session,
            generation: self.thread_generation,
            pair,
        }));
        effects.push(self.thread_event());
        effects.push(Effect::Emit(ClientEvent::Draft(String::new())));
        effects
    }

    fn clear_selection(&mut self) -> Vec<Effect> {
        if self.stream.pair().is_none() {
            return Vec::new();
        }
        self.close_thread();
        vec![
            Effect::CloseThreadFeed,
            self.thread_event(),
            Effect::Emit(ClientEvent::Draft(String::new())),
        ]
    }

    fn send(&mut self) -> Vec<Effect> {
        let Some(session) = self.gate.context().map(|context| context.epoch) else {
            return vec![rejection(ChatError::NotSignedIn {
                stage: "send-message",
            })];
        };
        let Some(pair) = self.stream.pair() else {
            return vec![rejection(ChatError::NoCounterpart {
                stage: "send-message",
            })];
        };

        match self.composer.submit(pair.user_id, pair.counterpart_id) {
            SubmitOutcome::Empty => {
                tracing::debug!("ignoring send of a blank draft");
                Vec::new()
            }
            SubmitOutcome::Busy => vec![rejection(ChatError::SendInFlight {
                stage: "send-message",
            })],
            SubmitOutcome::Ready(outgoing) => vec![Effect::Insert(
                SendTicket {
                    session,
                    selection: self.selection_epoch,
                },
                outgoing,
            )],
        }
    }

    fn refresh(&mut self) -> Vec<Effect> {
        if self.gate.context().is_none() {
            return vec![rejection(ChatError::NotSignedIn { stage: "refresh" })];
        }
        let mut effects = self.reload_index().into_iter().collect::<Vec<_>>();
        effects.extend(self.reload_thread());
        effects
    }

    fn apply_transition(&mut self, transition: GateTransition) -> Vec<Effect> {
        match transition {
            GateTransition::Unchanged => Vec::new(),
            GateTransition::SignedIn(context) => {
                let mut effects = self.teardown();
                effects.push(Effect::Emit(ClientEvent::Gate(GateView::SignedIn(
                    context.identity,
                ))));
                effects.push(Effect::OpenIndexFeed);
                effects.extend(self.reload_index());
                effects
            }
            GateTransition::SignedOut => {
                let mut effects = self.teardown();
                effects.push(Effect::Emit(ClientEvent::Gate(GateView::SignedOut)));
                effects
            }
        }
    }

    /// Drops everything derived from the previous identity, subscriptions first.
    fn teardown(&mut self) -> Vec<Effect> {
        self.close_thread();
        self.index.clear();
        self.read_marks.clear();
        self.index_generation += 1;

        vec![
            Effect::CloseThreadFeed,
            Effect::CloseIndexFeed,
            self.conversations_event(),
            self.thread_event(),
            Effect::Emit(ClientEvent::Draft(String::new())),
        ]
    }

    fn close_thread(&mut self) {
        self.stream.close();
        self.counterpart = None;
        self.composer.reset();
        self.selection_epoch += 1;
        self.thread_generation += 1;
    }

    fn reload_index(&mut self) -> Option<Effect> {
        let (session, user_id) = self
            .gate
            .context()
            .map(|context| (context.epoch, context.user_id()))?;
        self.index_generation += 1;
        Some(Effect::LoadIndex(IndexTicket {
            session,
            generation: self.index_generation,
            user_id,
        }))
    }

    fn reload_thread(&mut self) -> Vec<Effect> {
        let Some(session) = self.gate.context().map(|context| context.epoch) else {
            return Vec::new();
        };
        let Some(pair) = self.stream.reload() else {
            return Vec::new();
        };
        self.thread_generation += 1;
        vec![
            Effect::LoadThread(ThreadTicket {
                session,
                generation: self.thread_generation,
                pair,
            }),
            self.thread_event(),
        ]
    }

    /// Advances the open thread's read mark to its newest row.
    fn mark_thread_read(&mut self) -> Option<Effect> {
        let pair = self.stream.pair()?;
        let latest = self.stream.latest_at()?;
        if !self.read_marks.mark(pair.counterpart_id, latest) {
            return None;
        }
        self.index.rebuild(pair.user_id, &self.read_marks);
        Some(self.conversations_event())
    }

    fn gate_view(&self) -> GateView {
        match self.gate.state() {
            GateState::Checking => GateView::Checking,
            GateState::Unauthenticated => GateView::SignedOut,
            GateState::Authenticated(context) => GateView::SignedIn(context.identity.clone()),
        }
    }

    fn conversations_event(&self) -> Effect {
        Effect::Emit(ClientEvent::Conversations(self.index.entries().to_vec()))
    }

    fn thread_event(&self) -> Effect {
        Effect::Emit(ClientEvent::Thread(ThreadView {
            counterpart: self.counterpart.clone(),
            loading: self.stream.phase() == StreamPhase::Loading,
            messages: self.stream.messages().to_vec(),
        }))
    }
}

fn store_failure(stage: &'static str, action: &'static str, source: StoreError) -> Effect {
    let error = ChatError::Store {
        stage,
        action,
        source,
    };
    tracing::error!(stage, error = %error, "store operation failed");
    Effect::Emit(ClientEvent::Notice(Notice::from(&error)))
}

fn rejection(error: ChatError) -> Effect {
    tracing::debug!(stage = error.stage(), "command rejected: {error}");
    Effect::Emit(ClientEvent::Notice(Notice::from(&error)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parley_storage::MessageId;

    use super::*;
    use crate::events::NoticeLevel;

    fn identity() -> Identity {
        Identity {
            user_id: UserId::new_v7(),
            email: "ada@example.com".to_string(),
        }
    }

    fn message(sender: UserId, receiver: UserId, content: &str, at: u64) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            content: content.to_string(),
            sender_id: sender,
            receiver_id: receiver,
            created_at_unix_millis: at,
        }
    }

    fn sent_record(outgoing: &OutgoingMessage) -> MessageRecord {
        let sent = &outgoing.message;
        message(sent.sender_id, sent.receiver_id, &sent.content, 100)
    }

    fn signed_in(user: &Identity) -> (ChatState, IndexTicket) {
        let mut state = ChatState::new("Unknown user");
        let effects = state.session_checked(SessionCheck::Startup, Ok(Some(user.clone())));
        let ticket = effects
            .iter()
            .find_map(|effect| match effect {
                Effect::LoadIndex(ticket) => Some(*ticket),
                _ => None,
            })
            .expect("sign-in loads the index");
        (state, ticket)
    }

    fn thread_ticket(effects: &[Effect]) -> ThreadTicket {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::LoadThread(ticket) => Some(*ticket),
                _ => None,
            })
            .expect("selection loads the thread")
    }

    fn notices(effects: &[Effect]) -> Vec<&Notice> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Emit(ClientEvent::Notice(notice)) => Some(notice),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn startup_opens_feed_before_loading_index() {
        let user = identity();
        let mut state = ChatState::new("Unknown user");
        assert_eq!(
            state.start(),
            [
                Effect::Emit(ClientEvent::Gate(GateView::Checking)),
                Effect::CheckSession(SessionCheck::Startup),
            ]
        );

        let effects = state.session_checked(SessionCheck::Startup, Ok(Some(user.clone())));
        let feed = effects
            .iter()
            .position(|effect| *effect == Effect::OpenIndexFeed)
            .expect("index feed opened");
        let load = effects
            .iter()
            .position(|effect| matches!(effect, Effect::LoadIndex(_)))
            .expect("index load started");
        assert!(feed < load);
        assert!(effects.contains(&Effect::Emit(ClientEvent::Gate(GateView::SignedIn(user)))));
    }

    #[test]
    fn superseded_index_load_is_discarded() {
        let user = identity();
        let (mut state, first) = signed_in(&user);
        let peer = UserId::new_v7();

        let Some(Effect::LoadIndex(second)) = state.index_change(FeedItem::Lagged { skipped: 3 }).pop()
        else {
            panic!("lag triggers a reload");
        };

        let stale = IndexSnapshot {
            messages: vec![message(peer, user.user_id, "stale", 1)],
            identities: HashMap::new(),
        };
        assert!(state.index_loaded(first, Ok(stale)).is_empty());
        assert!(state.conversations().is_empty());

        let fresh = IndexSnapshot {
            messages: vec![message(peer, user.user_id, "fresh", 2)],
            identities: HashMap::new(),
        };
        assert_eq!(state.index_loaded(second, Ok(fresh)).len(), 1);
        assert_eq!(state.conversations()[0].last_message, "fresh");
        assert_eq!(state.conversations()[0].counterpart.display_name, "Unknown user");
    }

    #[test]
    fn thread_load_for_previous_counterpart_is_discarded() {
        let user = identity();
        let (mut state, _) = signed_in(&user);
        let (b, c) = (UserId::new_v7(), UserId::new_v7());

        let for_b = thread_ticket(&state.handle_command(ClientCommand::Select(b)));
        let effects = state.handle_command(ClientCommand::Select(c));
        let for_c = thread_ticket(&effects);
        let close = effects
            .iter()
            .position(|effect| *effect == Effect::CloseThreadFeed)
            .expect("old feed released");
        let open = effects
            .iter()
            .position(|effect| matches!(effect, Effect::OpenThreadFeed(pair) if pair.counterpart_id == c))
            .expect("new feed opened");
        assert!(close < open);

        let late = ThreadSnapshot {
            messages: vec![message(user.user_id, b, "for b", 1)],
            counterpart: UserIdentity::placeholder(b, "Unknown user"),
        };
        assert!(state.thread_loaded(for_b, Ok(late)).is_empty());
        assert!(state.thread().is_empty());

        let current = ThreadSnapshot {
            messages: vec![message(c, user.user_id, "for c", 2)],
            counterpart: UserIdentity::placeholder(c, "Unknown user"),
        };
        state.thread_loaded(for_c, Ok(current));
        assert_eq!(state.selection(), Some(c));
        assert_eq!(state.thread().len(), 1);
        assert_eq!(state.thread()[0].content, "for c");
    }

    #[test]
    fn sign_out_clears_selection_thread_index_and_draft() {
        let user = identity();
        let (mut state, index_ticket) = signed_in(&user);
        let b = UserId::new_v7();
        state.index_loaded(
            index_ticket,
            Ok(IndexSnapshot {
                messages: vec![message(b, user.user_id, "hi", 1)],
                identities: HashMap::new(),
            }),
        );
        let ticket = thread_ticket(&state.handle_command(ClientCommand::Select(b)));
        state.thread_loaded(
            ticket,
            Ok(ThreadSnapshot {
                messages: vec![message(b, user.user_id, "hi", 1)],
                counterpart: UserIdentity::placeholder(b, "Unknown user"),
            }),
        );
        state.handle_command(ClientCommand::EditDraft("unsent".to_string()));

        let effects = state.auth_event(FeedItem::Event(AuthEvent::SignedOut));

        assert_eq!(effects[0], Effect::CloseThreadFeed);
        assert_eq!(effects[1], Effect::CloseIndexFeed);
        assert!(effects.contains(&Effect::Emit(ClientEvent::Conversations(Vec::new()))));
        assert!(effects.contains(&Effect::Emit(ClientEvent::Thread(ThreadView::default()))));
        assert!(effects.contains(&Effect::Emit(ClientEvent::Gate(GateView::SignedOut))));
        assert_eq!(state.gate(), &GateState::Unauthenticated);
        assert_eq!(state.selection(), None);
        assert!(state.thread().is_empty());
        assert!(state.conversations().is_empty());
        assert_eq!(state.draft(), "");

        // A load started before sign-out must not repopulate anything.
        assert!(state.index_loaded(index_ticket, Ok(IndexSnapshot::default())).is_empty());
    }

    #[test]
    fn opening_a_thread_clears_its_unread_badge() {
        let user = identity();
        let (mut state, index_ticket) = signed_in(&user);
        let b = UserId::new_v7();
        let history = vec![message(b, user.user_id, "one", 1), message(b, user.user_id, "two", 2)];
        state.index_loaded(
            index_ticket,
            Ok(IndexSnapshot {
                messages: history.clone(),
                identities: HashMap::new(),
            }),
        );
        assert_eq!(state.conversations()[0].unread_count, 2);

        let ticket = thread_ticket(&state.handle_command(ClientCommand::Select(b)));
        state.thread_loaded(
            ticket,
            Ok(ThreadSnapshot {
                messages: history,
                counterpart: UserIdentity::placeholder(b, "Unknown user"),
            }),
        );

        assert_eq!(state.conversations()[0].unread_count, 0);
    }

    #[test]
    fn failed_send_keeps_draft_and_raises_an_error() {
        let user = identity();
        let (mut state, _) = signed_in(&user);
        let b = UserId::new_v7();
        state.handle_command(ClientCommand::Select(b));
        state.handle_command(ClientCommand::EditDraft("hello".to_string()));

        let Some(Effect::Insert(ticket, outgoing)) = state.handle_command(ClientCommand::Send).pop()
        else {
            panic!("non-empty draft is inserted");
        };
        assert_eq!(outgoing.message.receiver_id, b);

        let effects = state.send_finished(
            ticket,
            outgoing,
            Err(StoreError::Unavailable {
                stage: "test",
                details: "offline".to_string(),
            }),
        );
        let notices = notices(&effects);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(state.draft(), "hello");
        assert!(effects.contains(&Effect::Emit(ClientEvent::Draft("hello".to_string()))));
    }

    #[test]
    fn typed_text_during_a_send_leaves_the_draft_alone() {
        let user = identity();
        let (mut state, _) = signed_in(&user);
        state.handle_command(ClientCommand::Select(UserId::new_v7()));

        let Some(Effect::Insert(ticket, outgoing)) = state
            .handle_command(ClientCommand::SendText("first".to_string()))
            .pop()
        else {
            panic!("typed text is inserted");
        };

        let effects = state.handle_command(ClientCommand::SendText("second".to_string()));
        let notices = notices(&effects);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Info);
        assert!(!effects.iter().any(|effect| matches!(effect, Effect::Insert(..))));
        assert_eq!(state.draft(), "first");

        let effects = state.send_finished(ticket, outgoing.clone(), Ok(sent_record(&outgoing)));
        assert_eq!(effects, [Effect::Emit(ClientEvent::Draft(String::new()))]);
        assert_eq!(state.draft(), "");
    }

    #[test]
    fn commands_without_a_session_raise_notices() {
        let mut state = ChatState::new("Unknown user");
        state.session_checked(SessionCheck::Startup, Ok(None));

        assert_eq!(notices(&state.handle_command(ClientCommand::Select(UserId::new_v7()))).len(), 1);
        assert_eq!(notices(&state.handle_command(ClientCommand::Send)).len(), 1);
        assert!(state.handle_command(ClientCommand::ClearSelection).is_empty());
    }
}
