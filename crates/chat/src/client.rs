//! Single-task driver around [`ChatState`].
//!
//! One task owns the state and processes commands, store completions and feed events in
//! arrival order. Store calls run on spawned tasks and report back through the completion
//! channel; nothing else touches the state.

use std::future::Future;
use std::sync::Arc;

use parley_storage::{
    AuthSubscription, Backend, ChangeKind, Credentials, EventFilter, FeedItem, Identity,
    MessageRecord, NewAccount, StoreResult, Subscription, Table, TableSubscription, UserId,
};
use snafu::ensure;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::composer::OutgoingMessage;
use crate::conversation::{IndexSnapshot, fetch_index_snapshot};
use crate::error::{ChatResult, ClientStoppedSnafu};
use crate::events::{ClientCommand, ClientEvent};
use crate::profile::{PLACEHOLDER_DISPLAY_NAME, ProfileResolver};
use crate::state::{
    AuthAction, ChatState, Effect, IndexTicket, SendTicket, SessionCheck, ThreadSnapshot,
    ThreadTicket,
};
use crate::stream::{PairKey, fetch_thread};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Display name used when a profile is missing or has no username.
    pub placeholder_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            placeholder_name: PLACEHOLDER_DISPLAY_NAME.to_string(),
        }
    }
}

#[derive(Debug)]
enum Completion {
    SessionChecked(SessionCheck, StoreResult<Option<Identity>>),
    AuthFinished(AuthAction, StoreResult<()>),
    IndexLoaded(IndexTicket, StoreResult<IndexSnapshot>),
    ThreadLoaded(ThreadTicket, StoreResult<ThreadSnapshot>),
    SendFinished(SendTicket, OutgoingMessage, StoreResult<MessageRecord>),
}

/// Cloneable command side of a running [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl ChatHandle {
    pub fn dispatch(&self, command: ClientCommand) -> ChatResult<()> {
        ensure!(
            self.commands.send(command).is_ok(),
            ClientStoppedSnafu {
                stage: "dispatch-command",
            }
        );
        Ok(())
    }

    pub fn sign_in(&self, email: impl Into<String>, password: impl Into<String>) -> ChatResult<()> {
        self.dispatch(ClientCommand::SignIn(Credentials {
            email: email.into(),
            password: password.into(),
        }))
    }

    pub fn sign_up(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
        username: impl Into<String>,
    ) -> ChatResult<()> {
        self.dispatch(ClientCommand::SignUp(NewAccount {
            email: email.into(),
            password: password.into(),
            username: username.into(),
        }))
    }

    pub fn sign_out(&self) -> ChatResult<()> {
        self.dispatch(ClientCommand::SignOut)
    }

    pub fn select(&self, counterpart_id: UserId) -> ChatResult<()> {
        self.dispatch(ClientCommand::Select(counterpart_id))
    }

    pub fn clear_selection(&self) -> ChatResult<()> {
        self.dispatch(ClientCommand::ClearSelection)
    }

    pub fn edit_draft(&self, draft: impl Into<String>) -> ChatResult<()> {
        self.dispatch(ClientCommand::EditDraft(draft.into()))
    }

    pub fn submit(&self) -> ChatResult<()> {
        self.dispatch(ClientCommand::Send)
    }

    pub fn send_text(&self, text: impl Into<String>) -> ChatResult<()> {
        self.dispatch(ClientCommand::SendText(text.into()))
    }

    pub fn refresh(&self) -> ChatResult<()> {
        self.dispatch(ClientCommand::Refresh)
    }

    pub fn shutdown(&self) -> ChatResult<()> {
        self.dispatch(ClientCommand::Shutdown)
    }
}

pub struct ChatClient<B> {
    backend: Arc<B>,
    resolver: ProfileResolver,
    state: ChatState,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    events: mpsc::UnboundedSender<ClientEvent>,
    auth_feed: Option<AuthSubscription>,
    index_feed: Option<TableSubscription>,
    thread_feed: Option<TableSubscription>,
}

impl<B> ChatClient<B>
where
    B: Backend + 'static,
{
    pub fn new(
        backend: Arc<B>,
        options: ClientOptions,
    ) -> (Self, ChatHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let resolver = ProfileResolver::new(options.placeholder_name);

        let client = Self {
            backend,
            state: ChatState::new(resolver.placeholder_name()),
            resolver,
            commands,
            completion_tx,
            completions,
            events,
            auth_feed: None,
            index_feed: None,
            thread_feed: None,
        };
        (client, ChatHandle { commands: command_tx }, event_rx)
    }

    /// Spawns the driver on the current runtime.
    pub fn spawn(
        backend: Arc<B>,
        options: ClientOptions,
    ) -> (JoinHandle<()>, ChatHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (client, handle, events) = Self::new(backend, options);
        (tokio::spawn(client.run()), handle, events)
    }

    /// Runs until shutdown is requested, every handle is dropped or the event receiver is gone.
    pub async fn run(mut self) {
        // Subscribe before the startup check so no transition falls between the two.
        self.auth_feed = Some(self.backend.on_auth_state_change());
        let effects = self.state.start();
        let mut running = self.execute(effects);

        while running {
            running = tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(ClientCommand::Shutdown) => false,
                    Some(command) => {
                        let effects = self.state.handle_command(command);
                        self.execute(effects)
                    }
                },
                Some(completion) = self.completions.recv() => {
                    let effects = self.complete(completion);
                    self.execute(effects)
                }
                item = next_item(&mut self.auth_feed) => match item {
                    Some(item) => {
                        let effects = self.state.auth_event(item);
                        self.execute(effects)
                    }
                    None => {
                        tracing::warn!("auth feed closed");
                        self.auth_feed = None;
                        true
                    }
                },
                item = next_item(&mut self.index_feed) => match item {
                    Some(item) => {
                        let effects = self.state.index_change(item);
                        self.execute(effects)
                    }
                    None => {
                        tracing::warn!("conversation feed closed");
                        self.index_feed = None;
                        true
                    }
                },
                item = next_item(&mut self.thread_feed) => match item {
                    Some(item) => {
                        let effects = self.state.thread_change(item);
                        self.execute(effects)
                    }
                    None => {
                        tracing::warn!("thread feed closed");
                        self.thread_feed = None;
                        true
                    }
                },
            };
        }

        self.close_thread_feed();
        self.close_index_feed();
        tracing::info!("chat client stopped");
    }

    fn complete(&mut self, completion: Completion) -> Vec<Effect> {
        match completion {
            Completion::SessionChecked(check, result) => self.state.session_checked(check, result),
            Completion::AuthFinished(action, result) => self.state.auth_finished(action, result),
            Completion::IndexLoaded(ticket, result) => self.state.index_loaded(ticket, result),
            Completion::ThreadLoaded(ticket, result) => self.state.thread_loaded(ticket, result),
            Completion::SendFinished(ticket, outgoing, result) => {
                self.state.send_finished(ticket, outgoing, result)
            }
        }
    }

    /// Returns false once nobody listens for events anymore.
    fn execute(&mut self, effects: Vec<Effect>) -> bool {
        for effect in effects {
            match effect {
                Effect::CheckSession(check) => {
                    let backend = Arc::clone(&self.backend);
                    self.spawn_completion(async move {
                        Completion::SessionChecked(check, backend.current_session().await)
                    });
                }
                Effect::SignIn(credentials) => {
                    let backend = Arc::clone(&self.backend);
                    self.spawn_completion(async move {
                        let result = backend.sign_in(credentials).await.map(|_| ());
                        Completion::AuthFinished(AuthAction::SignIn, result)
                    });
                }
                Effect::SignUp(account) => {
                    let backend = Arc::clone(&self.backend);
                    self.spawn_completion(async move {
                        let result = backend.sign_up(account).await.map(|_| ());
                        Completion::AuthFinished(AuthAction::SignUp, result)
                    });
                }
                Effect::SignOut => {
                    let backend = Arc::clone(&self.backend);
                    self.spawn_completion(async move {
                        Completion::AuthFinished(AuthAction::SignOut, backend.sign_out().await)
                    });
                }
                Effect::OpenIndexFeed => {
                    self.close_index_feed();
                    let feed = self
                        .backend
                        .subscribe_to_table(Table::Messages, EventFilter::All);
                    tracing::info!(subscription = %feed.id(), "conversation feed opened");
                    self.index_feed = Some(feed);
                }
                Effect::CloseIndexFeed => self.close_index_feed(),
                Effect::OpenThreadFeed(pair) => self.open_thread_feed(pair),
                Effect::CloseThreadFeed => self.close_thread_feed(),
                Effect::LoadIndex(ticket) => {
                    let backend = Arc::clone(&self.backend);
                    let resolver = self.resolver.clone();
                    self.spawn_completion(async move {
                        let result =
                            fetch_index_snapshot(backend.as_ref(), &resolver, ticket.user_id).await;
                        Completion::IndexLoaded(ticket, result)
                    });
                }
                Effect::LoadThread(ticket) => {
                    let backend = Arc::clone(&self.backend);
                    let resolver = self.resolver.clone();
                    self.spawn_completion(async move {
                        let (messages, counterpart) = futures::join!(
                            fetch_thread(backend.as_ref(), ticket.pair),
                            resolver.resolve(backend.as_ref(), ticket.pair.counterpart_id),
                        );
                        let result = messages.map(|messages| ThreadSnapshot {
                            messages,
                            counterpart,
                        });
                        Completion::ThreadLoaded(ticket, result)
                    });
                }
                Effect::Insert(ticket, outgoing) => {
                    let backend = Arc::clone(&self.backend);
                    self.spawn_completion(async move {
                        let result = backend.insert_message(outgoing.message.clone()).await;
                        Completion::SendFinished(ticket, outgoing, result)
                    });
                }
                Effect::Emit(event) => {
                    if self.events.send(event).is_err() {
                        tracing::debug!("event receiver dropped; stopping chat client");
                        return false;
                    }
                }
            }
        }
        true
    }

    fn spawn_completion<F>(&self, task: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let _ = completions.send(task.await);
        });
    }

    fn open_thread_feed(&mut self, pair: PairKey) {
        self.close_thread_feed();
        let feed = self
            .backend
            .subscribe_to_table(Table::Messages, EventFilter::Only(ChangeKind::Insert));
        tracing::info!(
            subscription = %feed.id(),
            counterpart = %pair.counterpart_id,
            "thread feed opened"
        );
        self.thread_feed = Some(feed);
    }

    fn close_thread_feed(&mut self) {
        if let Some(feed) = self.thread_feed.take() {
            tracing::info!(subscription = %feed.id(), "thread feed closed");
            feed.unsubscribe();
        }
    }

    fn close_index_feed(&mut self) {
        if let Some(feed) = self.index_feed.take() {
            tracing::info!(subscription = %feed.id(), "conversation feed closed");
            feed.unsubscribe();
        }
    }
}

/// Next item of an optional feed; pending forever while the feed is absent.
async fn next_item<T: Clone>(feed: &mut Option<Subscription<T>>) -> Option<FeedItem<T>> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}
