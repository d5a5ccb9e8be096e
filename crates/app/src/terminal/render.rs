use parley_chat::{ClientEvent, Conversation, GateView, Notice, NoticeLevel, ThreadView, UserIdentity};
use parley_storage::{Identity, MessageRecord, UserId};

const PREVIEW_CHARS: usize = 40;
const MINUTE_MILLIS: u64 = 60 * 1000;
const HOUR_MILLIS: u64 = 60 * MINUTE_MILLIS;
const DAY_MILLIS: u64 = 24 * HOUR_MILLIS;

pub const PROMPT_HELP: &str =
    "commands: login <email> <password> | register <email> <password> <username> | save-settings | quit";
pub const CHAT_HELP: &str = "type to send to the open conversation; commands: /list /open <number|user id> /close /retry /refresh /whoami /logout /save-settings /quit";

#[derive(Debug, Clone, Copy)]
struct ShownThread {
    counterpart: UserId,
    printed: usize,
    loaded: bool,
}

/// Last state reported by the client plus what has already been printed.
#[derive(Debug)]
pub struct Screen {
    gate: GateView,
    conversations: Vec<Conversation>,
    thread: ThreadView,
    shown: Option<ShownThread>,
    draft: String,
    page_hint: usize,
}

impl Screen {
    pub fn new(page_hint: usize) -> Self {
        Self {
            gate: GateView::Checking,
            conversations: Vec::new(),
            thread: ThreadView::default(),
            shown: None,
            draft: String::new(),
            page_hint: page_hint.max(1),
        }
    }

    pub fn gate(&self) -> &GateView {
        &self.gate
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.gate {
            GateView::SignedIn(identity) => Some(identity),
            GateView::Checking | GateView::SignedOut => None,
        }
    }

    /// Conversation at a 1-based list position.
    pub fn conversation_at(&self, position: usize) -> Option<&Conversation> {
        position
            .checked_sub(1)
            .and_then(|index| self.conversations.get(index))
    }

    pub fn thread_counterpart(&self) -> Option<&UserIdentity> {
        self.thread.counterpart.as_ref()
    }

    /// Draft the client kept after a failed send, if any.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Folds one client event into the screen and returns the lines to print.
    pub fn apply(&mut self, event: ClientEvent, now_millis: u64) -> Vec<String> {
        match event {
            ClientEvent::Gate(view) => self.apply_gate(view),
            ClientEvent::Conversations(list) => self.apply_conversations(list, now_millis),
            ClientEvent::Thread(view) => self.apply_thread(view, now_millis),
            ClientEvent::Draft(draft) => self.apply_draft(draft),
            ClientEvent::Notice(notice) => vec![notice_line(&notice)],
        }
    }

    pub fn conversation_lines(&self, now_millis: u64) -> Vec<String> {
        if self.conversations.is_empty() {
            return vec!["no conversations yet; /open <user id> starts one".to_string()];
        }
        self.conversations
            .iter()
            .enumerate()
            .map(|(index, conversation)| conversation_row(index + 1, conversation, now_millis))
            .collect()
    }

    fn apply_draft(&mut self, draft: String) -> Vec<String> {
        self.draft = draft;
        if self.draft.trim().is_empty() {
            return Vec::new();
        }
        vec![format!("draft: {} (/retry to resend)", self.draft.trim())]
    }

    fn apply_gate(&mut self, view: GateView) -> Vec<String> {
        if view == self.gate {
            return Vec::new();
        }
        let lines = match &view {
            GateView::Checking => vec!["checking session...".to_string()],
            GateView::SignedOut => vec!["signed out".to_string(), PROMPT_HELP.to_string()],
            GateView::SignedIn(identity) => vec![
                format!("signed in as {}", identity.email),
                CHAT_HELP.to_string(),
            ],
        };
        self.gate = view;
        lines
    }

    fn apply_conversations(&mut self, list: Vec<Conversation>, now_millis: u64) -> Vec<String> {
        let previous = std::mem::replace(&mut self.conversations, list);
        if self.identity().is_none() {
            return Vec::new();
        }
        let Some(open) = self.thread.counterpart.as_ref().map(|counterpart| counterpart.id) else {
            return self.conversation_lines(now_millis);
        };

        // A thread is open: only announce other conversations that gained unread messages.
        self.conversations
            .iter()
            .filter(|conversation| conversation.counterpart_id() != open)
            .filter(|conversation| {
                let before = previous
                    .iter()
                    .find(|old| old.counterpart_id() == conversation.counterpart_id())
                    .map_or(0, |old| old.unread_count);
                conversation.unread_count > before
            })
            .map(|conversation| {
                format!(
                    "* {}: {}  [{}]",
                    conversation.counterpart.display_name,
                    preview(&conversation.last_message),
                    conversation.unread_count
                )
            })
            .collect()
    }

    fn apply_thread(&mut self, view: ThreadView, now_millis: u64) -> Vec<String> {
        self.thread = view;
        let Some(counterpart) = self.thread.counterpart.clone() else {
            self.shown = None;
            return Vec::new();
        };
        let me = self.identity().map(|identity| identity.user_id);

        let shown = match self.shown {
            Some(shown) if shown.counterpart == counterpart.id => shown,
            _ => {
                self.shown = Some(ShownThread {
                    counterpart: counterpart.id,
                    printed: 0,
                    loaded: false,
                });
                if self.thread.loading {
                    return vec![format!("opening conversation with {}...", counterpart.display_name)];
                }
                ShownThread {
                    counterpart: counterpart.id,
                    printed: 0,
                    loaded: false,
                }
            }
        };
        if self.thread.loading {
            return Vec::new();
        }

        let messages = &self.thread.messages;
        let mut lines = Vec::new();
        let start = if shown.loaded && messages.len() >= shown.printed {
            shown.printed
        } else {
            lines.push(format!("-- {} ({}) --", counterpart.display_name, counterpart.id));
            let start = messages.len().saturating_sub(self.page_hint);
            if start > 0 {
                lines.push(format!("({start} earlier messages not shown)"));
            }
            if messages.is_empty() {
                lines.push("no messages yet; say hello".to_string());
            }
            start
        };
        lines.extend(
            messages[start..]
                .iter()
                .map(|message| message_row(message, me, &counterpart, now_millis)),
        );

        self.shown = Some(ShownThread {
            counterpart: counterpart.id,
            printed: messages.len(),
            loaded: true,
        });
        lines
    }
}

pub fn conversation_row(position: usize, conversation: &Conversation, now_millis: u64) -> String {
    let mut row = format!(
        "{position:>3}. {}  {}  ({})",
        conversation.counterpart.display_name,
        preview(&conversation.last_message),
        relative_age(conversation.last_message_at_unix_millis, now_millis)
    );
    if conversation.unread_count > 0 {
        row.push_str(&format!("  [{}]", conversation.unread_count));
    }
    row
}

pub fn message_row(
    message: &MessageRecord,
    me: Option<UserId>,
    counterpart: &UserIdentity,
    now_millis: u64,
) -> String {
    let (arrow, author) = if Some(message.sender_id) == me {
        ("->", "you")
    } else {
        ("<-", counterpart.display_name.as_str())
    };
    format!(
        "{:>5} {arrow} {author}: {}",
        relative_age(message.created_at_unix_millis, now_millis),
        message.content
    )
}

/// Elapsed-time label; avoids any timezone handling.
pub fn relative_age(at_unix_millis: u64, now_unix_millis: u64) -> String {
    let age = now_unix_millis.saturating_sub(at_unix_millis);
    if age < MINUTE_MILLIS {
        "now".to_string()
    } else if age < HOUR_MILLIS {
        format!("{}m", age / MINUTE_MILLIS)
    } else if age < DAY_MILLIS {
        format!("{}h", age / HOUR_MILLIS)
    } else {
        format!("{}d", age / DAY_MILLIS)
    }
}

fn preview(content: &str) -> String {
    let single_line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= PREVIEW_CHARS {
        return single_line;
    }
    let mut truncated = single_line.chars().take(PREVIEW_CHARS - 3).collect::<String>();
    truncated.push_str("...");
    truncated
}

fn notice_line(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!("* {}", notice.message),
        NoticeLevel::Error => format!("! {}", notice.message),
    }
}
