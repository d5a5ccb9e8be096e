use parley_storage::{NewMessage, UserId};

/// Insert prepared from the draft, plus the raw draft it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub message: NewMessage,
    pub submitted_draft: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Draft is blank after trimming; nothing happens and the draft is left as typed.
    Empty,
    /// A previous insert has not been acknowledged yet.
    Busy,
    Ready(OutgoingMessage),
}

/// Draft text for the open thread. Holds no message state of its own.
#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
    in_flight: bool,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn submit(&mut self, sender_id: UserId, receiver_id: UserId) -> SubmitOutcome {
        let content = self.draft.trim();
        if content.is_empty() {
            return SubmitOutcome::Empty;
        }
        if self.in_flight {
            return SubmitOutcome::Busy;
        }

        self.in_flight = true;
        SubmitOutcome::Ready(OutgoingMessage {
            message: NewMessage {
                sender_id,
                receiver_id,
                content: content.to_string(),
            },
            submitted_draft: self.draft.clone(),
        })
    }

    /// Insert acknowledged. Clears the draft unless the user edited it since submitting.
    pub fn acknowledge(&mut self, outgoing: &OutgoingMessage) -> bool {
        self.in_flight = false;
        if self.draft == outgoing.submitted_draft {
            self.draft.clear();
            return true;
        }
        false
    }

    /// Insert failed; the draft stays for a retry.
    pub fn reject(&mut self) {
        self.in_flight = false;
    }

    pub fn reset(&mut self) {
        self.draft.clear();
        self.in_flight = false;
    }
}
