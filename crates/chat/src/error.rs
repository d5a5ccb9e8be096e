use parley_storage::StoreError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("{action} failed: {source}"))]
    Store {
        stage: &'static str,
        action: &'static str,
        source: StoreError,
    },
    #[snafu(display("sign in first (`{stage}`)"))]
    NotSignedIn { stage: &'static str },
    #[snafu(display("open a conversation before sending (`{stage}`)"))]
    NoCounterpart { stage: &'static str },
    #[snafu(display("previous message is still sending; nothing was sent"))]
    SendInFlight { stage: &'static str },
    #[snafu(display("chat client has stopped (`{stage}`)"))]
    ClientStopped { stage: &'static str },
}

impl ChatError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Store { stage, .. }
            | Self::NotSignedIn { stage }
            | Self::NoCounterpart { stage }
            | Self::SendInFlight { stage }
            | Self::ClientStopped { stage } => stage,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
