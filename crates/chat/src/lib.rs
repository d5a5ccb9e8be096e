#![deny(unsafe_code)]

//! Conversation synchronization for a two-party messaging client.
//!
//! Derives a per-user conversation list and a live message thread from a [`Backend`] and
//! keeps both consistent with the store's change feed. [`ChatClient`] is the only place
//! where state changes; everything it owns is plain data.
//!
//! [`Backend`]: parley_storage::Backend

pub mod client;
pub mod composer;
pub mod conversation;
pub mod error;
pub mod events;
pub mod profile;
pub mod session;
pub mod state;
pub mod stream;

pub use client::{ChatClient, ChatHandle, ClientOptions};
pub use composer::{Composer, OutgoingMessage, SubmitOutcome};
pub use conversation::{Conversation, ConversationIndex, ReadMarks};
pub use error::{ChatError, ChatResult};
pub use events::{ClientCommand, ClientEvent, GateView, Notice, NoticeLevel, ThreadView};
pub use profile::{PLACEHOLDER_DISPLAY_NAME, ProfileResolver, UserIdentity};
pub use session::{GateState, SessionContext, SessionEpoch, SessionGate};
pub use state::ChatState;
pub use stream::{MessageStream, PairKey};
