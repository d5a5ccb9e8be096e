#![deny(unsafe_code)]

/// Terminal front end for the parley chat client.
///
/// Loads settings, installs logging and runs a line-oriented auth prompt and chat surface
/// over the local SQLite backend.
pub mod app;
pub mod error;
pub mod logging;
/// Settings persistence.
pub mod settings;
pub mod terminal;

pub use error::{AppError, AppResult};
