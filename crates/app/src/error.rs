use parley_chat::ChatError;
use parley_storage::StoreError;
use snafu::Snafu;

use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to install log subscriber on `{stage}`: {details}"))]
    InitLogging {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to open message store at '{location}': {source}"))]
    OpenStore {
        stage: &'static str,
        location: String,
        source: StoreError,
    },
    #[snafu(display("failed to read terminal input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("chat client unavailable on `{stage}`: {source}"))]
    Client {
        stage: &'static str,
        source: ChatError,
    },
}

pub type AppResult<T> = Result<T, AppError>;
