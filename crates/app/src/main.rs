use std::process::ExitCode;

use parley::settings::SettingsStore;
use parley::{app, logging};

#[tokio::main]
async fn main() -> ExitCode {
    // Settings come first: they carry the log filter. How they loaded is logged after.
    let settings = SettingsStore::load();
    if let Err(error) = logging::init_tracing(&settings.settings().log_filter) {
        eprintln!("parley: {error}");
    }
    settings.log_source();

    match app::run(&settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "parley exited with an error");
            eprintln!("parley: {error}");
            ExitCode::FAILURE
        }
    }
}
