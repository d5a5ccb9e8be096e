use tracing_subscriber::EnvFilter;

use crate::error::{AppResult, InitLoggingSnafu};

/// Installs the global fmt subscriber on stderr so logs never interleave with the chat surface.
///
/// `RUST_LOG` wins over `configured_filter`; an invalid filter falls back to `info`.
pub fn init_tracing(configured_filter: &str) -> AppResult<()> {
    let (filter, rejected) = resolve_filter(configured_filter);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|error| {
            InitLoggingSnafu {
                stage: "install-subscriber",
                details: error.to_string(),
            }
            .build()
        })?;

    if let Some(rejected) = rejected {
        tracing::warn!(filter = %rejected, "invalid log filter in settings; using info");
    }
    Ok(())
}

fn resolve_filter(configured_filter: &str) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }

    match EnvFilter::try_new(configured_filter) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new("info"), Some(configured_filter.to_string())),
    }
}
