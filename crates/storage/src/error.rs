use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("store row '{table}' with id '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        table: &'static str,
        id: String,
    },
    #[snafu(display("store conflict for '{table}': {details}"))]
    Conflict {
        stage: &'static str,
        table: &'static str,
        details: String,
    },
    #[snafu(display("store id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("rejected row for '{table}': {details}"))]
    InvalidRow {
        stage: &'static str,
        table: &'static str,
        details: String,
    },
    #[snafu(display("invalid credentials for '{email}'"))]
    InvalidCredentials { stage: &'static str, email: String },
    #[snafu(display("store is unavailable on `{stage}`: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("store invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to create sqlite directory at {path}"))]
    CreateSqliteDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse sqlite connection URL '{database_url}'"))]
    SqliteConnectOptions {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to connect sqlite database '{database_url}'"))]
    SqliteConnect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to run sqlite migrations"))]
    SqliteMigrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
}

impl StoreError {
    /// Pipeline stage that produced the error, for log correlation.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::NotFound { stage, .. }
            | Self::Conflict { stage, .. }
            | Self::InvalidId { stage, .. }
            | Self::InvalidRow { stage, .. }
            | Self::InvalidCredentials { stage, .. }
            | Self::Unavailable { stage, .. }
            | Self::InvariantViolation { stage, .. }
            | Self::CreateSqliteDirectory { stage, .. }
            | Self::SqliteConnectOptions { stage, .. }
            | Self::SqliteConnect { stage, .. }
            | Self::SqliteMigrate { stage, .. }
            | Self::SqliteQuery { stage, .. } => stage,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
