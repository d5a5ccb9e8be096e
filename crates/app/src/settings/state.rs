use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_chat::PLACEHOLDER_DISPLAY_NAME;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "parley.db";
pub const ENV_PREFIX: &str = "PARLEY_";
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_THREAD_PAGE_HINT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
    /// Most recent messages printed when a thread opens.
    #[serde(default = "default_thread_page_hint")]
    pub thread_page_hint: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_filter: default_log_filter(),
            placeholder_name: default_placeholder_name(),
            thread_page_hint: default_thread_page_hint(),
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.database_path = if self.database_path.trim().is_empty() {
            default_database_path()
        } else {
            self.database_path.trim().to_string()
        };
        self.log_filter = if self.log_filter.trim().is_empty() {
            default_log_filter()
        } else {
            self.log_filter.trim().to_string()
        };
        self.placeholder_name = if self.placeholder_name.trim().is_empty() {
            default_placeholder_name()
        } else {
            self.placeholder_name.trim().to_string()
        };
        if self.thread_page_hint == 0 {
            self.thread_page_hint = default_thread_page_hint();
        }

        self
    }
}

/// Where the startup settings came from. Logged once tracing is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    MissingFile,
    File,
    /// The merged sources did not parse; defaults are in effect.
    Rejected { details: String },
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
    source: SettingsSource,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let (settings, source) = Self::load_from_sources(&config_path, true);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
            source,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn source(&self) -> &SettingsSource {
        &self.source
    }

    pub fn log_source(&self) {
        match &self.source {
            SettingsSource::MissingFile => {
                tracing::info!("settings file not found at {:?}, using defaults", self.config_path);
            }
            SettingsSource::File => {
                tracing::info!("settings loaded from {:?}", self.config_path);
            }
            SettingsSource::Rejected { details } => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    self.config_path,
                    details
                );
            }
        }
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file, then `PARLEY_*` environment variables.
    fn load_from_sources(path: &Path, with_env: bool) -> (AppSettings, SettingsSource) {
        let mut figment = Figment::from(Serialized::defaults(AppSettings::default()));
        let mut source = SettingsSource::MissingFile;
        if path.exists() {
            figment = figment.merge(Json::file(path));
            source = SettingsSource::File;
        }
        if with_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX));
        }

        match figment.extract::<AppSettings>() {
            Ok(settings) => (settings.normalized(), source),
            Err(error) => (
                AppSettings::default(),
                SettingsSource::Rejected {
                    details: error.to_string(),
                },
            ),
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".parley"))
        .join(DATABASE_FILE_NAME)
        .display()
        .to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_placeholder_name() -> String {
    PLACEHOLDER_DISPLAY_NAME.to_string()
}

fn default_thread_page_hint() -> usize {
    DEFAULT_THREAD_PAGE_HINT
}
