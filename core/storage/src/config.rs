use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How append-style fields are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendMode {
    /// Whole accumulated text lives in the `events` column.
    Delimited,
    /// Base value in the `events` column, each appended value in `event_values`.
    #[default]
    ValueTable,
}

impl AppendMode {
    /// Value kept in `PRAGMA user_version` for stores laid out in this mode.
    pub(crate) fn schema_tag(self) -> i64 {
        match self {
            AppendMode::Delimited => 1,
            AppendMode::ValueTable => 2,
        }
    }

    pub(crate) fn from_schema_tag(tag: i64) -> Option<AppendMode> {
        match tag {
            1 => Some(AppendMode::Delimited),
            2 => Some(AppendMode::ValueTable),
            _ => None,
        }
    }
}

/// Location and behaviour of the journal store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub append_mode: AppendMode,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_path() -> PathBuf {
    PathBuf::from("database").join("chill_base.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            append_mode: AppendMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Default file layout (`database/chill_base.db`) under a deployment directory.
    pub fn under<P: AsRef<Path>>(base_dir: P) -> Self {
        Self::new(base_dir.as_ref().join(default_path()))
    }

    pub fn with_append_mode(mut self, append_mode: AppendMode) -> Self {
        self.append_mode = append_mode;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
