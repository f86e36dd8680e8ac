//! Configuration types for the watchdog.
//!
//! The configuration lives in `configuration.yaml` inside the configuration
//! directory:
//!
//! ```yaml
//! current dir: /home/user/work
//! kill delay ms: 100
//! watched dirs:
//!   - root: project
//!     agglomeration ms: "20"
//!     excludes:
//!       - /\.git(/|$)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WatchdogError};
use crate::filter::ExcludeSet;

/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "configuration.yaml";

/// Debounce window used when a tree does not set `agglomeration ms`.
pub const DEFAULT_AGGLOMERATION: Duration = Duration::from_millis(10);

/// Grace period between SIGTERM and SIGKILL when `kill delay ms` is unset.
pub const DEFAULT_KILL_DELAY: Duration = Duration::from_millis(100);

/// Validated watchdog configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Directory the process switches to; script arguments are relative to it.
    pub current_dir: PathBuf,

    /// Grace period before a running child is killed on shutdown.
    pub kill_delay: Duration,

    /// Trees to watch, one pipeline each.
    pub trees: Vec<TreeConfig>,
}

impl Configuration {
    /// Read and validate `configuration.yaml` from `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        let text = std::fs::read_to_string(&path)
            .map_err(|source| WatchdogError::ConfigRead { path, source })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: RawConfiguration = serde_yaml::from_str(text)?;

        if raw.current_dir.trim().is_empty() {
            return Err(WatchdogError::Config("\"current dir\" is missing".to_string()));
        }
        if raw.watched_dirs.is_empty() {
            return Err(WatchdogError::Config("\"watched dirs\" is empty".to_string()));
        }

        let kill_delay = match raw.kill_delay {
            Some(value) => value.to_duration("kill delay ms")?,
            None => None,
        };

        let trees = raw
            .watched_dirs
            .into_iter()
            .map(TreeConfig::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            current_dir: PathBuf::from(raw.current_dir),
            kill_delay: kill_delay.unwrap_or(DEFAULT_KILL_DELAY),
            trees,
        })
    }
}

/// Configuration for one watched tree.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Root of the tree, relative to the current directory or absolute.
    pub root: PathBuf,

    /// Debounce window for coalescing changes into one package.
    pub agglomeration: Duration,

    /// Exclusion patterns, shared read-only with the tree's event watcher.
    pub excludes: Arc<ExcludeSet>,
}

impl TreeConfig {
    /// Create a tree config with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            agglomeration: DEFAULT_AGGLOMERATION,
            excludes: Arc::new(ExcludeSet::default()),
        }
    }

    /// Set the agglomeration window.
    pub fn with_agglomeration(mut self, window: Duration) -> Self {
        self.agglomeration = window;
        self
    }

    /// Set the exclusion patterns.
    pub fn with_excludes(mut self, excludes: ExcludeSet) -> Self {
        self.excludes = Arc::new(excludes);
        self
    }
}

impl TryFrom<RawWatchedDir> for TreeConfig {
    type Error = WatchdogError;

    fn try_from(raw: RawWatchedDir) -> Result<Self> {
        if raw.root.trim().is_empty() {
            return Err(WatchdogError::Config(
                "watched dir without \"root\"".to_string(),
            ));
        }

        let window = match raw.agglomeration {
            Some(value) => value.to_duration("agglomeration ms")?,
            None => None,
        };

        Ok(TreeConfig::new(raw.root)
            .with_agglomeration(window.unwrap_or(DEFAULT_AGGLOMERATION))
            .with_excludes(ExcludeSet::new(raw.excludes)?))
    }
}

#[derive(Debug, Deserialize)]
struct RawConfiguration {
    #[serde(rename = "current dir", default)]
    current_dir: String,

    #[serde(rename = "kill delay ms", default)]
    kill_delay: Option<Millis>,

    #[serde(rename = "watched dirs", default)]
    watched_dirs: Vec<RawWatchedDir>,
}

#[derive(Debug, Deserialize)]
struct RawWatchedDir {
    #[serde(default)]
    root: String,

    #[serde(rename = "agglomeration ms", default)]
    agglomeration: Option<Millis>,

    #[serde(default)]
    excludes: Vec<String>,
}

/// Millisecond values may be written as YAML integers or integer strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Millis {
    Number(u64),
    Text(String),
}

impl Millis {
    /// `None` for an empty string, which means "use the default".
    fn to_duration(&self, key: &'static str) -> Result<Option<Duration>> {
        match self {
            Millis::Number(ms) => Ok(Some(Duration::from_millis(*ms))),
            Millis::Text(text) if text.trim().is_empty() => Ok(None),
            Millis::Text(text) => text
                .trim()
                .parse::<u64>()
                .map(|ms| Some(Duration::from_millis(ms)))
                .map_err(|_| WatchdogError::InvalidMillis {
                    key,
                    value: text.clone(),
                }),
        }
    }
}
