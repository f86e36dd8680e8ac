//! Path exclusion and node classification.

use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::error::{Result, WatchdogError};
use crate::event::NodeType;

/// Compiled exclusion patterns of one watched tree.
///
/// Patterns are matched against the full path string as reported by the
/// notifier; a single match excludes the path.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
}

impl ExcludeSet {
    /// Compile the given patterns, failing on the first invalid one.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|source| WatchdogError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// Check if a path should be excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.patterns.iter().any(|re| re.is_match(&path_str))
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Classify a modified path by inspecting it on disk.
///
/// Failures are logged and reported as [`NodeType::Unknown`].
pub async fn classify(path: &Path) -> NodeType {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => NodeType::Directory,
        Ok(_) => NodeType::File,
        Err(e) => {
            warn!("Cannot stat {}: {e}", path.display());
            NodeType::Unknown
        }
    }
}

/// Whether anything, dangling symlinks included, exists at `path`.
pub async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}
