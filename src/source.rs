//! Items and where they come from.
//!
//! Every source hands items out sorted by identifier, so the run order is
//! stable regardless of directory listing order or file layout.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Payload key that `key:value` records store their value under.
pub const PASSWORD_FIELD: &str = "password";

/// Payload key holding an installer's full path.
pub const PATH_FIELD: &str = "path";

/// One unit of work advanced through a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, String>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

/// Sort by identifier. Duplicate identifiers keep only their first entry,
/// since an item can be recorded only once.
pub fn sort_items(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by(|a, b| a.id.cmp(&b.id));
    items.dedup_by(|later, earlier| later.id == earlier.id);
    items
}

/// Enumerates the current items.
pub trait ItemSource: Send {
    fn list(&self) -> Result<Vec<Item>>;

    /// Point the source at a new location. Sources without a location
    /// ignore this.
    fn relocate(&mut self, _location: PathBuf) {}

    fn describe(&self) -> String;
}

/// A fixed list of items, e.g. built in code.
#[derive(Debug, Clone, Default)]
pub struct FixedSource {
    items: Vec<Item>,
}

impl FixedSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }
}

impl ItemSource for FixedSource {
    fn list(&self) -> Result<Vec<Item>> {
        Ok(sort_items(self.items.clone()))
    }

    fn describe(&self) -> String {
        format!("{} fixed item(s)", self.items.len())
    }
}

/// Installer files in a folder, filtered by extension.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extensions: vec!["exe".to_string(), "msi".to_string()],
        }
    }

    /// Replace the extension filter. Leading dots are optional, matching is
    /// case-insensitive.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

impl ItemSource for DirectorySource {
    fn list(&self) -> Result<Vec<Item>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !self.accepts(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                items.push(Item::new(name).with_field(PATH_FIELD, path.to_string_lossy()));
            }
        }

        Ok(sort_items(items))
    }

    fn relocate(&mut self, location: PathBuf) {
        log::info!(
            "Item folder moved: {} -> {}",
            self.dir.display(),
            location.display()
        );
        self.dir = location;
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Line-delimited account records.
///
/// `id:secret` lines yield an item with a `password` field; plain lines yield
/// an id only. Blank lines are ignored.
#[derive(Debug, Clone)]
pub struct RecordFileSource {
    path: PathBuf,
}

impl RecordFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(content: &str) -> Vec<Item> {
        let items = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once(':') {
                Some((id, secret)) => {
                    Item::new(id.trim()).with_field(PASSWORD_FIELD, secret.trim())
                }
                None => Item::new(line),
            })
            .collect();
        sort_items(items)
    }
}

impl ItemSource for RecordFileSource {
    fn list(&self) -> Result<Vec<Item>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(Self::parse(&content))
    }

    fn relocate(&mut self, location: PathBuf) {
        self.path = location;
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Publish changes of `path`'s resolved location on a watch channel.
///
/// The spawned task is the channel's only writer. It re-resolves `path`
/// every `every`, so a repointed symlink shows up as a new location.
pub fn spawn_location_observer(
    path: PathBuf,
    every: Duration,
) -> (JoinHandle<()>, watch::Receiver<PathBuf>) {
    let initial = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
    let (tx, rx) = watch::channel(initial);

    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            if tx.is_closed() {
                break;
            }
            let resolved = match tokio::fs::canonicalize(&path).await {
                Ok(resolved) => resolved,
                Err(_) => continue,
            };
            let changed = tx.send_if_modified(|current| {
                if *current != resolved {
                    *current = resolved.clone();
                    true
                } else {
                    false
                }
            });
            if changed {
                log::debug!("Source location now {}", resolved.display());
            }
        }
    });

    (handle, rx)
}
