//! Inbox watcher
//!
//! Polls the inbox and diffs each scan against the previous one. A file is
//! known by its path together with its size and modification time, so a name
//! that reappears after being routed away is a new arrival. Files that leave
//! the inbox are simply forgotten.

use crate::dispatcher::{DispatchError, Submitter};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub inbox: PathBuf,
    pub poll_interval: Duration,
    /// Submit only once two consecutive scans agree on size and mtime
    pub settle: bool,
    /// Submit files already present on the first scan
    pub process_existing: bool,
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("lost watch on {}: {source}", path.display())]
    Lost {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dispatcher stopped accepting files")]
    DispatcherClosed,
}

impl From<DispatchError> for WatchError {
    fn from(_: DispatchError) -> Self {
        WatchError::DispatcherClosed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Identity {
    size: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    /// Observed but still settling
    Pending(Identity),
    /// Already handed out (or deliberately skipped)
    Submitted(Identity),
}

pub struct Watcher {
    config: WatchConfig,
    known: HashMap<PathBuf, Seen>,
    /// Put back into the inbox at startup; never skipped as pre-existing
    recovered: HashSet<PathBuf>,
    scans: u64,
}

impl Watcher {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            known: HashMap::new(),
            recovered: HashSet::new(),
            scans: 0,
        }
    }

    /// Treat `paths` as new arrivals even when pre-existing files are skipped
    pub fn with_recovered(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.recovered.extend(paths);
        self
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Scan the inbox once and return the files ready for submission
    ///
    /// The returned paths are sorted for stable submission order.
    pub async fn scan(&mut self) -> Result<Vec<PathBuf>, WatchError> {
        let current = list_candidates(&self.config.inbox).await?;
        let first = self.scans == 0;
        self.scans += 1;

        self.known.retain(|path, _| current.contains_key(path));

        let mut ready = Vec::new();
        for (path, identity) in current {
            let next = match self.known.get(&path) {
                _ if first
                    && !self.config.process_existing
                    && !self.recovered.contains(&path) =>
                {
                    debug!(path = %path.display(), "Skipping pre-existing file");
                    Seen::Submitted(identity)
                },
                Some(Seen::Submitted(prev)) if *prev == identity => continue,
                Some(Seen::Pending(prev)) if *prev == identity => {
                    ready.push(path.clone());
                    Seen::Submitted(identity)
                },
                _ if self.config.settle => Seen::Pending(identity),
                _ => {
                    ready.push(path.clone());
                    Seen::Submitted(identity)
                },
            };
            self.known.insert(path, next);
        }

        if first {
            self.recovered.clear();
        }

        ready.sort();
        Ok(ready)
    }

    /// Scan until cancelled, submitting each new file
    ///
    /// Returns an error when the inbox becomes unreadable or the dispatcher
    /// closes; both end the daemon.
    pub async fn run(
        mut self,
        submitter: Submitter,
        cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            inbox = %self.config.inbox.display(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            settle = self.config.settle,
            "Watching inbox"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            for path in self.scan().await? {
                info!(path = %path.display(), "Detected new file");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    submitted = submitter.submit(path) => submitted?,
                }
            }
        }

        info!("Watcher stopped");
        Ok(())
    }
}

/// Regular files directly inside `dir`, minus hidden and in-progress names
async fn list_candidates(dir: &Path) -> Result<HashMap<PathBuf, Identity>, WatchError> {
    let lost = |source| WatchError::Lost {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(lost)?;
    let mut found = HashMap::new();

    while let Some(entry) = entries.next_entry().await.map_err(lost)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(path = %entry.path().display(), "Ignoring file with non UTF-8 name");
            continue;
        };
        if is_ignored(name) {
            continue;
        }

        // Vanished between listing and stat: a claim in progress.
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        found.insert(
            entry.path(),
            Identity {
                size: metadata.len(),
                modified: metadata.modified().ok(),
            },
        );
    }

    Ok(found)
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".tmp") || name.ends_with(".part")
}
