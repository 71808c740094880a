//! Change notifications for application directories.

use crate::config::StreamConfig;
use crate::error::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Watches launcher directories and reports debounced changes.
///
/// Directories that do not exist when the watcher is created are skipped.
pub struct AppDirWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
    watched: Vec<PathBuf>,
}

impl AppDirWatcher {
    /// Start watching `dirs` with the default debounce window.
    pub fn new(dirs: &[PathBuf]) -> Result<Self> {
        Self::with_debounce(dirs, StreamConfig::WATCH_DEBOUNCE)
    }

    pub fn with_debounce(dirs: &[PathBuf], debounce: Duration) -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event.kind) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!("Application directory watch error: {}", e),
        })?;

        let mut watched = Vec::new();
        for dir in dirs.iter().filter(|d| d.is_dir()) {
            watcher.watch(dir, RecursiveMode::Recursive)?;
            watched.push(dir.clone());
        }
        info!("Watching {} application directories", watched.len());

        Ok(Self {
            _watcher: watcher,
            events,
            debounce,
            watched,
        })
    }

    /// Directories actually being watched.
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Wait for the next burst of changes to settle.
    ///
    /// Returns `None` once the underlying watcher has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.events.recv().await?;
        loop {
            match tokio::time::timeout(self.debounce, self.events.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return None,
                Err(_) => break,
            }
        }
        debug!("Application directories changed");
        Some(())
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_dirs_are_not_watched() {
        let temp = TempDir::new().unwrap();
        let watcher = AppDirWatcher::new(&[
            temp.path().to_path_buf(),
            PathBuf::from("/definitely/not/here"),
        ])
        .unwrap();
        assert_eq!(watcher.watched(), &[temp.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_new_launcher_is_reported() {
        let temp = TempDir::new().unwrap();
        let mut watcher =
            AppDirWatcher::with_debounce(&[temp.path().to_path_buf()], Duration::from_millis(50))
                .unwrap();

        std::fs::write(
            temp.path().join("new.desktop"),
            "[Desktop Entry]\nName=New\nType=Application\n",
        )
        .unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(10), watcher.changed())
            .await
            .expect("no change reported");
        assert_eq!(changed, Some(()));
    }
}
