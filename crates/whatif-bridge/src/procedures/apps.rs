//! `apps.*` procedures.

use super::blocking;
use futures::Stream;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use whatif_core::platform::{find_app, launch_app, scan_installed_apps};
use whatif_core::{AppDirWatcher, InstalledApp, LaunchOutcome, Result};

type Dirs = Arc<Vec<PathBuf>>;

#[derive(Debug, Deserialize)]
pub struct AppIdInput {
    pub id: String,
}

async fn scan(dirs: Dirs) -> Result<Vec<InstalledApp>> {
    blocking(move || Ok(scan_installed_apps(&dirs))).await
}

pub async fn installed(dirs: Dirs) -> Result<Vec<InstalledApp>> {
    scan(dirs).await
}

pub async fn get(dirs: Dirs, input: AppIdInput) -> Result<InstalledApp> {
    blocking(move || find_app(&dirs, &input.id)).await
}

pub async fn launch(dirs: Dirs, input: AppIdInput) -> Result<LaunchOutcome> {
    blocking(move || {
        let app = find_app(&dirs, &input.id)?;
        launch_app(&app)
    })
    .await
}

struct ChangeFeed {
    watcher: AppDirWatcher,
    dirs: Dirs,
    pending: Option<Vec<InstalledApp>>,
}

/// Current app list first, then a fresh list after every settled change.
pub async fn on_change(dirs: Dirs) -> Result<impl Stream<Item = Result<Vec<InstalledApp>>>> {
    let watcher = AppDirWatcher::new(&dirs)?;
    let initial = scan(Arc::clone(&dirs)).await?;
    let feed = ChangeFeed {
        watcher,
        dirs,
        pending: Some(initial),
    };

    Ok(futures::stream::unfold(feed, |mut feed| async move {
        if let Some(apps) = feed.pending.take() {
            return Some((Ok(apps), feed));
        }
        feed.watcher.changed().await?;
        debug!("Rescanning application directories");
        let apps = scan(Arc::clone(&feed.dirs)).await;
        Some((apps, feed))
    }))
}
