//! The desktop shell's procedure table, split by domain.

mod apps;
mod system;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use whatif_core::procedure::paths;
use whatif_core::{BridgeError, ProcedureRouter, Result, DESKTOP_MANIFEST};

/// Run filesystem or process work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::Other(format!("Blocking task failed: {}", e)))?
}

/// Build the desktop router and check it against the shared manifest.
///
/// `app_dirs` are the launcher directories scanned by the `apps.*` procedures.
pub fn desktop_router(app_dirs: Vec<PathBuf>) -> Result<ProcedureRouter> {
    let dirs = Arc::new(app_dirs);
    let installed_dirs = Arc::clone(&dirs);
    let get_dirs = Arc::clone(&dirs);
    let launch_dirs = Arc::clone(&dirs);
    let watch_dirs = Arc::clone(&dirs);

    let router = ProcedureRouter::builder()
        .query(paths::HEALTH_CHECK, system::health_check)
        .query(paths::SYSTEM_INFO, system::info)
        .subscription(paths::SYSTEM_TICKS, system::ticks)
        .query(paths::APPS_INSTALLED, move |_: ()| {
            apps::installed(Arc::clone(&installed_dirs))
        })
        .query(paths::APPS_GET, move |input: apps::AppIdInput| {
            apps::get(Arc::clone(&get_dirs), input)
        })
        .mutation(paths::APPS_LAUNCH, move |input: apps::AppIdInput| {
            apps::launch(Arc::clone(&launch_dirs), input)
        })
        .subscription(paths::APPS_ON_CHANGE, move |_: ()| {
            apps::on_change(Arc::clone(&watch_dirs))
        })
        .build()?;

    router.validate(DESKTOP_MANIFEST)?;
    info!(
        "Desktop procedures ready ({} procedures, {} app directories)",
        router.len(),
        dirs.len()
    );
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatif_core::{ProcedureKind, RichValue};

    #[test]
    fn test_router_matches_manifest() {
        let router = desktop_router(Vec::new()).unwrap();
        assert_eq!(router.len(), DESKTOP_MANIFEST.len());
        assert_eq!(
            router.kind_of(paths::APPS_ON_CHANGE),
            Some(ProcedureKind::Subscription)
        );
    }

    #[tokio::test]
    async fn test_health_check_returns_ok() {
        let router = desktop_router(Vec::new()).unwrap();
        let out = router
            .call(ProcedureKind::Query, paths::HEALTH_CHECK, RichValue::Undefined)
            .await
            .unwrap();
        assert_eq!(out, RichValue::from("ok"));
    }
}
