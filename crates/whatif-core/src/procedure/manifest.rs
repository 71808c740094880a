//! The desktop shell's procedure surface, shared by client and server.

use super::ProcedureKind;

/// One declared procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureSpec {
    pub path: &'static str,
    pub kind: ProcedureKind,
}

impl ProcedureSpec {
    pub const fn new(path: &'static str, kind: ProcedureKind) -> Self {
        Self { path, kind }
    }
}

/// Procedure paths.
pub mod paths {
    pub const HEALTH_CHECK: &str = "healthCheck";
    pub const APPS_INSTALLED: &str = "apps.installed";
    pub const APPS_GET: &str = "apps.get";
    pub const APPS_LAUNCH: &str = "apps.launch";
    pub const APPS_ON_CHANGE: &str = "apps.onChange";
    pub const SYSTEM_INFO: &str = "system.info";
    pub const SYSTEM_TICKS: &str = "system.ticks";
}

/// Every procedure the desktop bridge must serve.
pub const DESKTOP_MANIFEST: &[ProcedureSpec] = &[
    ProcedureSpec::new(paths::HEALTH_CHECK, ProcedureKind::Query),
    ProcedureSpec::new(paths::APPS_INSTALLED, ProcedureKind::Query),
    ProcedureSpec::new(paths::APPS_GET, ProcedureKind::Query),
    ProcedureSpec::new(paths::APPS_LAUNCH, ProcedureKind::Mutation),
    ProcedureSpec::new(paths::APPS_ON_CHANGE, ProcedureKind::Subscription),
    ProcedureSpec::new(paths::SYSTEM_INFO, ProcedureKind::Query),
    ProcedureSpec::new(paths::SYSTEM_TICKS, ProcedureKind::Subscription),
];

/// Look up the declared kind of a path.
pub fn declared_kind(manifest: &[ProcedureSpec], path: &str) -> Option<ProcedureKind> {
    manifest.iter().find(|p| p.path == path).map(|p| p.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_manifest_paths_unique() {
        let unique: HashSet<_> = DESKTOP_MANIFEST.iter().map(|p| p.path).collect();
        assert_eq!(unique.len(), DESKTOP_MANIFEST.len());
    }

    #[test]
    fn test_health_check_is_query() {
        assert_eq!(
            declared_kind(DESKTOP_MANIFEST, paths::HEALTH_CHECK),
            Some(ProcedureKind::Query)
        );
        assert_eq!(declared_kind(DESKTOP_MANIFEST, "nope"), None);
    }
}
