//! Platform abstraction layer for the desktop shell.
//!
//! Everything that looks at the local OS lives here so that `#[cfg]` blocks
//! stay in one place.
//!
//! - `paths` - where each OS keeps its application launchers
//! - `apps` - installed-application enumeration
//! - `launch` - starting an installed application
//! - `watch` - change notifications for the application directories

pub mod apps;
pub mod launch;
pub mod paths;
pub mod watch;

pub use apps::{find_app, scan_installed_apps, AppSource, InstalledApp};
pub use launch::{launch_app, LaunchOutcome};
pub use paths::application_dirs;
pub use watch::AppDirWatcher;

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_platform() {
        let platform = current_platform();
        assert!(["linux", "windows", "macos", "unknown"].contains(&platform));
    }
}
