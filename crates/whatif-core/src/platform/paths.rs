//! Platform-specific application directories.

use std::path::PathBuf;

/// Directories scanned for installed applications, highest precedence first.
///
/// # Platform Behavior
/// - **Linux**: `$XDG_DATA_HOME/applications`, then each `$XDG_DATA_DIRS`
///   entry's `applications` (default `/usr/local/share:/usr/share`)
/// - **macOS**: `/Applications`, `~/Applications`
/// - **Windows**: per-user and all-users Start Menu `Programs` folders
pub fn application_dirs() -> Vec<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let mut dirs_found = Vec::new();
        if let Some(data_home) = dirs::data_dir() {
            dirs_found.push(data_home.join("applications"));
        }
        let data_dirs = std::env::var("XDG_DATA_DIRS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
        for dir in data_dirs.split(':').filter(|d| !d.is_empty()) {
            dirs_found.push(PathBuf::from(dir).join("applications"));
        }
        dedup(dirs_found)
    }

    #[cfg(target_os = "macos")]
    {
        let mut dirs_found = vec![PathBuf::from("/Applications")];
        if let Some(home) = dirs::home_dir() {
            dirs_found.push(home.join("Applications"));
        }
        dirs_found
    }

    #[cfg(target_os = "windows")]
    {
        let mut dirs_found = Vec::new();
        if let Some(data_dir) = dirs::data_dir() {
            dirs_found.push(start_menu_programs(data_dir));
        }
        if let Ok(program_data) = std::env::var("ProgramData") {
            dirs_found.push(start_menu_programs(PathBuf::from(program_data)));
        }
        dirs_found
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        Vec::new()
    }
}

#[cfg(target_os = "windows")]
fn start_menu_programs(base: PathBuf) -> PathBuf {
    base.join("Microsoft")
        .join("Windows")
        .join("Start Menu")
        .join("Programs")
}

#[cfg(target_os = "linux")]
fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_linux_dirs_end_in_applications() {
        let found = application_dirs();
        assert!(!found.is_empty());
        assert!(found.iter().all(|p| p.ends_with("applications")));
    }
}
