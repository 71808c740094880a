//! Installed-application enumeration.
//!
//! Three launcher formats are recognised wherever they appear, so a scan of a
//! test directory behaves the same on every OS:
//!
//! - `*.desktop` files (XDG Desktop Entry, Linux)
//! - `*.app` bundles (macOS)
//! - `*.lnk` shortcuts (Windows Start Menu)

use crate::codec::RichValue;
use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Nested launcher folders deeper than this are ignored.
const MAX_SCAN_DEPTH: usize = 4;

/// Where an installed application was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppSource {
    DesktopEntry,
    AppBundle,
    Shortcut,
}

impl AppSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppSource::DesktopEntry => "desktop-entry",
            AppSource::AppBundle => "app-bundle",
            AppSource::Shortcut => "shortcut",
        }
    }
}

/// An application found on the local machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    /// Launcher file stem, unique within one scan.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub exec: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Launcher file or bundle.
    pub path: PathBuf,
    pub source: AppSource,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl From<InstalledApp> for RichValue {
    fn from(app: InstalledApp) -> Self {
        RichValue::object([
            ("id", RichValue::from(app.id)),
            ("name", RichValue::from(app.name)),
            ("exec", RichValue::from(app.exec)),
            ("icon", RichValue::from(app.icon)),
            ("path", RichValue::from(app.path.to_string_lossy().into_owned())),
            ("source", RichValue::from(app.source.as_str())),
            ("modified", RichValue::from(app.modified)),
        ])
    }
}

/// Scan `dirs` in order. When two launchers share an id the one from the
/// earlier directory wins. The result is sorted by name, case-insensitively.
pub fn scan_installed_apps(dirs: &[PathBuf]) -> Vec<InstalledApp> {
    let mut seen = HashSet::new();
    let mut apps = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            debug!("Skipping missing application directory {}", dir.display());
            continue;
        }
        for app in scan_dir(dir) {
            if seen.insert(app.id.clone()) {
                apps.push(app);
            }
        }
    }

    apps.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    apps
}

/// Find one application by id.
pub fn find_app(dirs: &[PathBuf], id: &str) -> Result<InstalledApp> {
    scan_installed_apps(dirs)
        .into_iter()
        .find(|app| app.id == id)
        .ok_or_else(|| BridgeError::AppNotFound { id: id.to_string() })
}

fn scan_dir(dir: &Path) -> Vec<InstalledApp> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(dir)
        .max_depth(MAX_SCAN_DEPTH)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        if entry.file_type().is_dir() {
            if extension.eq_ignore_ascii_case("app") {
                found.push(app_bundle(path));
                walker.skip_current_dir();
            }
            continue;
        }

        let parsed = match extension {
            "desktop" => desktop_entry(path),
            e if e.eq_ignore_ascii_case("lnk") => Some(shortcut(path)),
            _ => None,
        };
        if let Some(app) = parsed {
            found.push(app);
        }
    }

    found
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn app_bundle(path: &Path) -> InstalledApp {
    let stem = file_stem(path);
    InstalledApp {
        id: stem.clone(),
        name: stem,
        exec: None,
        icon: None,
        path: path.to_path_buf(),
        source: AppSource::AppBundle,
        modified: modified_at(path),
    }
}

fn shortcut(path: &Path) -> InstalledApp {
    let stem = file_stem(path);
    InstalledApp {
        id: stem.clone(),
        name: stem,
        exec: None,
        icon: None,
        path: path.to_path_buf(),
        source: AppSource::Shortcut,
        modified: modified_at(path),
    }
}

fn desktop_entry(path: &Path) -> Option<InstalledApp> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    let fields = parse_desktop_entry(&content)?;
    Some(InstalledApp {
        id: file_stem(path),
        name: fields.name,
        exec: fields.exec,
        icon: fields.icon,
        path: path.to_path_buf(),
        source: AppSource::DesktopEntry,
        modified: modified_at(path),
    })
}

/// The subset of a desktop entry the bridge reports.
#[derive(Debug, Clone, PartialEq)]
pub struct DesktopEntryFields {
    pub name: String,
    pub exec: Option<String>,
    pub icon: Option<String>,
}

/// Parse the `[Desktop Entry]` group of a `.desktop` file.
///
/// Returns `None` for entries that should not be listed: non-`Application`
/// types, `Hidden=true`, `NoDisplay=true`, or a missing `Name`. Localised keys
/// (`Name[de]=...`) are ignored.
pub fn parse_desktop_entry(content: &str) -> Option<DesktopEntryFields> {
    let mut in_main_group = false;
    let mut name = None;
    let mut exec = None;
    let mut icon = None;
    let mut entry_type = None;
    let mut hidden = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_main_group = line == "[Desktop Entry]";
            continue;
        }
        if !in_main_group {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Name" => name = Some(value),
            "Exec" => exec = Some(value),
            "Icon" => icon = Some(value),
            "Type" => entry_type = Some(value),
            "Hidden" | "NoDisplay" if value == "true" => hidden = true,
            _ => {}
        }
    }

    if hidden || entry_type.as_deref() != Some("Application") {
        return None;
    }
    Some(DesktopEntryFields {
        name: name.filter(|n| !n.is_empty())?,
        exec: exec.filter(|e| !e.is_empty()),
        icon: icon.filter(|i| !i.is_empty()),
    })
}
