//! Starting installed applications.

use super::apps::{AppSource, InstalledApp};
use crate::codec::RichValue;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info};

/// Result of `apps.launch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOutcome {
    pub launched: bool,
    #[serde(default)]
    pub pid: Option<u32>,
}

impl From<LaunchOutcome> for RichValue {
    fn from(outcome: LaunchOutcome) -> Self {
        RichValue::object([
            ("launched", RichValue::from(outcome.launched)),
            ("pid", RichValue::from(outcome.pid)),
        ])
    }
}

/// Launch an application detached from the bridge.
///
/// The child is reaped on a background thread so it never lingers as a
/// zombie; the bridge does not track it afterwards.
pub fn launch_app(app: &InstalledApp) -> Result<LaunchOutcome> {
    let argv = command_line(app)?;
    let Some((program, args)) = argv.split_first() else {
        return Err(launch_error(app, "empty command line"));
    };

    debug!("Launching {} with {:?} {:?}", app.id, program, args);
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| launch_error(app, &e.to_string()))?;

    let pid = child.id();
    info!("Launched {} (pid {})", app.name, pid);
    reap(child);

    Ok(LaunchOutcome {
        launched: true,
        pid: Some(pid),
    })
}

fn reap(mut child: Child) {
    std::thread::spawn(move || {
        let _ = child.wait();
    });
}

fn launch_error(app: &InstalledApp, message: &str) -> BridgeError {
    BridgeError::LaunchFailed {
        app: app.id.clone(),
        message: message.to_string(),
    }
}

fn command_line(app: &InstalledApp) -> Result<Vec<String>> {
    let path = app.path.to_string_lossy().into_owned();
    match app.source {
        AppSource::DesktopEntry => {
            let exec = app
                .exec
                .as_deref()
                .ok_or_else(|| launch_error(app, "desktop entry has no Exec key"))?;
            Ok(strip_field_codes(split_exec(exec)))
        }
        AppSource::AppBundle => Ok(vec!["open".into(), "-a".into(), path]),
        AppSource::Shortcut => Ok(vec![
            "cmd".into(),
            "/C".into(),
            "start".into(),
            String::new(),
            path,
        ]),
    }
}

/// Remove desktop-entry field codes (`%f`, `%U`, ...) from each argument.
/// `%%` becomes `%`. An argument that was only field codes is dropped.
pub fn strip_field_codes(argv: Vec<String>) -> Vec<String> {
    argv.into_iter()
        .filter_map(|arg| {
            let stripped = strip_arg(&arg);
            if stripped.is_empty() && !arg.is_empty() {
                None
            } else {
                Some(stripped)
            }
        })
        .collect()
}

fn strip_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut chars = arg.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if let Some('%') = chars.next() {
            out.push('%');
        }
    }
    out
}

/// Split an `Exec` value into argv, honouring double quotes and backslash
/// escapes inside them.
pub fn split_exec(exec: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = exec.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}
