//! Host information reported to the storefront.

use crate::codec::RichValue;
use crate::platform::current_platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Snapshot returned by `system.info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub platform: String,
    pub arch: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    pub cpu_count: usize,
    /// Bytes.
    pub total_memory: u64,
    /// Bytes.
    pub used_memory: u64,
    pub boot_time: DateTime<Utc>,
}

impl SystemInfo {
    /// Collect a fresh snapshot.
    pub fn collect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let boot_time = i64::try_from(System::boot_time())
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Self {
            platform: current_platform().to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: System::host_name(),
            os_version: System::long_os_version(),
            cpu_count: sys.cpus().len(),
            total_memory: sys.total_memory(),
            used_memory: sys.used_memory(),
            boot_time,
        }
    }
}

impl From<SystemInfo> for RichValue {
    fn from(info: SystemInfo) -> Self {
        RichValue::object([
            ("platform", RichValue::from(info.platform)),
            ("arch", RichValue::from(info.arch)),
            ("hostname", RichValue::from(info.hostname)),
            ("osVersion", RichValue::from(info.os_version)),
            ("cpuCount", RichValue::from(info.cpu_count as u64)),
            ("totalMemory", RichValue::from(info.total_memory)),
            ("usedMemory", RichValue::from(info.used_memory)),
            ("bootTime", RichValue::from(info.boot_time)),
        ])
    }
}

/// One event of the `system.ticks` subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub seq: u64,
    pub at: DateTime<Utc>,
}

impl Tick {
    pub fn now(seq: u64) -> Self {
        Self { seq, at: Utc::now() }
    }
}

impl From<Tick> for RichValue {
    fn from(tick: Tick) -> Self {
        RichValue::object([
            ("seq", RichValue::from(tick.seq)),
            ("at", RichValue::from(tick.at)),
        ])
    }
}
