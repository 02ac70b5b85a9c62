//! System stats collection.
//!
//! The dispatch core only relies on [`StatsProvider::gather`]. The bundled
//! [`HostStatsCollector`] reads a handful of `/proc` files and caches the last
//! snapshot so frequent hub polls stay cheap.

use std::fs;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Source of system stats snapshots.
pub trait StatsProvider: Send + Sync {
    /// Return a snapshot no older than `max_cache_age_ms` (0 = always fresh).
    ///
    /// Never fails; unreadable sources contribute zero values.
    fn gather(&self, max_cache_age_ms: u64) -> SystemStats;
}

/// Point-in-time host statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    /// When the snapshot was taken.
    pub collected_at: DateTime<Utc>,
    /// Host name.
    pub hostname: String,
    /// Seconds since boot.
    pub uptime_secs: u64,
    /// Number of logical CPUs.
    pub cpu_count: usize,
    /// 1, 5 and 15 minute load averages.
    pub load_avg: [f64; 3],
    /// Total memory in KiB.
    pub mem_total_kib: u64,
    /// Available memory in KiB.
    pub mem_available_kib: u64,
}

impl SystemStats {
    /// Percentage of memory in use.
    pub fn mem_used_percent(&self) -> f64 {
        if self.mem_total_kib == 0 {
            return 0.0;
        }
        let used = self.mem_total_kib.saturating_sub(self.mem_available_kib) as f64;
        used / self.mem_total_kib as f64 * 100.0
    }
}

/// Reads host stats from procfs, caching the most recent snapshot.
#[derive(Debug, Default)]
pub struct HostStatsCollector {
    cache: Mutex<Option<(Instant, SystemStats)>>,
}

impl HostStatsCollector {
    /// Create a collector with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn collect() -> SystemStats {
        let start = Instant::now();
        let (mem_total_kib, mem_available_kib) = fs::read_to_string("/proc/meminfo")
            .map(|s| parse_meminfo(&s))
            .unwrap_or_default();
        let stats = SystemStats {
            collected_at: Utc::now(),
            hostname: hostname(),
            uptime_secs: fs::read_to_string("/proc/uptime")
                .ok()
                .and_then(|s| parse_uptime(&s))
                .unwrap_or_default(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            load_avg: fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|s| parse_loadavg(&s))
                .unwrap_or_default(),
            mem_total_kib,
            mem_available_kib,
        };
        debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            "collected system stats"
        );
        stats
    }
}

impl StatsProvider for HostStatsCollector {
    fn gather(&self, max_cache_age_ms: u64) -> SystemStats {
        let max_age = Duration::from_millis(max_cache_age_ms);
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some((taken, stats)) = cache.as_ref() {
            if max_cache_age_ms > 0 && taken.elapsed() <= max_age {
                trace!(age_ms = taken.elapsed().as_millis() as u64, "serving cached stats");
                return stats.clone();
            }
        }

        let stats = Self::collect();
        *cache = Some((Instant::now(), stats.clone()));
        stats
    }
}

/// Best-effort host name.
pub fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| fs::read_to_string("/etc/hostname"))
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn parse_loadavg(s: &str) -> Option<[f64; 3]> {
    let mut fields = s.split_whitespace().map(|f| f.parse::<f64>());
    Some([
        fields.next()?.ok()?,
        fields.next()?.ok()?,
        fields.next()?.ok()?,
    ])
}

fn parse_uptime(s: &str) -> Option<u64> {
    let secs: f64 = s.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

fn parse_meminfo(s: &str) -> (u64, u64) {
    let mut total = 0;
    let mut available = 0;
    for line in s.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let value = value.parse().unwrap_or(0);
        match key {
            "MemTotal:" => total = value,
            "MemAvailable:" => available = value,
            _ => {}
        }
    }
    (total, available)
}
