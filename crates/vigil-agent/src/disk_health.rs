//! Disk health (SMART) data.
//!
//! [`SmartctlMonitor`] shells out to `smartctl` with JSON output and keeps the
//! last good record per device. A refresh that fails leaves the cache intact,
//! so callers can always fall back to the previous data.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default interval between non-forced refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// smartctl exit status bits that mean the device could not be read at all.
const SMARTCTL_FATAL_BITS: i32 = 0b11;

/// Errors from a disk health refresh.
#[derive(Debug, Error)]
pub enum DiskHealthError {
    /// smartctl could not be executed.
    #[error("failed to run {binary}: {source}")]
    Command {
        /// Binary that was executed
        binary: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// smartctl could not read the device.
    #[error("smartctl failed for {device} (status {status})")]
    Device {
        /// Device path
        device: String,
        /// smartctl exit status
        status: i32,
    },

    /// smartctl output was not the expected JSON.
    #[error("unexpected smartctl output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Health summary of one disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    /// Device path, e.g. `/dev/sda`.
    pub device: String,
    /// smartctl device type, e.g. `sat` or `nvme`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Serial number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Capacity in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<u64>,
    /// Overall SMART self-assessment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    /// Current temperature in Celsius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<i64>,
    /// Power-on hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_on_hours: Option<u64>,
    /// When this record was read.
    pub updated_at: DateTime<Utc>,
}

/// Source of disk health data.
#[async_trait]
pub trait DiskHealth: Send + Sync {
    /// Re-read device data. Without `force`, a recent refresh may be reused.
    async fn refresh(&self, force: bool) -> Result<(), DiskHealthError>;

    /// Latest known record per device.
    fn current_data(&self) -> BTreeMap<String, HealthRecord>;
}

#[derive(Debug, Default)]
struct MonitorState {
    records: BTreeMap<String, HealthRecord>,
    last_refresh: Option<Instant>,
}

/// Disk health monitor backed by `smartctl`.
#[derive(Debug)]
pub struct SmartctlMonitor {
    binary: PathBuf,
    refresh_interval: Duration,
    state: RwLock<MonitorState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SmartctlMonitor {
    /// Create a monitor using `binary` as the smartctl executable.
    pub fn new(binary: impl Into<PathBuf>, refresh_interval: Duration) -> Self {
        Self {
            binary: binary.into(),
            refresh_interval,
            state: RwLock::new(MonitorState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a monitor if `binary` can be executed on this host.
    pub async fn probe(binary: impl Into<PathBuf>, refresh_interval: Duration) -> Option<Self> {
        let binary = binary.into();
        match Command::new(&binary).arg("--version").output().await {
            Ok(out) if out.status.success() => {
                info!(binary = %binary.display(), "disk health monitoring enabled");
                Some(Self::new(binary, refresh_interval))
            }
            Ok(out) => {
                warn!(binary = %binary.display(), status = ?out.status.code(), "smartctl unusable, disk health disabled");
                None
            }
            Err(e) => {
                debug!(binary = %binary.display(), error = %e, "smartctl not found, disk health disabled");
                None
            }
        }
    }

    /// Path of the smartctl binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn is_fresh(&self) -> bool {
        self.read_state(|state| {
            state
                .last_refresh
                .is_some_and(|at| at.elapsed() < self.refresh_interval)
        })
    }

    fn read_state<R>(&self, f: impl FnOnce(&MonitorState) -> R) -> R {
        match self.state.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write_state(&self, f: impl FnOnce(&mut MonitorState)) {
        match self.state.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(i32, Vec<u8>), DiskHealthError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|source| DiskHealthError::Command {
                binary: self.binary.display().to_string(),
                source,
            })?;
        Ok((output.status.code().unwrap_or(-1), output.stdout))
    }

    async fn scan(&self) -> Result<Vec<ScannedDevice>, DiskHealthError> {
        let (_, stdout) = self.run(&["--scan", "-j"]).await?;
        parse_scan(&stdout)
    }

    async fn read_device(&self, device: &ScannedDevice) -> Result<HealthRecord, DiskHealthError> {
        let (status, stdout) = self.run(&device.read_args()).await?;
        if status < 0 || status & SMARTCTL_FATAL_BITS != 0 {
            return Err(DiskHealthError::Device {
                device: device.name.clone(),
                status,
            });
        }
        parse_device(&device.name, &stdout)
    }
}

#[async_trait]
impl DiskHealth for SmartctlMonitor {
    async fn refresh(&self, force: bool) -> Result<(), DiskHealthError> {
        let _guard = self.refresh_lock.lock().await;
        if !force && self.is_fresh() {
            return Ok(());
        }

        let start = Instant::now();
        let devices = match self.scan().await {
            Ok(devices) => devices,
            Err(e) => {
                // A failed scan still counts as an attempt for the interval.
                self.write_state(|state| state.last_refresh = Some(Instant::now()));
                return Err(e);
            }
        };
        let mut updated = BTreeMap::new();
        let mut last_error = None;
        for device in &devices {
            match self.read_device(device).await {
                Ok(record) => {
                    updated.insert(device.name.clone(), record);
                }
                Err(e) => {
                    warn!(device = %device.name, error = %e, "failed to read disk health");
                    last_error = Some(e);
                }
            }
        }

        let all_failed = !devices.is_empty() && updated.is_empty();
        let count = updated.len();
        self.write_state(|state| {
            state.records.extend(updated);
            state.last_refresh = Some(Instant::now());
        });
        debug!(
            devices = devices.len(),
            updated = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "disk health refreshed"
        );

        match last_error {
            Some(e) if all_failed => Err(e),
            _ => Ok(()),
        }
    }

    fn current_data(&self) -> BTreeMap<String, HealthRecord> {
        self.read_state(|state| state.records.clone())
    }
}

// smartctl JSON shapes, reduced to the fields we read

#[derive(Debug, Deserialize)]
struct ScanOutput {
    #[serde(default)]
    devices: Vec<ScannedDevice>,
}

#[derive(Debug, Deserialize)]
struct ScannedDevice {
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl ScannedDevice {
    /// Arguments for `smartctl`, pinning the type reported by the scan.
    fn read_args(&self) -> Vec<&str> {
        let mut args = vec!["-a", "-j"];
        if let Some(kind) = &self.kind {
            args.extend(["-d", kind.as_str()]);
        }
        args.push(&self.name);
        args
    }
}

#[derive(Debug, Default, Deserialize)]
struct DeviceOutput {
    #[serde(default)]
    device: Option<DeviceInfo>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    serial_number: Option<String>,
    #[serde(default)]
    user_capacity: Option<Capacity>,
    #[serde(default)]
    smart_status: Option<SmartStatus>,
    #[serde(default)]
    temperature: Option<Temperature>,
    #[serde(default)]
    power_on_time: Option<PowerOnTime>,
}

#[derive(Debug, Deserialize)]
struct DeviceInfo {
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Capacity {
    bytes: u64,
}

#[derive(Debug, Deserialize)]
struct SmartStatus {
    passed: bool,
}

#[derive(Debug, Deserialize)]
struct Temperature {
    current: i64,
}

#[derive(Debug, Deserialize)]
struct PowerOnTime {
    hours: u64,
}

fn parse_scan(stdout: &[u8]) -> Result<Vec<ScannedDevice>, DiskHealthError> {
    let scan: ScanOutput = serde_json::from_slice(stdout)?;
    Ok(scan.devices)
}

fn parse_device(name: &str, stdout: &[u8]) -> Result<HealthRecord, DiskHealthError> {
    let out: DeviceOutput = serde_json::from_slice(stdout)?;
    Ok(HealthRecord {
        device: name.to_string(),
        device_type: out.device.and_then(|d| d.kind),
        model: out.model_name,
        serial: out.serial_number,
        capacity_bytes: out.user_capacity.map(|c| c.bytes),
        passed: out.smart_status.map(|s| s.passed),
        temperature_c: out.temperature.map(|t| t.current),
        power_on_hours: out.power_on_time.map(|p| p.hours),
        updated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: &str = r#"{
        "json_format_version": [1, 0],
        "devices": [
            {"name": "/dev/sda", "info_name": "/dev/sda [SAT]", "type": "sat", "protocol": "ATA"},
            {"name": "/dev/nvme0", "info_name": "/dev/nvme0", "type": "nvme", "protocol": "NVMe"}
        ]
    }"#;

    const DEVICE: &str = r#"{
        "device": {"name": "/dev/sda", "type": "sat"},
        "model_name": "Samsung SSD 870 EVO 1TB",
        "serial_number": "S6PNNX0T123456",
        "user_capacity": {"blocks": 1953525168, "bytes": 1000204886016},
        "smart_status": {"passed": true},
        "temperature": {"current": 31},
        "power_on_time": {"hours": 8123}
    }"#;

    #[test]
    fn test_parse_scan() {
        let devices = parse_scan(SCAN.as_bytes()).unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["/dev/sda", "/dev/nvme0"]);
        assert_eq!(devices[1].kind.as_deref(), Some("nvme"));
        assert!(parse_scan(b"{}").unwrap().is_empty());
        assert!(parse_scan(b"not json").is_err());
    }

    #[test]
    fn test_read_args_pin_device_type() {
        let devices = parse_scan(SCAN.as_bytes()).unwrap();
        assert_eq!(devices[0].read_args(), vec!["-a", "-j", "-d", "sat", "/dev/sda"]);

        let untyped = parse_scan(br#"{"devices":[{"name":"/dev/sdc"}]}"#).unwrap();
        assert_eq!(untyped[0].read_args(), vec!["-a", "-j", "/dev/sdc"]);
    }

    #[test]
    fn test_parse_device() {
        let record = parse_device("/dev/sda", DEVICE.as_bytes()).unwrap();
        assert_eq!(record.device, "/dev/sda");
        assert_eq!(record.device_type.as_deref(), Some("sat"));
        assert_eq!(record.model.as_deref(), Some("Samsung SSD 870 EVO 1TB"));
        assert_eq!(record.capacity_bytes, Some(1000204886016));
        assert_eq!(record.passed, Some(true));
        assert_eq!(record.temperature_c, Some(31));
        assert_eq!(record.power_on_hours, Some(8123));
    }

    #[test]
    fn test_parse_device_missing_fields() {
        let record = parse_device("/dev/sdb", b"{}").unwrap();
        assert_eq!(record.model, None);
        assert_eq!(record.passed, None);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cache() {
        let monitor = SmartctlMonitor::new("/nonexistent/smartctl", DEFAULT_REFRESH_INTERVAL);
        let cached = parse_device("/dev/sda", DEVICE.as_bytes()).unwrap();
        monitor.write_state(|state| {
            state.records.insert("/dev/sda".into(), cached.clone());
        });

        let err = monitor.refresh(true).await.unwrap_err();
        assert!(matches!(err, DiskHealthError::Command { .. }));
        assert_eq!(monitor.current_data().get("/dev/sda"), Some(&cached));

        // The failed attempt starts a new interval.
        assert!(monitor.refresh(false).await.is_ok());
        assert_eq!(monitor.current_data().get("/dev/sda"), Some(&cached));
    }

    #[tokio::test]
    async fn test_recent_refresh_is_reused() {
        let monitor = SmartctlMonitor::new("/nonexistent/smartctl", DEFAULT_REFRESH_INTERVAL);
        monitor.write_state(|state| state.last_refresh = Some(Instant::now()));
        assert!(monitor.refresh(false).await.is_ok());
        assert!(monitor.refresh(true).await.is_err());
    }

    #[tokio::test]
    async fn test_probe_missing_binary() {
        let monitor = SmartctlMonitor::probe("/nonexistent/smartctl", DEFAULT_REFRESH_INTERVAL).await;
        assert!(monitor.is_none());
    }
}
