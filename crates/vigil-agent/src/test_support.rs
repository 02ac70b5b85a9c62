//! Mock subsystems shared by unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::agent::Agent;
use crate::container::{ContainerError, ContainerRuntime};
use crate::disk_health::{DiskHealth, DiskHealthError, HealthRecord};
use crate::dispatch::{HandlerContext, Responder, Session};
use crate::error::Result;
use crate::protocol::FingerprintResponse;
use crate::stats::{StatsProvider, SystemStats};

/// Records every delivery.
#[derive(Default)]
pub struct RecordingResponder {
    deliveries: Mutex<Vec<(Value, Option<u32>)>>,
}

impl RecordingResponder {
    pub fn deliveries(&self) -> Vec<(Value, Option<u32>)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn deliver(&self, payload: Value, request_id: Option<u32>) -> Result<()> {
        self.deliveries.lock().unwrap().push((payload, request_id));
        Ok(())
    }
}

/// Answers every challenge with a fixed fingerprint.
#[derive(Default)]
pub struct StaticSession;

#[async_trait]
impl Session for StaticSession {
    async fn handle_identity_challenge(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        ctx.respond(&FingerprintResponse {
            fingerprint: "static-fp".into(),
            hostname: None,
            agent_version: None,
        })
        .await
    }
}

/// Stats provider that records requested cache ages.
#[derive(Default)]
pub struct MockStats {
    ages: Mutex<Vec<u64>>,
}

impl MockStats {
    pub fn requested_ages(&self) -> Vec<u64> {
        self.ages.lock().unwrap().clone()
    }
}

impl StatsProvider for MockStats {
    fn gather(&self, max_cache_age_ms: u64) -> SystemStats {
        self.ages.lock().unwrap().push(max_cache_age_ms);
        SystemStats {
            hostname: "mock-host".into(),
            cpu_count: 4,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerCall {
    Start(String),
    Stop(String, u32),
    Restart(String, u32),
}

/// Container runtime that records control calls.
#[derive(Default)]
pub struct MockContainers {
    fail: bool,
    calls: Mutex<Vec<ContainerCall>>,
}

impl MockContainers {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ContainerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, id: &str, call: ContainerCall) -> std::result::Result<(), ContainerError> {
        if self.fail {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MockContainers {
    async fn logs(&self, id: &str) -> std::result::Result<String, ContainerError> {
        if self.fail {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        Ok(format!("logs of {id}"))
    }

    async fn info(&self, id: &str) -> std::result::Result<Vec<u8>, ContainerError> {
        if self.fail {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        Ok(format!(r#"{{"Id":"{id}"}}"#).into_bytes())
    }

    async fn start(&self, id: &str) -> std::result::Result<(), ContainerError> {
        self.record(id, ContainerCall::Start(id.into()))
    }

    async fn stop(&self, id: &str, timeout_secs: u32) -> std::result::Result<(), ContainerError> {
        self.record(id, ContainerCall::Stop(id.into(), timeout_secs))
    }

    async fn restart(&self, id: &str, timeout_secs: u32) -> std::result::Result<(), ContainerError> {
        self.record(id, ContainerCall::Restart(id.into(), timeout_secs))
    }
}

/// Disk health source with fixed data and an optionally failing refresh.
#[derive(Default)]
pub struct MockDiskHealth {
    fail_refresh: bool,
    records: BTreeMap<String, HealthRecord>,
    refreshes: Mutex<Vec<bool>>,
}

impl MockDiskHealth {
    pub fn with_record(record: HealthRecord) -> Self {
        Self {
            records: BTreeMap::from([(record.device.clone(), record)]),
            ..Default::default()
        }
    }

    pub fn failing_with_record(record: HealthRecord) -> Self {
        Self {
            fail_refresh: true,
            ..Self::with_record(record)
        }
    }

    pub fn refreshes(&self) -> Vec<bool> {
        self.refreshes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiskHealth for MockDiskHealth {
    async fn refresh(&self, force: bool) -> std::result::Result<(), DiskHealthError> {
        self.refreshes.lock().unwrap().push(force);
        if self.fail_refresh {
            return Err(DiskHealthError::Device {
                device: "/dev/sda".into(),
                status: 2,
            });
        }
        Ok(())
    }

    fn current_data(&self) -> BTreeMap<String, HealthRecord> {
        self.records.clone()
    }
}

pub fn sample_record(device: &str) -> HealthRecord {
    HealthRecord {
        device: device.to_string(),
        device_type: Some("sat".into()),
        model: Some("Mock Disk".into()),
        serial: Some("MOCK-0001".into()),
        capacity_bytes: Some(500_107_862_016),
        passed: Some(true),
        temperature_c: Some(34),
        power_on_hours: Some(1200),
        updated_at: Utc::now(),
    }
}

/// Agent with mock stats and no optional subsystems.
pub fn test_agent() -> Agent {
    Agent::new(Arc::new(MockStats::default()))
}
