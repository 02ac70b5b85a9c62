//! Built-in request handlers.
//!
//! One handler per [`Action`]. Each decodes its own payload, delegates to a
//! subsystem and answers through the context.
//!
//! Read-only container queries degrade to an empty string when the host has no
//! container runtime. Start, stop and restart fail with
//! [`AgentError::Unavailable`] instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::container::ContainerRuntime;
use crate::disk_health::HealthRecord;
use crate::dispatch::{HandlerContext, HandlerRegistry, RequestHandler};
use crate::error::{AgentError, Result};
use crate::protocol::{
    Action, ContainerControlRequest, ContainerInfoRequest, ContainerLogsRequest,
    DataRequestOptions, ACK,
};

const CONTAINERS: &str = "docker";

/// Bind the built-in handler for every action.
pub fn register_defaults(registry: &mut HandlerRegistry) {
    registry.register(Action::GetData, GetDataHandler);
    registry.register(Action::CheckFingerprint, CheckFingerprintHandler);
    registry.register(Action::GetContainerLogs, GetContainerLogsHandler);
    registry.register(Action::GetContainerInfo, GetContainerInfoHandler);
    registry.register(Action::GetSmartData, GetSmartDataHandler);
    registry.register(Action::StartContainer, StartContainerHandler);
    registry.register(Action::StopContainer, StopContainerHandler);
    registry.register(Action::RestartContainer, RestartContainerHandler);
}

/// Answers with a system stats snapshot.
pub struct GetDataHandler;

#[async_trait]
impl RequestHandler for GetDataHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let options: DataRequestOptions = ctx.request().decode_or_default();
        let stats = ctx.agent().stats().gather(options.cache_time_ms);
        ctx.respond(&stats).await
    }
}

/// Forwards the identity challenge to the connection's session.
pub struct CheckFingerprintHandler;

#[async_trait]
impl RequestHandler for CheckFingerprintHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        ctx.session().handle_identity_challenge(ctx).await
    }
}

/// Answers with recent container logs.
pub struct GetContainerLogsHandler;

#[async_trait]
impl RequestHandler for GetContainerLogsHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let Some(runtime) = ctx.agent().containers().get() else {
            return ctx.respond("").await;
        };
        let req: ContainerLogsRequest = ctx.request().decode(Action::GetContainerLogs)?;
        let logs = runtime.logs(&req.container_id).await?;
        debug!(container = %req.container_id, bytes = logs.len(), "fetched container logs");
        ctx.respond(&logs).await
    }
}

/// Answers with the container inspect document as text.
pub struct GetContainerInfoHandler;

#[async_trait]
impl RequestHandler for GetContainerInfoHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let Some(runtime) = ctx.agent().containers().get() else {
            return ctx.respond("").await;
        };
        let req: ContainerInfoRequest = ctx.request().decode(Action::GetContainerInfo)?;
        let info = runtime.info(&req.container_id).await?;
        let text = String::from_utf8_lossy(&info).into_owned();
        ctx.respond(&text).await
    }
}

/// Answers with the disk health map.
///
/// A failed refresh is logged and swallowed: the hub still gets the last known
/// data rather than an error.
pub struct GetSmartDataHandler;

#[async_trait]
impl RequestHandler for GetSmartDataHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let Some(monitor) = ctx.agent().disk_health().get() else {
            return ctx.respond(&BTreeMap::<String, HealthRecord>::new()).await;
        };
        if let Err(e) = monitor.refresh(false).await {
            debug!(error = %e, "disk health refresh failed, serving cached data");
        }
        ctx.respond(&monitor.current_data()).await
    }
}

/// Starts a container.
pub struct StartContainerHandler;

#[async_trait]
impl RequestHandler for StartContainerHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let (runtime, req) = control_request(ctx, Action::StartContainer)?;
        runtime.start(&req.container_id).await?;
        ctx.respond(ACK).await
    }
}

/// Stops a container.
pub struct StopContainerHandler;

#[async_trait]
impl RequestHandler for StopContainerHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let (runtime, req) = control_request(ctx, Action::StopContainer)?;
        runtime
            .stop(&req.container_id, req.effective_timeout())
            .await?;
        ctx.respond(ACK).await
    }
}

/// Restarts a container.
pub struct RestartContainerHandler;

#[async_trait]
impl RequestHandler for RestartContainerHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let (runtime, req) = control_request(ctx, Action::RestartContainer)?;
        runtime
            .restart(&req.container_id, req.effective_timeout())
            .await?;
        ctx.respond(ACK).await
    }
}

fn control_request(
    ctx: &HandlerContext<'_>,
    action: Action,
) -> Result<(Arc<dyn ContainerRuntime>, ContainerControlRequest)> {
    let runtime = ctx
        .agent()
        .containers()
        .get()
        .cloned()
        .ok_or(AgentError::Unavailable(CONTAINERS))?;
    let req = ctx.request().decode(action)?;
    Ok((runtime, req))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::container::ContainerError;
    use crate::dispatch::RequestEnvelope;
    use crate::test_support::{
        sample_record, ContainerCall, MockContainers, MockDiskHealth, MockStats,
        RecordingResponder, StaticSession,
    };
    use serde_json::{json, Value};

    async fn dispatch(agent: &Agent, action: Action, data: Value) -> (Result<()>, Vec<Value>) {
        let registry = HandlerRegistry::with_default_handlers();
        let responder = RecordingResponder::default();
        let session = StaticSession::default();
        let request = RequestEnvelope::new(action.code(), serde_json::to_vec(&data).unwrap());
        let ctx = HandlerContext::new(&responder, &session, agent, &request, Some(3), true);
        let result = registry.dispatch(&ctx).await;
        let payloads = responder
            .deliveries()
            .into_iter()
            .map(|(payload, id)| {
                assert_eq!(id, Some(3));
                payload
            })
            .collect();
        (result, payloads)
    }

    fn bare_agent() -> Agent {
        Agent::new(Arc::new(MockStats::default()))
    }

    fn container_agent(containers: &Arc<MockContainers>) -> Agent {
        bare_agent().with_containers(Arc::clone(containers) as Arc<dyn ContainerRuntime>)
    }

    #[tokio::test]
    async fn test_get_data_forwards_cache_time() {
        let stats = Arc::new(MockStats::default());
        let agent = Agent::new(Arc::clone(&stats) as _);
        let (result, payloads) = dispatch(&agent, Action::GetData, json!({"cacheTimeMs": 5000})).await;
        assert!(result.is_ok());
        assert_eq!(stats.requested_ages(), vec![5000]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["hostname"], "mock-host");
    }

    #[tokio::test]
    async fn test_get_data_tolerates_bad_payload() {
        let stats = Arc::new(MockStats::default());
        let agent = Agent::new(Arc::clone(&stats) as _);
        let (result, payloads) = dispatch(&agent, Action::GetData, json!("garbage")).await;
        assert!(result.is_ok());
        assert_eq!(stats.requested_ages(), vec![0]);
        assert_eq!(payloads.len(), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_goes_to_session() {
        let (result, payloads) = dispatch(&bare_agent(), Action::CheckFingerprint, json!({})).await;
        assert!(result.is_ok());
        assert_eq!(payloads, vec![json!({"fingerprint": "static-fp"})]);
    }

    #[tokio::test]
    async fn test_reads_without_runtime_answer_empty() {
        let agent = bare_agent();
        for action in [Action::GetContainerLogs, Action::GetContainerInfo] {
            let (result, payloads) = dispatch(&agent, action, json!({"containerID": "abc"})).await;
            assert!(result.is_ok(), "{action}");
            assert_eq!(payloads, vec![json!("")]);
        }
    }

    #[tokio::test]
    async fn test_control_without_runtime_is_unavailable() {
        let agent = bare_agent();
        for action in [
            Action::StartContainer,
            Action::StopContainer,
            Action::RestartContainer,
        ] {
            let (result, payloads) = dispatch(&agent, action, json!({"containerID": "abc"})).await;
            assert!(matches!(result, Err(AgentError::Unavailable(_))), "{action}");
            assert!(payloads.is_empty());
        }
    }

    #[tokio::test]
    async fn test_container_logs_and_info() {
        let containers = Arc::new(MockContainers::default());
        let agent = container_agent(&containers);

        let (result, payloads) =
            dispatch(&agent, Action::GetContainerLogs, json!({"containerID": "web"})).await;
        assert!(result.is_ok());
        assert_eq!(payloads, vec![json!("logs of web")]);

        let (result, payloads) =
            dispatch(&agent, Action::GetContainerInfo, json!({"containerID": "web"})).await;
        assert!(result.is_ok());
        assert_eq!(payloads, vec![json!(r#"{"Id":"web"}"#)]);
    }

    #[tokio::test]
    async fn test_container_decode_failure_is_fatal() {
        let containers = Arc::new(MockContainers::default());
        let agent = container_agent(&containers);
        for action in [
            Action::GetContainerLogs,
            Action::GetContainerInfo,
            Action::StartContainer,
            Action::StopContainer,
            Action::RestartContainer,
        ] {
            let (result, payloads) = dispatch(&agent, action, json!({"wrong": 1})).await;
            assert!(matches!(result, Err(AgentError::Decode { .. })), "{action}");
            assert!(payloads.is_empty());
        }
        assert!(containers.calls().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_error_propagates() {
        let containers = Arc::new(MockContainers::failing());
        let agent = container_agent(&containers);
        let (result, payloads) =
            dispatch(&agent, Action::StartContainer, json!({"containerID": "abc"})).await;
        assert!(matches!(
            result,
            Err(AgentError::Container(ContainerError::NotFound(_)))
        ));
        assert!(payloads.is_empty());

        let (result, _) =
            dispatch(&agent, Action::GetContainerLogs, json!({"containerID": "abc"})).await;
        assert!(matches!(result, Err(AgentError::Container(_))));
    }

    #[tokio::test]
    async fn test_start_acknowledges() {
        let containers = Arc::new(MockContainers::default());
        let agent = container_agent(&containers);
        let (result, payloads) =
            dispatch(&agent, Action::StartContainer, json!({"containerID": "abc"})).await;
        assert!(result.is_ok());
        assert_eq!(payloads, vec![json!(ACK)]);
        assert_eq!(containers.calls(), vec![ContainerCall::Start("abc".into())]);
    }

    #[tokio::test]
    async fn test_stop_and_restart_default_timeout() {
        let containers = Arc::new(MockContainers::default());
        let agent = container_agent(&containers);

        dispatch(&agent, Action::StopContainer, json!({"containerID": "a"}))
            .await
            .0
            .unwrap();
        dispatch(&agent, Action::StopContainer, json!({"containerID": "b", "timeoutSeconds": 0}))
            .await
            .0
            .unwrap();
        dispatch(&agent, Action::RestartContainer, json!({"containerID": "c"}))
            .await
            .0
            .unwrap();

        assert_eq!(
            containers.calls(),
            vec![
                ContainerCall::Stop("a".into(), 10),
                ContainerCall::Stop("b".into(), 10),
                ContainerCall::Restart("c".into(), 10),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_and_restart_explicit_timeout() {
        let containers = Arc::new(MockContainers::default());
        let agent = container_agent(&containers);

        let (result, payloads) = dispatch(
            &agent,
            Action::StopContainer,
            json!({"containerID": "a", "timeoutSeconds": 30}),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(payloads, vec![json!(ACK)]);

        dispatch(
            &agent,
            Action::RestartContainer,
            json!({"containerID": "a", "timeoutSeconds": 30}),
        )
        .await
        .0
        .unwrap();

        assert_eq!(
            containers.calls(),
            vec![
                ContainerCall::Stop("a".into(), 30),
                ContainerCall::Restart("a".into(), 30),
            ]
        );
    }

    #[tokio::test]
    async fn test_smart_data_without_monitor_is_empty_map() {
        let (result, payloads) = dispatch(&bare_agent(), Action::GetSmartData, Value::Null).await;
        assert!(result.is_ok());
        assert_eq!(payloads, vec![json!({})]);
    }

    #[tokio::test]
    async fn test_smart_data_refreshes_then_serves() {
        let monitor = Arc::new(MockDiskHealth::with_record(sample_record("/dev/sda")));
        let agent = bare_agent().with_disk_health(Arc::clone(&monitor) as _);
        let (result, payloads) = dispatch(&agent, Action::GetSmartData, Value::Null).await;
        assert!(result.is_ok());
        assert_eq!(monitor.refreshes(), vec![false]);
        assert_eq!(payloads[0]["/dev/sda"]["model"], "Mock Disk");
    }

    #[tokio::test]
    async fn test_smart_refresh_failure_is_swallowed() {
        let monitor = Arc::new(MockDiskHealth::failing_with_record(sample_record("/dev/sda")));
        let agent = bare_agent().with_disk_health(Arc::clone(&monitor) as _);
        let (result, payloads) = dispatch(&agent, Action::GetSmartData, Value::Null).await;
        assert!(result.is_ok(), "refresh errors must not fail the request");
        assert_eq!(monitor.refreshes(), vec![false]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["/dev/sda"]["device"], "/dev/sda");
    }
}
