//! Blocks on the status events of a single cluster object until it reaches a terminal state.
use crate::runtime::ServiceState;
use futures::{pin_mut, Stream, StreamExt};
use kube::core::DynamicObject;
use serde_json::Value;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("resource `{0}` did not reach a terminal state within {1:?}")]
    Timeout(String, Duration),
    #[error("watch of resource `{0}` failed: {1}")]
    Stream(String, String),
    #[error("watch of resource `{0}` ended before reaching a terminal state")]
    StreamEnded(String),
}

/// Possible values of the `status` field of a Kubernetes condition.
#[derive(Debug, PartialEq, Eq)]
enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<&str> for ConditionStatus {
    fn from(s: &str) -> Self {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// How the status of an object is turned into a [ServiceState].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessRule {
    /// Ready once every condition type reports `True`. Any of them reporting `False` is a failure.
    /// Conditions are looked up by type, their position in the status is irrelevant.
    Conditions {
        stage: ServiceState,
        required: Vec<String>,
    },
    /// Ready once `status.phase` equals `succeeded`, failed once it equals `failed`.
    Phase {
        stage: ServiceState,
        succeeded: String,
        failed: String,
    },
    /// Ready once the JSON pointer resolves to a non-null value. Failed once the optional
    /// `failure_condition` type reports `False`.
    FieldPresent {
        stage: ServiceState,
        pointer: String,
        failure_condition: Option<String>,
    },
}

/// Result of evaluating a single status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    InProgress(ServiceState),
    Ready,
    Failed(String),
}

impl ReadinessRule {
    pub fn conditions<S: ToString>(stage: ServiceState, required: &[S]) -> Self {
        Self::Conditions {
            stage,
            required: required.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn phase(stage: ServiceState, succeeded: &str, failed: &str) -> Self {
        Self::Phase {
            stage,
            succeeded: succeeded.to_string(),
            failed: failed.to_string(),
        }
    }

    pub fn field_present(
        stage: ServiceState,
        pointer: &str,
        failure_condition: Option<&str>,
    ) -> Self {
        Self::FieldPresent {
            stage,
            pointer: pointer.to_string(),
            failure_condition: failure_condition.map(str::to_string),
        }
    }

    pub fn evaluate(&self, obj: &DynamicObject) -> Evaluation {
        // Objects the controllers did not reconcile yet have no status.
        let Some(status) = obj.data.get("status").filter(|s| !s.is_null()) else {
            return Evaluation::InProgress(ServiceState::Pending);
        };

        match self {
            ReadinessRule::Conditions { stage, required } => {
                let conditions = status
                    .get("conditions")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                evaluate_conditions(*stage, required, conditions)
            }
            ReadinessRule::Phase {
                stage,
                succeeded,
                failed,
            } => match status.get("phase").and_then(Value::as_str) {
                Some(phase) if phase == succeeded => Evaluation::Ready,
                Some(phase) if phase == failed => Evaluation::Failed(
                    status
                        .get("message")
                        .and_then(Value::as_str)
                        .map(|m| format!("phase {phase}: {m}"))
                        .unwrap_or_else(|| format!("phase {phase}")),
                ),
                _ => Evaluation::InProgress(*stage),
            },
            ReadinessRule::FieldPresent {
                stage,
                pointer,
                failure_condition,
            } => {
                if obj.data.pointer(pointer).is_some_and(|v| !v.is_null()) {
                    return Evaluation::Ready;
                }
                let failed = failure_condition.as_deref().and_then(|cond_type| {
                    let conditions = status.get("conditions").and_then(Value::as_array)?;
                    let condition = find_condition(conditions, cond_type)?;
                    is_false(condition).then(|| condition_failure(cond_type, condition))
                });
                failed.unwrap_or(Evaluation::InProgress(*stage))
            }
        }
    }
}

fn find_condition<'a>(conditions: &'a [Value], cond_type: &str) -> Option<&'a Value> {
    conditions
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(cond_type))
}

fn is_false(condition: &Value) -> bool {
    condition
        .get("status")
        .and_then(Value::as_str)
        .map(ConditionStatus::from)
        == Some(ConditionStatus::False)
}

fn condition_failure(cond_type: &str, condition: &Value) -> Evaluation {
    let message = condition
        .get("message")
        .or_else(|| condition.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("No specific message found");
    Evaluation::Failed(format!("{cond_type}: {message}"))
}

fn evaluate_conditions(stage: ServiceState, required: &[String], conditions: &[Value]) -> Evaluation {
    let mut all_true = true;
    for cond_type in required {
        let Some(condition) = find_condition(conditions, cond_type) else {
            all_true = false;
            continue;
        };
        match condition
            .get("status")
            .and_then(Value::as_str)
            .map(ConditionStatus::from)
        {
            Some(ConditionStatus::True) => {}
            Some(ConditionStatus::False) => return condition_failure(cond_type, condition),
            _ => all_true = false,
        }
    }
    if all_true {
        Evaluation::Ready
    } else {
        Evaluation::InProgress(stage)
    }
}

/// Terminal outcome of a readiness wait.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalState {
    Ready(DynamicObject),
    Failed(String),
    /// The object was removed while waiting for it.
    Deleted,
}

impl TerminalState {
    pub fn state(&self) -> ServiceState {
        match self {
            TerminalState::Ready(_) => ServiceState::Ready,
            TerminalState::Failed(_) => ServiceState::Failed,
            TerminalState::Deleted => ServiceState::Deleted,
        }
    }
}

/// Consumes `events` (the successive versions of the object named `name`, `None` when it does
/// not exist) until the rule reports a terminal state or the `deadline` elapses.
///
/// The first error of the stream ends the wait, there is no reconnection. Once ready, `settle` is
/// awaited before returning so the data plane can catch up with the control plane.
pub async fn await_terminal<S, E>(
    events: S,
    name: &str,
    rule: &ReadinessRule,
    deadline: Duration,
    settle: Duration,
) -> Result<TerminalState, WatchError>
where
    S: Stream<Item = Result<Option<DynamicObject>, E>>,
    E: Display,
{
    let watch = async {
        pin_mut!(events);
        let mut observed = false;
        let mut last_state = None;
        while let Some(event) = events.next().await {
            let obj = match event {
                Err(err) => return Err(WatchError::Stream(name.to_string(), err.to_string())),
                Ok(None) if observed => return Ok(TerminalState::Deleted),
                Ok(None) => {
                    trace!("resource {name} does not exist yet");
                    continue;
                }
                Ok(Some(obj)) => obj,
            };
            observed = true;
            match rule.evaluate(&obj) {
                Evaluation::Ready => return Ok(TerminalState::Ready(obj)),
                Evaluation::Failed(reason) => return Ok(TerminalState::Failed(reason)),
                Evaluation::InProgress(state) => {
                    if last_state != Some(state) {
                        debug!("resource {name} is {state}");
                        last_state = Some(state);
                    }
                }
            }
        }
        Err(WatchError::StreamEnded(name.to_string()))
    };

    let terminal = tokio::time::timeout(deadline, watch)
        .await
        .map_err(|_| WatchError::Timeout(name.to_string(), deadline))??;

    if let TerminalState::Ready(_) = terminal {
        trace!("waiting {settle:?} for {name} to settle");
        tokio::time::sleep(settle).await;
    }
    Ok(terminal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::stream;
    use kube::core::ObjectMeta;
    use serde_json::json;

    const SERVICE_CONDITIONS: [&str; 3] = ["ConfigurationsReady", "RoutesReady", "Ready"];

    fn object(data: Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("svc".to_string()),
                ..Default::default()
            },
            data,
        }
    }

    fn conditions(statuses: &[(&str, &str)]) -> DynamicObject {
        let conditions: Vec<Value> = statuses
            .iter()
            .map(|(t, s)| json!({"type": t, "status": s}))
            .collect();
        object(json!({"status": {"conditions": conditions, "url": "http://svc.default.example.com"}}))
    }

    fn service_rule() -> ReadinessRule {
        ReadinessRule::conditions(ServiceState::Provisioning, &SERVICE_CONDITIONS)
    }

    type Event = Result<Option<DynamicObject>, String>;

    #[test]
    fn conditions_are_matched_by_type() {
        let rule = service_rule();
        // Order differs from the required list.
        let ready = conditions(&[
            ("Ready", "True"),
            ("RoutesReady", "True"),
            ("ConfigurationsReady", "True"),
        ]);
        assert_eq!(rule.evaluate(&ready), Evaluation::Ready);

        let partial = conditions(&[
            ("ConfigurationsReady", "True"),
            ("Ready", "Unknown"),
            ("RoutesReady", "True"),
        ]);
        assert_eq!(
            rule.evaluate(&partial),
            Evaluation::InProgress(ServiceState::Provisioning)
        );

        let missing_type = conditions(&[("ConfigurationsReady", "True"), ("Ready", "True")]);
        assert_eq!(
            rule.evaluate(&missing_type),
            Evaluation::InProgress(ServiceState::Provisioning)
        );
    }

    #[test]
    fn false_condition_fails() {
        let failed = object(json!({"status": {"conditions": [
            {"type": "ConfigurationsReady", "status": "False", "message": "image not found"},
            {"type": "Ready", "status": "Unknown"},
        ]}}));
        assert_eq!(
            service_rule().evaluate(&failed),
            Evaluation::Failed("ConfigurationsReady: image not found".to_string())
        );
    }

    #[test]
    fn missing_status_is_pending() {
        assert_eq!(
            service_rule().evaluate(&object(json!({"spec": {}}))),
            Evaluation::InProgress(ServiceState::Pending)
        );
        assert_eq!(
            service_rule().evaluate(&object(json!({"status": null}))),
            Evaluation::InProgress(ServiceState::Pending)
        );
    }

    #[test]
    fn phase_and_field_rules() {
        let rule = ReadinessRule::phase(ServiceState::Building, "Succeeded", "Failed");
        assert_eq!(
            rule.evaluate(&object(json!({"status": {"phase": "Running"}}))),
            Evaluation::InProgress(ServiceState::Building)
        );
        assert_eq!(
            rule.evaluate(&object(json!({"status": {"phase": "Succeeded"}}))),
            Evaluation::Ready
        );
        assert_eq!(
            rule.evaluate(&object(json!({"status": {"phase": "Failed"}}))),
            Evaluation::Failed("phase Failed".to_string())
        );

        let rule = ReadinessRule::field_present(ServiceState::Building, "/status/podName", None);
        assert_eq!(
            rule.evaluate(&object(json!({"status": {"startTime": "now"}}))),
            Evaluation::InProgress(ServiceState::Building)
        );
        assert_eq!(
            rule.evaluate(&object(json!({"status": {"podName": "build-pod"}}))),
            Evaluation::Ready
        );
    }

    #[test]
    fn field_rule_fails_on_its_failure_condition() {
        let rule = ReadinessRule::field_present(
            ServiceState::Building,
            "/status/podName",
            Some("Succeeded"),
        );
        let rejected = object(json!({"status": {"conditions": [
            {"type": "Succeeded", "status": "False", "reason": "TaskRunValidationFailed"},
        ]}}));
        assert_eq!(
            rule.evaluate(&rejected),
            Evaluation::Failed("Succeeded: TaskRunValidationFailed".to_string())
        );

        let running = object(json!({"status": {"conditions": [
            {"type": "Succeeded", "status": "Unknown", "reason": "Pending"},
        ]}}));
        assert_eq!(
            rule.evaluate(&running),
            Evaluation::InProgress(ServiceState::Building)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_build_run_ends_the_wait_before_the_deadline() {
        let rule = ReadinessRule::field_present(
            ServiceState::Building,
            "/status/podName",
            Some("Succeeded"),
        );
        let events = stream::iter(vec![Ok::<_, String>(Some(object(json!({"status": {
            "conditions": [{
                "type": "Succeeded",
                "status": "False",
                "reason": "TaskRunValidationFailed",
                "message": "serviceaccount not found",
            }],
        }}))))])
        .chain(stream::pending());
        let start = tokio::time::Instant::now();
        let terminal = await_terminal(
            events,
            "run",
            &rule,
            Duration::from_secs(600),
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(
            terminal,
            TerminalState::Failed("Succeeded: serviceaccount not found".to_string())
        );
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_only_after_every_condition_is_true() {
        let events: Vec<Event> = vec![
            Ok(None),
            Ok(Some(object(json!({})))),
            Ok(Some(conditions(&[("ConfigurationsReady", "True")]))),
            Ok(Some(conditions(&[
                ("ConfigurationsReady", "True"),
                ("RoutesReady", "True"),
                ("Ready", "True"),
            ]))),
        ];
        let start = tokio::time::Instant::now();
        let terminal = await_terminal(
            stream::iter(events),
            "svc",
            &service_rule(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_matches!(terminal, TerminalState::Ready(obj) => {
            assert_eq!(obj.data["status"]["url"], "http://svc.default.example.com");
        });
        // The settle delay is applied before returning.
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_ends_the_wait() {
        let events: Vec<Event> = vec![
            Ok(Some(conditions(&[("Ready", "False")]))),
            Ok(Some(conditions(&[
                ("ConfigurationsReady", "True"),
                ("RoutesReady", "True"),
                ("Ready", "True"),
            ]))),
        ];
        let terminal = await_terminal(
            stream::iter(events),
            "svc",
            &service_rule(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(terminal.state(), ServiceState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_after_observation_is_terminal() {
        let events: Vec<Event> = vec![Ok(Some(conditions(&[("Ready", "Unknown")]))), Ok(None)];
        let terminal = await_terminal(
            stream::iter(events),
            "svc",
            &service_rule(),
            Duration::from_secs(60),
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert_eq!(terminal, TerminalState::Deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn never_returns_before_the_deadline_without_terminal_event() {
        let events = stream::iter(vec![Ok::<_, String>(Some(conditions(&[(
            "Ready", "Unknown",
        )])))])
        .chain(stream::pending());
        let start = tokio::time::Instant::now();
        let err = await_terminal(
            events,
            "svc",
            &service_rule(),
            Duration::from_secs(30),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert_matches!(err, WatchError::Timeout(name, d) if name == "svc" && d == Duration::from_secs(30));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn stream_errors_and_end_are_reported() {
        let events: Vec<Event> = vec![Err("connection reset".to_string())];
        let err = await_terminal(
            stream::iter(events),
            "svc",
            &service_rule(),
            Duration::from_secs(30),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert_matches!(err, WatchError::Stream(_, msg) if msg == "connection reset");

        let err = await_terminal(
            stream::iter(Vec::<Event>::new()),
            "svc",
            &service_rule(),
            Duration::from_secs(30),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert_matches!(err, WatchError::StreamEnded(_));
    }
}
