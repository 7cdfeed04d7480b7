use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_ROUTE: &str = "/";
/// Route answering with the metadata of a runtime.
pub const METADATA_ROUTE: &str = "/preinstalls";

/// Payload sent to a runtime. Only the identifiers are required, the rest of the body is
/// forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRequest {
    pub executor_id: String,
    pub job_id: String,
    pub call_id: String,
    #[serde(skip)]
    pub route: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl InvocationRequest {
    pub fn new(
        executor_id: impl Into<String>,
        job_id: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            job_id: job_id.into(),
            call_id: call_id.into(),
            route: None,
            body: Map::new(),
        }
    }

    /// Request used to read the capabilities of a freshly deployed runtime.
    pub fn metadata_probe() -> Self {
        Self::new("runtime-control", "metadata", "00000").with_route(METADATA_ROUTE)
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn route(&self) -> &str {
        self.route.as_deref().unwrap_or(DEFAULT_ROUTE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    /// Asynchronous call accepted by the runtime.
    Activation(String),
    /// Full response body, returned when the caller asked for the result.
    Payload(Value),
}

impl InvocationResult {
    pub fn activation_id(&self) -> Option<&str> {
        match self {
            InvocationResult::Activation(id) => Some(id),
            InvocationResult::Payload(_) => None,
        }
    }

    pub fn into_payload(self) -> Option<Value> {
        match self {
            InvocationResult::Payload(value) => Some(value),
            InvocationResult::Activation(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub status_code: u16,
    pub result: InvocationResult,
    pub round_trip: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_is_flattened_and_route_skipped() {
        let Value::Object(body) = json!({"data_byte_range": [0, 10], "log_level": "INFO"}) else {
            unreachable!()
        };
        let request = InvocationRequest::new("exec-1", "A000", "00003")
            .with_route("/run")
            .with_body(body);

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "executor_id": "exec-1",
                "job_id": "A000",
                "call_id": "00003",
                "data_byte_range": [0, 10],
                "log_level": "INFO",
            })
        );
        assert_eq!(request.route(), "/run");
    }

    #[test]
    fn default_route() {
        assert_eq!(InvocationRequest::new("e", "j", "c").route(), DEFAULT_ROUTE);
        assert_eq!(InvocationRequest::metadata_probe().route(), METADATA_ROUTE);
    }

    #[test]
    fn result_accessors() {
        let activation = InvocationResult::Activation("abc".to_string());
        assert_eq!(activation.activation_id(), Some("abc"));
        assert_eq!(activation.into_payload(), None);

        let payload = InvocationResult::Payload(json!({"preinstalls": []}));
        assert_eq!(payload.activation_id(), None);
        assert_eq!(payload.into_payload(), Some(json!({"preinstalls": []})));
    }
}
