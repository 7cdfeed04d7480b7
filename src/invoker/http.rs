use super::error::InvocationError;
use super::request::{InvocationOutcome, InvocationRequest, InvocationResult};
use reqwest::blocking::Client;
use reqwest::header::HOST;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

const ACTIVATION_ID_FIELD: &str = "activationId";

/// Performs single HTTP invocations against the cluster ingress, addressing runtimes by virtual
/// host.
#[derive(Debug, Clone)]
pub struct ServiceCaller {
    http_client: Client,
}

impl ServiceCaller {
    pub fn try_new(timeout: Duration) -> Result<Self, InvocationError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| InvocationError::HttpClientBuild(err.to_string()))?;
        Ok(Self { http_client })
    }

    /// Posts the request to `endpoint` with the `Host` header set to the runtime host, and
    /// classifies the answer.
    pub fn call(
        &self,
        endpoint: &Url,
        host: &str,
        request: &InvocationRequest,
        want_result: bool,
    ) -> Result<InvocationOutcome, InvocationError> {
        let url = endpoint
            .join(request.route())
            .map_err(|err| InvocationError::Transport(format!("invalid route: {err}")))?;

        debug!(
            "ExecutorID {} | JobID {} - Starting function invocation {} on {}",
            request.executor_id, request.job_id, request.call_id, host
        );

        let start = Instant::now();
        let response = self
            .http_client
            .post(url)
            .header(HOST, host)
            .json(request)
            .send()
            .map_err(|err| InvocationError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| InvocationError::Transport(err.to_string()))?;
        let round_trip = start.elapsed();

        match status {
            StatusCode::OK | StatusCode::ACCEPTED => {
                let data: Value = serde_json::from_str(&body)
                    .map_err(|err| InvocationError::MalformedResponse(err.to_string()))?;
                let result = if want_result {
                    InvocationResult::Payload(data)
                } else {
                    data.get(ACTIVATION_ID_FIELD)
                        .and_then(Value::as_str)
                        .map(|id| InvocationResult::Activation(id.to_string()))
                        .ok_or_else(|| {
                            InvocationError::MalformedResponse(format!(
                                "missing `{ACTIVATION_ID_FIELD}` in `{body}`"
                            ))
                        })?
                };
                Ok(InvocationOutcome {
                    status_code: status.as_u16(),
                    result,
                    round_trip,
                })
            }
            StatusCode::NOT_FOUND => Err(InvocationError::NotDeployed(host.to_string())),
            _ => Err(InvocationError::Failure {
                status: status.as_u16(),
                body,
            }),
        }
    }
}
