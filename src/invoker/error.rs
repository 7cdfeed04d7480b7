use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("runtime service `{0}` is not deployed")]
    NotDeployed(String),

    #[error("resource not found: `{0}`")]
    ResourceNotFound(String),

    #[error("invalid runtime: `{0}`")]
    InvalidRuntime(String),

    #[error("runtime answered with status {status}: `{body}`")]
    Failure { status: u16, body: String },

    #[error("transport error: `{0}`")]
    Transport(String),

    #[error("malformed runtime response: `{0}`")]
    MalformedResponse(String),

    #[error("could not resolve the runtime host: `{0}`")]
    HostResolution(String),

    #[error("could not build the http client: `{0}`")]
    HttpClientBuild(String),
}

impl InvocationError {
    /// Failures that may go away by trying again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InvocationError::Failure { .. }
                | InvocationError::Transport(_)
                | InvocationError::MalformedResponse(_)
                | InvocationError::HostResolution(_)
        )
    }
}
