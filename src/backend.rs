//! Uniform contract over the compute backends able to host runtimes.
use crate::build_tool::BuildToolError;
use crate::config::{RuntimeControlConfig, KNATIVE_BACKEND};
use crate::invoker::{InvocationError, InvocationOutcome, InvocationRequest};
use crate::k8s::readiness::WatchError;
use crate::k8s::Error as K8sError;
use crate::registry::RegistryError;
use crate::runtime::{RuntimeDescriptor, RuntimeFilter, RuntimeKey, RuntimeNameError, ServiceState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;

pub mod knative;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid runtime name: `{0}`")]
    InvalidRuntime(#[from] RuntimeNameError),

    #[error("cluster api: `{0}`")]
    K8s(#[from] K8sError),

    #[error("{0}")]
    Watch(#[from] WatchError),

    #[error("`{0}` ended as {1}: `{2}`")]
    NotReady(String, ServiceState, String),

    #[error("missing field `{1}` in `{0}`")]
    MissingField(String, String),

    #[error("image registry: `{0}`")]
    Registry(#[from] RegistryError),

    #[error("image build: `{0}`")]
    BuildTool(#[from] BuildToolError),

    #[error("invocation setup: `{0}`")]
    Invocation(#[from] InvocationError),

    #[error("ingress endpoint: `{0}`")]
    Endpoint(String),

    #[error("missing configuration value `{0}`")]
    MissingConfig(String),

    #[error("unknown compute backend `{0}`")]
    UnknownBackend(String),
}

/// A runtime that reached the ready state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployedRuntime {
    /// Descriptor after resolving the `default` image.
    pub descriptor: RuntimeDescriptor,
    pub service_name: String,
    pub url: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait BackendHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Builds a runtime image from a local Dockerfile and publishes it.
    fn build_runtime(&self, image: &str, dockerfile: Option<PathBuf>) -> Result<(), BackendError>;

    /// Deploys (or redeploys) the runtime and blocks until it is ready to receive traffic.
    fn create_runtime(
        &self,
        image: &str,
        memory: u32,
        timeout: Duration,
    ) -> Result<DeployedRuntime, BackendError>;

    /// Removing a runtime that is not deployed is not an error.
    fn delete_runtime(&self, image: &str, memory: u32) -> Result<(), BackendError>;

    fn delete_all_runtimes(&self) -> Result<(), BackendError>;

    /// Returns the `(image, memory)` pairs of the deployed runtimes matching the filter.
    fn list_runtimes(&self, filter: &RuntimeFilter) -> Result<Vec<(String, u32)>, BackendError>;

    /// Single, classified invocation attempt.
    fn invoke(
        &self,
        image: &str,
        memory: u32,
        request: &InvocationRequest,
        want_result: bool,
    ) -> Result<InvocationOutcome, InvocationError>;

    fn get_runtime_key(&self, image: &str, memory: u32) -> Result<RuntimeKey, BackendError>;

    /// Prefix shared by every runtime key of this backend instance.
    fn runtime_key_prefix(&self) -> String;
}

pub type BackendConstructor =
    fn(&RuntimeControlConfig, Arc<Runtime>) -> Result<Box<dyn BackendHandler>, BackendError>;

/// Static mapping between backend identifiers and their constructors.
pub struct BackendRegistry;

impl BackendRegistry {
    const BACKENDS: &'static [(&'static str, BackendConstructor)] =
        &[(KNATIVE_BACKEND, knative::KnativeBackend::boxed)];

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::BACKENDS.iter().map(|(name, _)| *name)
    }

    pub fn get(name: &str) -> Option<BackendConstructor> {
        Self::BACKENDS
            .iter()
            .find(|(backend, _)| *backend == name)
            .map(|(_, constructor)| *constructor)
    }

    /// Builds the backend selected by `compute_backend`.
    pub fn create(
        config: &RuntimeControlConfig,
        runtime: Arc<Runtime>,
    ) -> Result<Box<dyn BackendHandler>, BackendError> {
        let constructor = Self::get(&config.compute_backend)
            .ok_or_else(|| BackendError::UnknownBackend(config.compute_backend.clone()))?;
        constructor(config, runtime)
    }
}
