//! Sequences the runtime lifecycle on top of a [BackendHandler]: deploy, harvest the runtime
//! metadata, record it, and the matching update, delete and invoke paths.
use crate::backend::{BackendError, BackendHandler};
use crate::config::RuntimeControlConfig;
use crate::invoker::{InvocationRequest, InvocationResult, RetryingInvoker};
use crate::metadata_store::{MetadataStore, MetadataStoreError};
use crate::runtime::{RuntimeDescriptor, RuntimeFilter, RuntimeMetadata};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("compute backend: {0}")]
    Backend(#[from] BackendError),

    #[error("failed getting the metadata of runtime {0}: `{1}`")]
    RuntimeMetadata(String, String),

    #[error("metadata store: {0}")]
    Store(#[from] MetadataStoreError),
}

pub struct LifecycleOrchestrator {
    backend: Box<dyn BackendHandler>,
    store: Arc<dyn MetadataStore>,
    invoker: RetryingInvoker,
    default_memory: u32,
    default_timeout: Duration,
    rollback_on_probe_failure: bool,
}

impl LifecycleOrchestrator {
    pub fn new(
        backend: Box<dyn BackendHandler>,
        store: Arc<dyn MetadataStore>,
        config: &RuntimeControlConfig,
    ) -> Self {
        Self {
            backend,
            store,
            invoker: RetryingInvoker::new(config.retry_policy()),
            default_memory: config.runtime_memory,
            default_timeout: config.runtime_timeout.into(),
            rollback_on_probe_failure: config.rollback_on_probe_failure,
        }
    }

    pub fn default_memory(&self) -> u32 {
        self.default_memory
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Deploys the runtime, reads its metadata through the probe route and stores it under the
    /// key of the deployed runtime.
    pub fn create_runtime(
        &self,
        image: &str,
        memory: u32,
        timeout: Duration,
    ) -> Result<RuntimeMetadata, OrchestratorError> {
        info!("Creating runtime {image} ({memory}MB) on {}", self.backend.name());
        let deployed = self.backend.create_runtime(image, memory, timeout)?;
        let descriptor = &deployed.descriptor;

        let metadata = match self.probe_metadata(descriptor) {
            Ok(metadata) => metadata,
            Err(err) => {
                if self.rollback_on_probe_failure {
                    warn!("Removing runtime {descriptor}, its metadata could not be read");
                    if let Err(rollback_err) = self
                        .backend
                        .delete_runtime(&descriptor.image, descriptor.memory_mb)
                    {
                        warn!("Could not remove runtime {descriptor}: {rollback_err}");
                    }
                }
                return Err(err);
            }
        };

        let key = self
            .backend
            .get_runtime_key(&descriptor.image, descriptor.memory_mb)?;
        self.store.put(&key, &metadata)?;
        info!("Runtime {descriptor} ready, metadata stored in {key}");
        Ok(metadata)
    }

    fn probe_metadata(
        &self,
        descriptor: &RuntimeDescriptor,
    ) -> Result<RuntimeMetadata, OrchestratorError> {
        debug!("Extracting runtime metadata from {descriptor}");
        let payload = self
            .invoker
            .invoke(
                self.backend.as_ref(),
                &descriptor.image,
                descriptor.memory_mb,
                &InvocationRequest::metadata_probe(),
                true,
            )
            .and_then(InvocationResult::into_payload)
            .ok_or_else(|| {
                OrchestratorError::RuntimeMetadata(
                    descriptor.to_string(),
                    "the metadata probe got no response".to_string(),
                )
            })?;

        RuntimeMetadata::from_probe(payload)
            .map_err(|err| OrchestratorError::RuntimeMetadata(descriptor.to_string(), err.to_string()))
    }

    /// Redeploys every deployed runtime of the image, keeping their memory.
    pub fn update_runtime(&self, image: &str) -> Result<Vec<RuntimeDescriptor>, OrchestratorError> {
        let mut updated = Vec::new();
        for (image, memory) in self.backend.list_runtimes(&RuntimeFilter::from(image))? {
            self.create_runtime(&image, memory, self.default_timeout)?;
            updated.push(RuntimeDescriptor::new(image, memory, self.default_timeout));
        }
        Ok(updated)
    }

    /// Builds the image from a local Dockerfile, then deploys it with the default memory.
    pub fn build_runtime(
        &self,
        image: &str,
        dockerfile: Option<PathBuf>,
    ) -> Result<RuntimeMetadata, OrchestratorError> {
        self.backend.build_runtime(image, dockerfile)?;
        self.create_runtime(image, self.default_memory, self.default_timeout)
    }

    /// Removes every deployed runtime of the image and its metadata. Deleting a runtime that is not
    /// deployed does nothing.
    pub fn delete_runtime(&self, image: &str) -> Result<Vec<(String, u32)>, OrchestratorError> {
        let runtimes = self.backend.list_runtimes(&RuntimeFilter::from(image))?;
        for (image, memory) in runtimes.iter() {
            self.backend.delete_runtime(image, *memory)?;
            let key = self.backend.get_runtime_key(image, *memory)?;
            self.store.delete(&key)?;
        }
        if runtimes.is_empty() {
            debug!("No runtime of {image} is deployed");
        }
        Ok(runtimes)
    }

    /// Removes every runtime of the backend and every metadata record of its cluster namespace.
    pub fn delete_all_runtimes(&self) -> Result<(), OrchestratorError> {
        for key in self.store.list(&self.backend.runtime_key_prefix())? {
            debug!("Removing runtime metadata {key}");
            self.store.delete(&key)?;
        }
        self.backend.delete_all_runtimes()?;
        info!("All runtimes removed");
        Ok(())
    }

    pub fn list_runtimes(
        &self,
        filter: &RuntimeFilter,
    ) -> Result<Vec<(String, u32)>, OrchestratorError> {
        Ok(self.backend.list_runtimes(filter)?)
    }

    /// Invokes the runtime asynchronously, returning the activation id. Every failure, once the
    /// retries are exhausted, results in `None`.
    pub fn invoke(&self, image: &str, memory: u32, request: &InvocationRequest) -> Option<String> {
        self.invoker
            .invoke(self.backend.as_ref(), image, memory, request, false)
            .and_then(|result| result.activation_id().map(str::to_string))
    }

    /// Runs every invocation on its own thread so the backoff of one call never delays the others.
    /// Results keep the order of `requests`.
    pub fn invoke_all(
        &self,
        image: &str,
        memory: u32,
        requests: &[InvocationRequest],
    ) -> Vec<Option<String>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || self.invoke(image, memory, request)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        warn!("Invocation thread panicked");
                        None
                    })
                })
                .collect()
        })
    }
}
