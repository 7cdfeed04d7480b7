//! Runtimes hosted as Knative Serving services. The default runtime image is built in-cluster with
//! a Tekton task.
use super::{BackendError, BackendHandler, DeployedRuntime};
use crate::build_tool::{DockerCli, ImageBuilder};
use crate::config::{
    KnativeConfig, RuntimeControlConfig, DOCKER_REPO_DEFAULT, KNATIVE_BACKEND, LATEST_REVISION,
};
use crate::invoker::host_cache::HostCache;
use crate::invoker::http::ServiceCaller;
use crate::invoker::{InvocationError, InvocationOutcome, InvocationRequest};
use crate::k8s::client::ClientConfig;
#[cfg_attr(test, mockall_double::double)]
use crate::k8s::client::SyncK8sClient;
use crate::k8s::error::IgnoreNotFound;
use crate::k8s::labels::{Labels, RUNTIME_TYPE_KEY, RUNTIME_TYPE_VAL};
use crate::k8s::readiness::{ReadinessRule, TerminalState};
use crate::registry::{DockerHubRegistry, ImageRegistry, DEFAULT_REGISTRY_TIMEOUT};
use crate::runtime::descriptor::{decode_service_name, encode_service_name};
use crate::runtime::key::cluster_key;
use crate::runtime::{RuntimeDescriptor, RuntimeFilter, RuntimeKey, ServiceState};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use resources::{
    BuildParams, BUILD_SECRET_NAME, BUILD_SERVICE_ACCOUNT_NAME, BUILD_TASK_NAME,
    BUILD_TASK_RUN_NAME, SERVICE_READY_CONDITIONS, SERVICE_URL_POINTER, TASK_RUN_POD_POINTER,
    TASK_RUN_SUCCEEDED_CONDITION,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use url::Url;

pub mod ingress;
pub mod resources;

/// Image keyword resolved to the configured default runtime image.
pub const DEFAULT_RUNTIME: &str = "default";
const POD_SUCCEEDED: &str = "Succeeded";
const POD_FAILED: &str = "Failed";

pub struct KnativeBackend {
    k8s_client: Arc<SyncK8sClient>,
    image_registry: Arc<dyn ImageRegistry>,
    image_builder: Arc<dyn ImageBuilder>,
    service_caller: ServiceCaller,
    host_cache: HostCache,
    /// Cluster ingress. Runtimes are reached through their own host when it is unknown.
    endpoint: Option<Url>,
    config: KnativeConfig,
    namespace: String,
    cluster: String,
}

impl KnativeBackend {
    pub fn try_new(
        config: &RuntimeControlConfig,
        runtime: Arc<Runtime>,
    ) -> Result<Self, BackendError> {
        let client_config = ClientConfig {
            namespace: config.knative.namespace.clone(),
            ..Default::default()
        };
        let k8s_client = SyncK8sClient::try_new(runtime, &client_config)?;
        let image_registry =
            DockerHubRegistry::try_new(&config.knative.registry_url, DEFAULT_REGISTRY_TIMEOUT)?;

        Self::new(
            Arc::new(k8s_client),
            Arc::new(image_registry),
            Arc::new(DockerCli::default()),
            config.knative.clone(),
            config.invocation.timeout.into(),
        )
    }

    pub(super) fn boxed(
        config: &RuntimeControlConfig,
        runtime: Arc<Runtime>,
    ) -> Result<Box<dyn BackendHandler>, BackendError> {
        Ok(Box::new(Self::try_new(config, runtime)?))
    }

    pub fn new(
        k8s_client: Arc<SyncK8sClient>,
        image_registry: Arc<dyn ImageRegistry>,
        image_builder: Arc<dyn ImageBuilder>,
        config: KnativeConfig,
        invocation_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let endpoint = match config.endpoint.clone() {
            Some(endpoint) => Some(endpoint),
            None => ingress::discover_endpoint(&k8s_client)
                .inspect_err(|err| {
                    warn!("Could not get the istio-ingressgateway endpoint, runtimes will be reached through their own host: {err}")
                })
                .ok(),
        };
        let namespace = k8s_client.namespace();
        let cluster = cluster_key(&k8s_client.cluster_url());

        info!(
            "Knative Serving backend initialized in {cluster}/{namespace}, endpoint: {}",
            endpoint
                .as_ref()
                .map(Url::to_string)
                .unwrap_or_else(|| "runtime host".to_string())
        );

        Ok(Self {
            k8s_client,
            image_registry,
            image_builder,
            service_caller: ServiceCaller::try_new(invocation_timeout)?,
            host_cache: HostCache::new(),
            endpoint,
            config,
            namespace,
            cluster,
        })
    }

    /// Returns the image to deploy and whether it is the default one, which is built on demand.
    fn resolve_image(&self, image: &str) -> (String, bool) {
        let default_image = self.config.default_image();
        if image == DEFAULT_RUNTIME || image == default_image {
            (default_image, true)
        } else {
            (image.to_string(), false)
        }
    }

    fn recreate(
        &self,
        ar: &ApiResource,
        name: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, BackendError> {
        self.k8s_client
            .delete_dynamic_object(ar, name)
            .ignore_not_found()?;
        Ok(self.k8s_client.create_dynamic_object(ar, obj)?)
    }

    fn wait_ready(
        &self,
        ar: &ApiResource,
        name: &str,
        rule: &ReadinessRule,
        deadline: Duration,
        settle: Duration,
    ) -> Result<DynamicObject, BackendError> {
        let terminal = self
            .k8s_client
            .await_terminal(ar, name, rule, deadline, settle)?;
        let state = terminal.state();
        match terminal {
            TerminalState::Ready(obj) => Ok(obj),
            TerminalState::Failed(reason) => {
                Err(BackendError::NotReady(name.to_string(), state, reason))
            }
            TerminalState::Deleted => Err(BackendError::NotReady(
                name.to_string(),
                state,
                "removed while waiting for it".to_string(),
            )),
        }
    }

    fn create_account_resources(&self) -> Result<(), BackendError> {
        debug!("Creating account resources: Secret and ServiceAccount");
        self.k8s_client
            .delete_secret(BUILD_SECRET_NAME)
            .ignore_not_found()?;
        self.k8s_client
            .delete_service_account(BUILD_SERVICE_ACCOUNT_NAME)
            .ignore_not_found()?;
        self.k8s_client.create_secret(&resources::docker_secret(
            &self.namespace,
            &self.config.docker_user,
            &self.config.docker_token,
            &self.config.docker_repo,
        ))?;
        self.k8s_client
            .create_service_account(&resources::build_service_account(&self.namespace))?;
        Ok(())
    }

    /// Builds the default runtime image in the cluster unless the tag is already published.
    ///
    /// The published check and the build are not atomic, two concurrent callers may both build.
    fn build_default_image(&self, image: &str) -> Result<(), BackendError> {
        if self.config.docker_user.is_empty() {
            return Err(BackendError::MissingConfig("knative.docker_user".to_string()));
        }

        let revision = self.config.revision();
        if self.config.docker_repo == DOCKER_REPO_DEFAULT && revision != LATEST_REVISION {
            match self.image_registry.image_exists(image, &revision) {
                Ok(true) => {
                    debug!("Docker image {DOCKER_REPO_DEFAULT}/{image}:{revision} already published, skipping the build");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => warn!("Could not check if {image}:{revision} is published: {err}"),
            }
        }

        info!("Building the default runtime image {image}:{revision} from git");
        self.create_account_resources()?;

        debug!("Creating the build Task");
        self.recreate(
            &resources::task_resource(),
            BUILD_TASK_NAME,
            &resources::build_task(&self.namespace),
        )?;

        let image_url = format!("{}/{image}", self.config.docker_repo);
        let git_rev = self.config.git_rev();
        let task_run = resources::build_task_run(
            &self.namespace,
            &BuildParams {
                git_url: &self.config.git_url,
                git_rev: &git_rev,
                image_url: &image_url,
                image_tag: &revision,
            },
        );
        let task_run_ar = resources::task_run_resource();
        self.recreate(&task_run_ar, BUILD_TASK_RUN_NAME, &task_run)?;

        let build_timeout = self.config.build_timeout.into();
        let task_run = self.wait_ready(
            &task_run_ar,
            BUILD_TASK_RUN_NAME,
            &ReadinessRule::field_present(
                ServiceState::Building,
                TASK_RUN_POD_POINTER,
                Some(TASK_RUN_SUCCEEDED_CONDITION),
            ),
            build_timeout,
            Duration::ZERO,
        )?;
        let pod_name = task_run
            .data
            .pointer(TASK_RUN_POD_POINTER)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BackendError::MissingField(BUILD_TASK_RUN_NAME.to_string(), "status.podName".to_string())
            })?
            .to_string();

        debug!("Building image in pod {pod_name}");
        self.wait_ready(
            &resources::pod_resource(),
            &pod_name,
            &ReadinessRule::phase(ServiceState::Building, POD_SUCCEEDED, POD_FAILED),
            build_timeout,
            Duration::ZERO,
        )?;

        self.k8s_client
            .delete_dynamic_object(&task_run_ar, BUILD_TASK_RUN_NAME)
            .ignore_not_found()?;
        info!("Docker image {image_url}:{revision} built and published");
        Ok(())
    }

    /// Replaces the service of the runtime and waits until it takes traffic. Returns the service
    /// name and url.
    fn create_service(
        &self,
        descriptor: &RuntimeDescriptor,
    ) -> Result<(String, String), BackendError> {
        let service_name = descriptor.service_name()?;
        self.host_cache.invalidate(&service_name);

        let image_reference = resources::image_reference(
            &self.config.docker_repo,
            &descriptor.image,
            &self.config.revision(),
        );
        debug!("Creating runtime service {service_name} for {image_reference}");
        let ar = resources::knative_service_resource();
        self.recreate(
            &ar,
            &service_name,
            &resources::knative_service(
                &service_name,
                &self.namespace,
                &image_reference,
                descriptor.memory_mb,
                descriptor.timeout,
            ),
        )?;

        let service = self.wait_ready(
            &ar,
            &service_name,
            &ReadinessRule::conditions(ServiceState::Provisioning, &SERVICE_READY_CONDITIONS),
            self.config.readiness_timeout.into(),
            self.config.settle_delay.into(),
        )?;
        let url = service_url(&service).ok_or_else(|| {
            BackendError::MissingField(service_name.clone(), "status.url".to_string())
        })?;
        if let Some(host) = service_host(&url) {
            self.host_cache.insert(&service_name, host);
        }

        info!("Runtime service {service_name} ready at {url}");
        Ok((service_name, url))
    }

    /// Virtual host of a runtime service, looked up in the cluster on cache misses.
    fn resolve_host(&self, service_name: &str) -> Result<String, InvocationError> {
        if let Some(host) = self.host_cache.get(service_name) {
            return Ok(host);
        }

        let service = self
            .k8s_client
            .get_dynamic_object(&resources::knative_service_resource(), service_name)
            .map_err(|err| InvocationError::HostResolution(err.to_string()))?
            .ok_or_else(|| InvocationError::ResourceNotFound(service_name.to_string()))?;
        let host = service_url(&service)
            .as_deref()
            .and_then(service_host)
            .ok_or_else(|| {
                InvocationError::HostResolution(format!("service {service_name} has no url yet"))
            })?;

        self.host_cache.insert(service_name, host.clone());
        Ok(host)
    }
}

fn service_url(service: &DynamicObject) -> Option<String> {
    service
        .data
        .pointer(SERVICE_URL_POINTER)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `http://name.ns.example.com` becomes `name.ns.example.com`.
fn service_host(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn is_runtime_service(service: &DynamicObject) -> bool {
    service
        .data
        .pointer(&format!("/spec/template/metadata/labels/{RUNTIME_TYPE_KEY}"))
        .and_then(Value::as_str)
        == Some(RUNTIME_TYPE_VAL)
}

impl BackendHandler for KnativeBackend {
    fn name(&self) -> &'static str {
        KNATIVE_BACKEND
    }

    fn build_runtime(&self, image: &str, dockerfile: Option<PathBuf>) -> Result<(), BackendError> {
        info!("Building a new docker image from Dockerfile");
        info!("Docker image name: {image}");
        self.image_builder.build(image, dockerfile)?;
        self.image_builder.push(image)?;
        Ok(())
    }

    fn create_runtime(
        &self,
        image: &str,
        memory: u32,
        timeout: Duration,
    ) -> Result<DeployedRuntime, BackendError> {
        let (image, is_default) = self.resolve_image(image);
        if is_default {
            self.build_default_image(&image)?;
        }

        let descriptor = RuntimeDescriptor::new(image, memory, timeout);
        let (service_name, url) = self.create_service(&descriptor)?;
        Ok(DeployedRuntime {
            descriptor,
            service_name,
            url,
        })
    }

    fn delete_runtime(&self, image: &str, memory: u32) -> Result<(), BackendError> {
        let service_name = encode_service_name(image, memory)?;
        info!("Deleting runtime: {service_name}");
        self.host_cache.invalidate(&service_name);
        self.k8s_client
            .delete_dynamic_object(&resources::knative_service_resource(), &service_name)
            .ignore_not_found()?;
        Ok(())
    }

    fn delete_all_runtimes(&self) -> Result<(), BackendError> {
        for (image, memory) in self.list_runtimes(&RuntimeFilter::All)? {
            self.delete_runtime(&image, memory)?;
        }
        // Hosts of services removed behind our back are stale as well.
        self.host_cache.clear();
        Ok(())
    }

    fn list_runtimes(&self, filter: &RuntimeFilter) -> Result<Vec<(String, u32)>, BackendError> {
        let services = self.k8s_client.list_dynamic_objects(
            &resources::knative_service_resource(),
            &Labels::new().selector(),
        )?;

        Ok(services
            .iter()
            .filter(|service| is_runtime_service(service))
            .filter_map(|service| {
                let name = service.metadata.name.as_deref()?;
                decode_service_name(name)
                    .inspect_err(|err| debug!("Skipping service {name}: {err}"))
                    .ok()
            })
            .filter(|(image, _)| filter.matches(image))
            .collect())
    }

    fn invoke(
        &self,
        image: &str,
        memory: u32,
        request: &InvocationRequest,
        want_result: bool,
    ) -> Result<InvocationOutcome, InvocationError> {
        let service_name = encode_service_name(image, memory)
            .map_err(|err| InvocationError::InvalidRuntime(err.to_string()))?;
        let host = self.resolve_host(&service_name)?;
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => Url::parse(&format!("http://{host}"))
                .map_err(|err| InvocationError::HostResolution(err.to_string()))?,
        };
        self.service_caller
            .call(&endpoint, &host, request, want_result)
    }

    fn get_runtime_key(&self, image: &str, memory: u32) -> Result<RuntimeKey, BackendError> {
        let service_name = encode_service_name(image, memory)?;
        Ok(RuntimeKey::new(&self.cluster, &self.namespace, &service_name))
    }

    fn runtime_key_prefix(&self) -> String {
        RuntimeKey::prefix(&self.cluster, &self.namespace)
    }
}
