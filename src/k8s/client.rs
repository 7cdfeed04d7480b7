use super::error::K8sError;
use super::readiness::{self, ReadinessRule, TerminalState, WatchError};
use k8s_openapi::api::core::v1::{Node, Secret, Service, ServiceAccount};
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    config::KubeConfigOptions,
    core::DynamicObject,
    discovery::ApiResource,
    runtime::watcher,
    Api, Client, Config, Resource,
};
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

/// Same as upstream kube-rs default client timeout (read/write). Watch requests are kept open by
/// the api-server for less than this, so lower values would break the readiness waits.
const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(295);

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Namespace where the runtimes live. Defaults to the namespace of the current context.
    pub namespace: Option<String>,
    pub client_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

/// Provides a _sync_ implementation of [AsyncK8sClient].
///
/// Each method calls `runtime.block_on(self.async_client.future)` on the shared runtime, so the
/// calling thread is suspended until the cluster answers (or the readiness wait finishes).
pub struct SyncK8sClient {
    async_client: AsyncK8sClient,
    runtime: Arc<Runtime>,
}

impl Debug for SyncK8sClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncK8sClient")
            .field("async_client", &self.async_client)
            .field("runtime", &self.runtime)
            .finish()
    }
}

#[cfg_attr(test, mockall::automock)]
impl SyncK8sClient {
    pub fn try_new(runtime: Arc<Runtime>, config: &ClientConfig) -> Result<Self, K8sError> {
        Ok(Self {
            async_client: runtime.block_on(AsyncK8sClient::try_new(config))?,
            runtime,
        })
    }

    pub fn namespace(&self) -> String {
        self.async_client.namespace.clone()
    }

    pub fn cluster_url(&self) -> http::Uri {
        self.async_client.cluster_url.clone()
    }

    pub fn create_dynamic_object(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, K8sError> {
        self.runtime
            .block_on(self.async_client.create_dynamic_object(ar, obj))
    }

    pub fn get_dynamic_object(
        &self,
        ar: &ApiResource,
        name: &str,
    ) -> Result<Option<DynamicObject>, K8sError> {
        self.runtime
            .block_on(self.async_client.get_dynamic_object(ar, name))
    }

    pub fn delete_dynamic_object(&self, ar: &ApiResource, name: &str) -> Result<(), K8sError> {
        self.runtime
            .block_on(self.async_client.delete_dynamic_object(ar, name))
    }

    pub fn list_dynamic_objects(
        &self,
        ar: &ApiResource,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, K8sError> {
        self.runtime
            .block_on(self.async_client.list_dynamic_objects(ar, label_selector))
    }

    pub fn create_secret(&self, secret: &Secret) -> Result<(), K8sError> {
        self.runtime.block_on(self.async_client.create(secret))
    }

    pub fn delete_secret(&self, name: &str) -> Result<(), K8sError> {
        self.runtime
            .block_on(self.async_client.delete::<Secret>(name))
    }

    pub fn create_service_account(&self, account: &ServiceAccount) -> Result<(), K8sError> {
        self.runtime.block_on(self.async_client.create(account))
    }

    pub fn delete_service_account(&self, name: &str) -> Result<(), K8sError> {
        self.runtime
            .block_on(self.async_client.delete::<ServiceAccount>(name))
    }

    pub fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, K8sError> {
        self.runtime
            .block_on(self.async_client.get_service(namespace, name))
    }

    pub fn list_nodes(&self) -> Result<Vec<Node>, K8sError> {
        self.runtime.block_on(self.async_client.list_nodes())
    }

    pub fn await_terminal(
        &self,
        ar: &ApiResource,
        name: &str,
        rule: &ReadinessRule,
        deadline: Duration,
        settle: Duration,
    ) -> Result<TerminalState, WatchError> {
        self.runtime.block_on(
            self.async_client
                .await_terminal(ar, name, rule, deadline, settle),
        )
    }
}

pub struct AsyncK8sClient {
    client: Client,
    namespace: String,
    cluster_url: http::Uri,
}

impl Debug for AsyncK8sClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncK8sClient")
            .field("namespace", &self.namespace)
            .field("cluster_url", &self.cluster_url)
            .finish()
    }
}

impl AsyncK8sClient {
    /// Constructs a new Kubernetes client.
    ///
    /// If loading from the inCluster config fail we fall back to kube-config
    /// This will respect the `$KUBECONFIG` envvar, but otherwise default to `~/.kube/config`.
    /// Not leveraging infer() to check inClusterConfig first
    pub async fn try_new(client_config: &ClientConfig) -> Result<Self, K8sError> {
        debug!("trying inClusterConfig for k8s client");

        let mut config = match Config::incluster() {
            Ok(c) => c,
            Err(e) => {
                debug!("inClusterConfig {}, trying kubeconfig for k8s client", e);
                let c = KubeConfigOptions::default();
                Config::from_kubeconfig(&c).await?
            }
        };
        config.read_timeout = Some(client_config.client_timeout);
        config.write_timeout = Some(client_config.client_timeout);
        if let Some(namespace) = &client_config.namespace {
            config.default_namespace = namespace.clone();
        }

        let namespace = config.default_namespace.clone();
        let cluster_url = config.cluster_url.clone();
        let client = Client::try_from(config)?;

        debug!("k8s client initialization succeeded");
        Ok(Self::new(client, namespace, cluster_url))
    }

    pub fn new(client: Client, namespace: String, cluster_url: http::Uri) -> Self {
        Self {
            client,
            namespace,
            cluster_url,
        }
    }

    fn dynamic_api(&self, ar: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, ar)
    }

    pub async fn create_dynamic_object(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, K8sError> {
        let created = self
            .dynamic_api(ar)
            .create(&PostParams::default(), obj)
            .await?;
        debug!(
            "created {} {}",
            ar.kind,
            created.metadata.name.as_deref().unwrap_or_default()
        );
        Ok(created)
    }

    pub async fn get_dynamic_object(
        &self,
        ar: &ApiResource,
        name: &str,
    ) -> Result<Option<DynamicObject>, K8sError> {
        Ok(self.dynamic_api(ar).get_opt(name).await?)
    }

    pub async fn delete_dynamic_object(
        &self,
        ar: &ApiResource,
        name: &str,
    ) -> Result<(), K8sError> {
        self.dynamic_api(ar)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|err| K8sError::from_kube(err, name))?;
        debug!("deleted {} {}", ar.kind, name);
        Ok(())
    }

    pub async fn list_dynamic_objects(
        &self,
        ar: &ApiResource,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, K8sError> {
        let list = self
            .dynamic_api(ar)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    pub async fn create<K>(&self, obj: &K) -> Result<(), K8sError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + serde::Serialize
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        api.create(&PostParams::default(), obj).await?;
        Ok(())
    }

    pub async fn delete<K>(&self, name: &str) -> Result<(), K8sError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|err| K8sError::from_kube(err, name))?;
        Ok(())
    }

    pub async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, K8sError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>, K8sError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    /// Watches the object `name` until `rule` reports a terminal state, see [readiness::await_terminal].
    pub async fn await_terminal(
        &self,
        ar: &ApiResource,
        name: &str,
        rule: &ReadinessRule,
        deadline: Duration,
        settle: Duration,
    ) -> Result<TerminalState, WatchError> {
        let events = watcher::watch_object(self.dynamic_api(ar), name);
        readiness::await_terminal(events, name, rule, deadline, settle).await
    }
}
