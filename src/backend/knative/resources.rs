//! Cluster objects created by the Knative backend.
use crate::config::DOCKER_REPO_DEFAULT;
use crate::k8s::labels::Labels;
use k8s_openapi::api::core::v1::{ObjectReference, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

pub const BUILD_TASK_NAME: &str = "runtime-control-image-build";
pub const BUILD_TASK_RUN_NAME: &str = "runtime-control-image-build-run";
pub const BUILD_SECRET_NAME: &str = "runtime-control-docker-credentials";
pub const BUILD_SERVICE_ACCOUNT_NAME: &str = "runtime-control-build";
const DOCKER_HUB_CREDENTIALS_URL: &str = "https://index.docker.io/v1/";
const TEKTON_DOCKER_ANNOTATION: &str = "tekton.dev/docker-0";

/// Condition types that must all be `True` before a Knative service takes traffic.
pub const SERVICE_READY_CONDITIONS: [&str; 3] = ["ConfigurationsReady", "RoutesReady", "Ready"];
pub const SERVICE_URL_POINTER: &str = "/status/url";
pub const TASK_RUN_POD_POINTER: &str = "/status/podName";
pub const TASK_RUN_SUCCEEDED_CONDITION: &str = "Succeeded";

pub fn knative_service_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("serving.knative.dev", "v1", "Service"))
}

pub fn task_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("tekton.dev", "v1beta1", "Task"))
}

pub fn task_run_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("tekton.dev", "v1beta1", "TaskRun"))
}

pub fn pod_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Pod"))
}

/// Full image reference deployed by the service. The revision is only appended to untagged images.
pub fn image_reference(docker_repo: &str, image: &str, revision: &str) -> String {
    let tagged = image
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains(':'));
    if tagged {
        format!("{docker_repo}/{image}")
    } else {
        format!("{docker_repo}/{image}:{revision}")
    }
}

pub fn knative_service(
    name: &str,
    namespace: &str,
    image_reference: &str,
    memory_mb: u32,
    timeout: Duration,
) -> DynamicObject {
    let mut service = DynamicObject::new(name, &knative_service_resource())
        .within(namespace)
        .data(json!({
            "spec": {
                "template": {
                    "metadata": {
                        "labels": Labels::new().with_runtime_type().get(),
                    },
                    "spec": {
                        "containerConcurrency": 1,
                        "timeoutSeconds": timeout.as_secs(),
                        "containers": [{
                            "image": image_reference,
                            "resources": {
                                "limits": { "memory": format!("{memory_mb}Mi") },
                            },
                        }],
                    },
                },
            },
        }));
    service.metadata.labels = Some(Labels::new().get());
    service
}

/// Task cloning a git repository and building the image in-cluster with kaniko.
pub fn build_task(namespace: &str) -> DynamicObject {
    let mut task = DynamicObject::new(BUILD_TASK_NAME, &task_resource())
        .within(namespace)
        .data(json!({
            "spec": {
                "params": [
                    { "name": "url", "type": "string" },
                    { "name": "revision", "type": "string" },
                    { "name": "imageUrl", "type": "string" },
                    { "name": "imageTag", "type": "string" },
                    { "name": "pathToDockerFile", "type": "string", "default": "Dockerfile" },
                ],
                "steps": [
                    {
                        "name": "clone",
                        "image": "alpine/git",
                        "workingDir": "/workspace",
                        "script": "git clone $(params.url) source && git -C source checkout $(params.revision)",
                    },
                    {
                        "name": "build-and-push",
                        "image": "gcr.io/kaniko-project/executor:latest",
                        "env": [{ "name": "DOCKER_CONFIG", "value": "/tekton/home/.docker/" }],
                        "command": ["/kaniko/executor"],
                        "args": [
                            "--dockerfile=$(params.pathToDockerFile)",
                            "--destination=$(params.imageUrl):$(params.imageTag)",
                            "--context=/workspace/source",
                        ],
                    },
                ],
            },
        }));
    task.metadata.labels = Some(Labels::new().get());
    task
}

pub struct BuildParams<'a> {
    pub git_url: &'a str,
    pub git_rev: &'a str,
    pub image_url: &'a str,
    pub image_tag: &'a str,
}

pub fn build_task_run(namespace: &str, params: &BuildParams) -> DynamicObject {
    let mut task_run = DynamicObject::new(BUILD_TASK_RUN_NAME, &task_run_resource())
        .within(namespace)
        .data(json!({
            "spec": {
                "serviceAccountName": BUILD_SERVICE_ACCOUNT_NAME,
                "taskRef": { "name": BUILD_TASK_NAME },
                "params": [
                    { "name": "url", "value": params.git_url },
                    { "name": "revision", "value": params.git_rev },
                    { "name": "imageUrl", "value": params.image_url },
                    { "name": "imageTag", "value": params.image_tag },
                ],
            },
        }));
    task_run.metadata.labels = Some(Labels::new().get());
    task_run
}

/// Registry credentials used by the build service account.
pub fn docker_secret(namespace: &str, user: &str, token: &str, docker_repo: &str) -> Secret {
    let registry = if docker_repo == DOCKER_REPO_DEFAULT {
        DOCKER_HUB_CREDENTIALS_URL
    } else {
        docker_repo
    };
    Secret {
        metadata: ObjectMeta {
            name: Some(BUILD_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(Labels::new().get()),
            annotations: Some(BTreeMap::from([(
                TEKTON_DOCKER_ANNOTATION.to_string(),
                registry.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("kubernetes.io/basic-auth".to_string()),
        string_data: Some(BTreeMap::from([
            ("username".to_string(), user.to_string()),
            ("password".to_string(), token.to_string()),
        ])),
        ..Default::default()
    }
}

pub fn build_service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(BUILD_SERVICE_ACCOUNT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(Labels::new().get()),
            ..Default::default()
        },
        secrets: Some(vec![ObjectReference {
            name: Some(BUILD_SECRET_NAME.to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}
