//! Runtime control configuration: a YAML file plus `RUNTIME_CONTROL_` environment overrides.
use crate::invoker::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_SLEEPS};
use crate::registry::DOCKER_HUB_INDEX_URL;
use config::{Config, Environment, File, FileFormat};
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const CONFIG_ENV_VAR_PREFIX: &str = "RUNTIME_CONTROL";
pub const KNATIVE_BACKEND: &str = "knative";
pub const DEFAULT_RUNTIME_MEMORY_MB: u32 = 256;
pub const DEFAULT_RUNTIME_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(600);
pub const DOCKER_REPO_DEFAULT: &str = "docker.io";
pub const GIT_URL_DEFAULT: &str = "https://github.com/runtime-control/knative-runtime";
/// `<USER>` is replaced with the configured docker user.
pub const DEFAULT_RUNTIME_IMAGE: &str = "<USER>/runtime-control-knative";
pub const DOCKER_USER_PLACEHOLDER: &str = "<USER>";
/// Tag used when the build tracks a moving target instead of a release.
pub const LATEST_REVISION: &str = "latest";
const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("loading configuration: `{0}`")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: `{0}`")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeControlConfig {
    #[serde(default = "default_compute_backend")]
    pub compute_backend: String,
    #[serde(default)]
    pub invocation: InvocationConfig,
    #[serde(default = "default_runtime_memory")]
    pub runtime_memory: u32,
    #[serde(default)]
    pub runtime_timeout: RuntimeTimeout,
    /// Deletes a freshly deployed runtime whose metadata cannot be read.
    #[serde(default = "default_true")]
    pub rollback_on_probe_failure: bool,
    #[serde(default)]
    pub knative: KnativeConfig,
}

impl Default for RuntimeControlConfig {
    fn default() -> Self {
        Self {
            compute_backend: default_compute_backend(),
            invocation: InvocationConfig::default(),
            runtime_memory: DEFAULT_RUNTIME_MEMORY_MB,
            runtime_timeout: RuntimeTimeout::default(),
            rollback_on_probe_failure: true,
            knative: KnativeConfig::default(),
        }
    }
}

impl RuntimeControlConfig {
    /// Loads the configuration from the optional YAML file, then applies the environment
    /// overrides, eg: `RUNTIME_CONTROL_KNATIVE__DOCKER_USER=someone`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_VAR_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(content, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.runtime_memory == 0 {
            return Err(ConfigError::Invalid(
                "runtime_memory must be greater than 0".to_string(),
            ));
        }
        if self.compute_backend.is_empty() {
            return Err(ConfigError::Invalid(
                "compute_backend cannot be empty".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            enabled: self.invocation.retry,
            max_attempts: self.invocation.retries,
            sleep_choices: self
                .invocation
                .retry_sleeps
                .iter()
                .map(|sleep| sleep.0)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvocationConfig {
    #[serde(default = "default_true")]
    pub retry: bool,
    /// Total attempts per invocation when retries are enabled.
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_retry_sleeps")]
    pub retry_sleeps: Vec<RetrySleep>,
    #[serde(default)]
    pub timeout: InvocationTimeout,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            retry: true,
            retries: DEFAULT_MAX_ATTEMPTS,
            retry_sleeps: default_retry_sleeps(),
            timeout: InvocationTimeout::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KnativeConfig {
    #[serde(default)]
    pub docker_user: String,
    #[serde(default)]
    pub docker_token: String,
    #[serde(default = "default_docker_repo")]
    pub docker_repo: String,
    /// Ingress endpoint. Discovered from the cluster when absent.
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Defaults to the namespace of the current kube context.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_git_url")]
    pub git_url: String,
    #[serde(default)]
    pub git_rev: Option<String>,
    /// Tag of the default runtime image. Defaults to the version of this crate.
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default = "default_runtime_image")]
    pub default_runtime_image: String,
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    #[serde(default)]
    pub build_timeout: BuildTimeout,
    #[serde(default)]
    pub readiness_timeout: ReadinessTimeout,
    #[serde(default)]
    pub settle_delay: SettleDelay,
}

impl Default for KnativeConfig {
    fn default() -> Self {
        Self {
            docker_user: String::new(),
            docker_token: String::new(),
            docker_repo: default_docker_repo(),
            endpoint: None,
            namespace: None,
            git_url: default_git_url(),
            git_rev: None,
            revision: None,
            default_runtime_image: default_runtime_image(),
            registry_url: default_registry_url(),
            build_timeout: BuildTimeout::default(),
            readiness_timeout: ReadinessTimeout::default(),
            settle_delay: SettleDelay::default(),
        }
    }
}

impl KnativeConfig {
    pub fn revision(&self) -> String {
        self.revision
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }

    /// Git revision the default image is built from. Follows the image revision unless set.
    pub fn git_rev(&self) -> String {
        match &self.git_rev {
            Some(rev) => rev.clone(),
            None if self.revision() == LATEST_REVISION => "main".to_string(),
            None => self.revision(),
        }
    }

    /// Name of the image built by the cluster when the `default` runtime is requested.
    pub fn default_image(&self) -> String {
        self.default_runtime_image
            .replace(DOCKER_USER_PLACEHOLDER, &self.docker_user)
    }
}

macro_rules! duration_wrapper {
    ($(#[$doc:meta])* $name:ident, $default:expr) => {
        $(#[$doc])*
        #[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
        pub struct $name(#[serde(deserialize_with = "deserialize_duration")] pub Duration);

        impl Default for $name {
            fn default() -> Self {
                Self($default)
            }
        }

        impl From<$name> for Duration {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl From<Duration> for $name {
            fn from(value: Duration) -> Self {
                Self(value)
            }
        }
    };
}

duration_wrapper!(
    /// Timeout given to the runtime service for each request.
    RuntimeTimeout,
    DEFAULT_RUNTIME_TIMEOUT
);
duration_wrapper!(InvocationTimeout, DEFAULT_INVOCATION_TIMEOUT);
duration_wrapper!(RetrySleep, Duration::ZERO);
duration_wrapper!(BuildTimeout, DEFAULT_BUILD_TIMEOUT);
duration_wrapper!(ReadinessTimeout, DEFAULT_READINESS_TIMEOUT);
duration_wrapper!(
    /// Wait after a service reports ready, before it is invoked.
    SettleDelay,
    DEFAULT_SETTLE_DELAY
);

fn default_true() -> bool {
    true
}

fn default_compute_backend() -> String {
    KNATIVE_BACKEND.to_string()
}

fn default_runtime_memory() -> u32 {
    DEFAULT_RUNTIME_MEMORY_MB
}

fn default_retries() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_sleeps() -> Vec<RetrySleep> {
    DEFAULT_RETRY_SLEEPS.iter().copied().map(RetrySleep).collect()
}

fn default_docker_repo() -> String {
    DOCKER_REPO_DEFAULT.to_string()
}

fn default_git_url() -> String {
    GIT_URL_DEFAULT.to_string()
}

fn default_runtime_image() -> String {
    DEFAULT_RUNTIME_IMAGE.to_string()
}

fn default_registry_url() -> String {
    DOCKER_HUB_INDEX_URL.to_string()
}
