//! Checks whether an image tag is already published, so an unchanged image is not rebuilt.
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DOCKER_HUB_INDEX_URL: &str = "https://index.docker.io";
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid registry url: `{0}`")]
    InvalidUrl(#[from] url::ParseError),

    #[error("registry request failed: `{0}`")]
    Transport(#[from] reqwest::Error),

    #[error("registry answered with status {0}: `{1}`")]
    UnexpectedStatus(u16, String),
}

#[cfg_attr(test, mockall::automock)]
pub trait ImageRegistry: Send + Sync {
    /// Returns whether `image:tag` is present in the registry.
    fn image_exists(&self, image: &str, tag: &str) -> Result<bool, RegistryError>;
}

/// Docker Hub tag lookup through the legacy `v1` repositories endpoint.
pub struct DockerHubRegistry {
    http_client: Client,
    base_url: Url,
}

impl DockerHubRegistry {
    pub fn try_new(base_url: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
        })
    }
}

impl ImageRegistry for DockerHubRegistry {
    fn image_exists(&self, image: &str, tag: &str) -> Result<bool, RegistryError> {
        let url = self
            .base_url
            .join(&format!("v1/repositories/{image}/tags/{tag}"))?;
        debug!("checking image tag at {url}");

        let response = self.http_client.get(url).send()?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RegistryError::UnexpectedStatus(
                status.as_u16(),
                response.text()?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    fn registry(server: &MockServer) -> DockerHubRegistry {
        DockerHubRegistry::try_new(&server.base_url(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn published_tag_exists() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/repositories/someone/runtime-kn/tags/0.1.0");
            then.status(200).body("[]");
        });

        assert!(registry(&server)
            .image_exists("someone/runtime-kn", "0.1.0")
            .unwrap());
        mock.assert();
    }

    #[test]
    fn missing_tag_does_not_exist() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET);
            then.status(404).body("Tag not found");
        });

        assert!(!registry(&server)
            .image_exists("someone/runtime-kn", "0.2.0")
            .unwrap());
    }

    #[test]
    fn unexpected_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET);
            then.status(500).body("boom");
        });

        let err = registry(&server)
            .image_exists("someone/runtime-kn", "0.2.0")
            .unwrap_err();
        assert_matches!(err, RegistryError::UnexpectedStatus(500, body) if body == "boom");
    }

    #[test]
    fn invalid_base_url() {
        assert_matches!(
            DockerHubRegistry::try_new("not a url", Duration::from_secs(1)).err(),
            Some(RegistryError::InvalidUrl(_))
        );
    }
}
