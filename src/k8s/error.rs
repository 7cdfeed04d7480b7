use kube::config::KubeconfigError;

#[derive(thiserror::Error, Debug)]
pub enum K8sError {
    #[error("resource `{0}` not found")]
    NotFound(String),

    #[error("the kube client returned an error: `{0}`")]
    Generic(#[from] kube::Error),

    #[error("it is not possible to read kubeconfig: `{0}`")]
    UnableToSetupClientKubeconfig(#[from] KubeconfigError),

}

impl K8sError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, K8sError::NotFound(_))
    }

    /// Maps api-server `404` responses to [K8sError::NotFound] for the given resource name.
    pub(crate) fn from_kube(err: kube::Error, name: &str) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                K8sError::NotFound(name.to_string())
            }
            err => K8sError::Generic(err),
        }
    }
}

/// Helpers for the delete paths, where a missing resource means there is nothing left to do.
pub trait IgnoreNotFound {
    fn ignore_not_found(self) -> Result<(), K8sError>;
}

impl IgnoreNotFound for Result<(), K8sError> {
    fn ignore_not_found(self) -> Result<(), K8sError> {
        match self {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn not_found_mapping() {
        assert_matches!(
            K8sError::from_kube(api_error(404), "svc"),
            K8sError::NotFound(name) if name == "svc"
        );
        assert_matches!(
            K8sError::from_kube(api_error(500), "svc"),
            K8sError::Generic(_)
        );
    }

    #[test]
    fn ignore_not_found_only_absorbs_missing_resources() {
        let missing: Result<(), K8sError> = Err(K8sError::NotFound("svc".to_string()));
        assert!(missing.ignore_not_found().is_ok());

        let failing: Result<(), K8sError> = Err(K8sError::from_kube(api_error(500), "svc"));
        assert!(failing.ignore_not_found().is_err());
    }
}
