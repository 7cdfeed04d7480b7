use std::fmt::{Display, Formatter};

/// Identifies a deployed runtime in the metadata store: `cluster/namespace/serviceName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeKey(String);

impl RuntimeKey {
    pub fn new(cluster: &str, namespace: &str, service_name: &str) -> Self {
        Self(format!("{cluster}/{namespace}/{service_name}"))
    }

    /// Prefix shared by the keys of every runtime of the given cluster and namespace.
    pub fn prefix(cluster: &str, namespace: &str) -> String {
        format!("{cluster}/{namespace}/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RuntimeKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for RuntimeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the cluster component of a runtime key given the cluster url: its authority, or the
/// path when the url has none.
pub fn cluster_key(cluster_url: &http::Uri) -> String {
    match cluster_url.authority() {
        Some(authority) => authority.to_string(),
        None => cluster_url.path().trim_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        let key = RuntimeKey::new("10.0.0.1:6443", "default", "python--256mb");
        assert_eq!(key.to_string(), "10.0.0.1:6443/default/python--256mb");
        assert!(key
            .as_str()
            .starts_with(&RuntimeKey::prefix("10.0.0.1:6443", "default")));
    }

    #[test]
    fn cluster_key_from_url() {
        let url: http::Uri = "https://api.cluster.example.com:6443".parse().unwrap();
        assert_eq!(cluster_key(&url), "api.cluster.example.com:6443");

        let url: http::Uri = "/local-cluster".parse().unwrap();
        assert_eq!(cluster_key(&url), "local-cluster");
    }
}
