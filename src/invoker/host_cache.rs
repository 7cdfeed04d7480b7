use dashmap::DashMap;

/// Maps runtime service names to the virtual host serving them. Shared between concurrent
/// invocations.
#[derive(Debug, Default)]
pub struct HostCache {
    hosts: DashMap<String, String>,
}

impl HostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service_name: &str) -> Option<String> {
        self.hosts.get(service_name).map(|host| host.value().clone())
    }

    pub fn insert(&self, service_name: &str, host: String) {
        self.hosts.insert(service_name.to_string(), host);
    }

    /// Forgets the host of a service, returns whether it was cached.
    pub fn invalidate(&self, service_name: &str) -> bool {
        self.hosts.remove(service_name).is_some()
    }

    pub fn clear(&self) {
        self.hosts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_invalidate() {
        let cache = HostCache::new();
        assert_eq!(cache.get("python--256mb"), None);

        cache.insert("python--256mb", "python--256mb.default.example.com".to_string());
        assert_eq!(
            cache.get("python--256mb").as_deref(),
            Some("python--256mb.default.example.com")
        );

        assert!(cache.invalidate("python--256mb"));
        assert!(!cache.invalidate("python--256mb"));
        assert_eq!(cache.get("python--256mb"), None);
    }

    #[test]
    fn clear_forgets_everything() {
        let cache = HostCache::new();
        cache.insert("a--256mb", "a".to_string());
        cache.insert("b--512mb", "b".to_string());
        cache.clear();
        assert_eq!(cache.get("a--256mb"), None);
        assert_eq!(cache.get("b--512mb"), None);
    }
}
