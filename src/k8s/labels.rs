use std::collections::BTreeMap;

pub const MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VAL: &str = "runtime-control";
pub const RUNTIME_TYPE_KEY: &str = "type";
pub const RUNTIME_TYPE_VAL: &str = "runtime";

/// Collection of labels used to identify the resources owned by runtime control.
pub struct Labels(BTreeMap<String, String>);

impl Default for Labels {
    fn default() -> Self {
        Self::new()
    }
}

impl Labels {
    /// Creates a new collection of default labels.
    pub fn new() -> Self {
        Labels(BTreeMap::from([(
            MANAGED_BY_KEY.to_string(),
            MANAGED_BY_VAL.to_string(),
        )]))
    }

    /// Adds the label marking the pods of a runtime revision.
    pub fn with_runtime_type(mut self) -> Self {
        self.0
            .insert(RUNTIME_TYPE_KEY.to_string(), RUNTIME_TYPE_VAL.to_string());
        self
    }

    pub fn get(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }

    /// Prints a label selector that matches all labels in the set.
    pub fn selector(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}=={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}
