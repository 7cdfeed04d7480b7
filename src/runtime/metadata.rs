use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability metadata harvested from a runtime through the metadata probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetadata {
    pub preinstalls: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RuntimeMetadata {
    /// Parses a probe response. Fails when the capabilities field is missing or is not a list.
    pub fn from_probe(payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload)
    }
}
