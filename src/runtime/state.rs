use std::fmt::{Display, Formatter};

/// Lifecycle state of a runtime's cluster resources, as reported by the cluster events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Pending,
    Building,
    Provisioning,
    Ready,
    Failed,
    Deleted,
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ServiceState::Pending => "pending",
            ServiceState::Building => "building",
            ServiceState::Provisioning => "provisioning",
            ServiceState::Ready => "ready",
            ServiceState::Failed => "failed",
            ServiceState::Deleted => "deleted",
        };
        f.write_str(state)
    }
}
