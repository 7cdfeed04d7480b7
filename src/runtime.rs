pub mod descriptor;
pub mod key;
pub mod metadata;
pub mod state;

pub use descriptor::{RuntimeDescriptor, RuntimeFilter, RuntimeNameError};
pub use key::RuntimeKey;
pub use metadata::RuntimeMetadata;
pub use state::ServiceState;
