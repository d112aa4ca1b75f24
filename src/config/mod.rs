pub mod store;
pub mod types;
pub mod validation;

pub use store::{ConfigStore, SETTINGS_FILE};
pub use types::{InstanceConfig, Settings, TransportKind};
