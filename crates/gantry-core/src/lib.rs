pub mod config;
pub mod error;
pub mod state;
pub mod template;
pub mod types;

pub use config::{load_config_file, load_global_config, GlobalConfig, ProcessManagerKind};
pub use error::CoreError;
pub use state::{FileStateStore, StateStore};
pub use types::{
	Attribs, ChangeSet, Config, ConfigMap, RegisteredService, Service, ServiceKey, ServiceType,
	DEFAULT_INSTANCE_NAME,
};
