use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
	#[error("failed to read {}: {source}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed to parse {}: {source}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("service '{service}' in {} has no command and type '{service_type}' has no default", .path.display())]
	MissingCommand {
		path: PathBuf,
		service: String,
		service_type: String,
	},

	#[error("paste service '{service}' in {} needs readiness_port or bind_port", .path.display())]
	MissingReadinessPort { path: PathBuf, service: String },

	#[error("failed to write state file {}: {source}", .path.display())]
	StateWrite {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("corrupt state file {}: {source}", .path.display())]
	StateParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to serialize state: {0}")]
	StateSerialize(#[source] serde_json::Error),

	#[error("{} is not a registered config file", .0.display())]
	NotRegistered(PathBuf),
}
