use std::io;
use std::path::PathBuf;

use gantry_core::template::TemplateError;
use gantry_core::CoreError;
use gantry_supervisord::{ClientError, DaemonError};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
	#[error(transparent)]
	Core(#[from] CoreError),

	#[error(transparent)]
	Client(#[from] ClientError),

	#[error(transparent)]
	Daemon(#[from] DaemonError),

	#[error("command for service '{service}': {source}")]
	Template {
		service: String,
		#[source]
		source: TemplateError,
	},

	#[error("no fragment profile for service type '{service_type}' (service '{service}')")]
	UnknownServiceType { service_type: String, service: String },

	#[error("{}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("No instances registered")]
	NoInstances,

	#[error("unknown instance: {0}")]
	UnknownInstance(String),

	#[error("Only one instance can be followed at a time, got: {}", .0.join(", "))]
	FollowMultiple(Vec<String>),

	#[error("service '{0}' has no readiness port")]
	NoReadinessPort(String),

	#[error("readiness check {url} returned HTTP {status}")]
	ReadinessFailed { url: String, status: u16 },

	#[error("could not find the tail executable")]
	TailNotFound,

	#[error("failed to run tail: {0}")]
	Tail(#[source] io::Error),
}

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;

pub(crate) trait IoContext<T> {
	fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
	fn at(self, path: impl Into<PathBuf>) -> Result<T> {
		self.map_err(|source| ManagerError::Io {
			path: path.into(),
			source,
		})
	}
}
