use std::path::{Path, PathBuf};

/// File layout of the supervisord instance owned by one gantry state dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorPaths {
	state_dir: PathBuf,
}

impl SupervisorPaths {
	pub fn new(state_dir: impl Into<PathBuf>) -> Self {
		Self {
			state_dir: state_dir.into(),
		}
	}

	pub fn state_dir(&self) -> &Path {
		&self.state_dir
	}

	pub fn supervisor_dir(&self) -> PathBuf {
		self.state_dir.join("supervisor")
	}

	pub fn conf_path(&self) -> PathBuf {
		self.supervisor_dir().join("supervisord.conf")
	}

	/// Directory holding per-instance fragment dirs and group fragments.
	pub fn conf_dir(&self) -> PathBuf {
		self.supervisor_dir().join("supervisord.conf.d")
	}

	pub fn socket_path(&self) -> PathBuf {
		self.supervisor_dir().join("supervisor.sock")
	}

	pub fn pid_path(&self) -> PathBuf {
		self.supervisor_dir().join("supervisord.pid")
	}

	pub fn log_path(&self) -> PathBuf {
		self.supervisor_dir().join("supervisord.log")
	}

	pub fn instance_conf_dir(&self, instance_name: &str) -> PathBuf {
		self.conf_dir().join(format!("{}.d", instance_name))
	}

	pub fn group_conf_path(&self, instance_name: &str) -> PathBuf {
		self.conf_dir().join(format!("group_{}.conf", instance_name))
	}
}
