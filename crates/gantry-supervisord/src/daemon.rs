use std::io;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use crate::client::{find_executable, is_running};
use crate::paths::SupervisorPaths;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
	#[error("could not find the supervisord executable")]
	ExecutableNotFound,

	#[error("failed to start {}: {source}", .program.display())]
	Spawn {
		program: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("supervisord exited with code {0} during startup, see {1}")]
	ExitedEarly(i32, String),

	#[error("failed to write {}: {source}", .path.display())]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed waiting for supervisord: {0}")]
	Wait(#[source] io::Error),
}

/// Renders the top-level `supervisord.conf`. Includes every instance
/// directory and group fragment under the conf dir.
pub fn render_config(paths: &SupervisorPaths) -> String {
	let conf_dir = paths.conf_dir();
	format!(
		"[unix_http_server]
file = {socket}

[supervisord]
logfile = {log}
pidfile = {pid}
loglevel = info
nodaemon = false

[rpcinterface:supervisor]
supervisor.rpcinterface_factory = supervisor.rpcinterface:make_main_rpcinterface

[supervisorctl]
serverurl = unix://{socket}

[include]
files = {conf_dir}/*.d/*.conf {conf_dir}/*.conf
",
		socket = paths.socket_path().display(),
		log = paths.log_path().display(),
		pid = paths.pid_path().display(),
		conf_dir = conf_dir.display(),
	)
}

/// Owns the supervisord process for one state dir.
#[derive(Debug)]
pub struct Supervisord {
	paths: SupervisorPaths,
	foreground: bool,
	poll_interval: Duration,
	child: Option<Child>,
}

impl Supervisord {
	pub fn new(paths: SupervisorPaths, foreground: bool) -> Self {
		Self {
			paths,
			foreground,
			poll_interval: DEFAULT_POLL_INTERVAL,
			child: None,
		}
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	pub fn is_running(&self) -> bool {
		is_running(&self.paths)
	}

	pub fn write_config(&self) -> Result<(), DaemonError> {
		for dir in [self.paths.supervisor_dir(), self.paths.conf_dir()] {
			std::fs::create_dir_all(&dir).map_err(|source| DaemonError::Write { path: dir, source })?;
		}
		let path = self.paths.conf_path();
		std::fs::write(&path, render_config(&self.paths))
			.map_err(|source| DaemonError::Write { path, source })
	}

	/// Starts supervisord unless it is already up, then blocks until its pid
	/// file and socket appear. There is no upper bound on the wait.
	pub fn ensure_running(&mut self) -> Result<(), DaemonError> {
		if self.is_running() {
			return Ok(());
		}
		self.write_config()?;

		let exe = find_executable("supervisord").ok_or(DaemonError::ExecutableNotFound)?;
		let mut cmd = Command::new(&exe);
		cmd.arg("-c").arg(self.paths.conf_path());
		if self.foreground {
			cmd.arg("--nodaemon");
		}
		tracing::info!("starting supervisord ({})", self.paths.conf_path().display());
		let mut child = cmd.spawn().map_err(|source| DaemonError::Spawn {
			program: exe.clone(),
			source,
		})?;

		while !(self.paths.pid_path().exists() && self.paths.socket_path().exists()) {
			if let Some(status) = child.try_wait().map_err(DaemonError::Wait)? {
				if !status.success() {
					return Err(DaemonError::ExitedEarly(
						status.code().unwrap_or(-1),
						self.paths.log_path().display().to_string(),
					));
				}
			}
			tracing::debug!("waiting for supervisord to become ready");
			std::thread::sleep(self.poll_interval);
		}

		tracing::info!("supervisord is running");
		self.child = Some(child);
		Ok(())
	}

	/// Releases the daemon handle. A foreground daemon is waited on until it
	/// exits; a backgrounded one is left running.
	pub fn terminate(&mut self) -> Result<(), DaemonError> {
		let Some(mut child) = self.child.take() else {
			return Ok(());
		};
		if self.foreground {
			tracing::info!("waiting for supervisord to exit");
			child.wait().map_err(DaemonError::Wait)?;
		} else {
			// the launcher process exits once supervisord has daemonized
			let _ = child.try_wait();
		}
		Ok(())
	}
}
