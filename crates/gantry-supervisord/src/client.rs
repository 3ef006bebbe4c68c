use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::paths::SupervisorPaths;
use crate::status::{self, ProcessInfo};

/// `supervisorctl status` exits with 3 when some process is not running.
const STATUS_NOT_ALL_RUNNING: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("could not find the {0} executable")]
	ExecutableNotFound(&'static str),

	#[error("failed to run {}: {source}", .program.display())]
	Spawn {
		program: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("no such process: {0}")]
	NoSuchProcess(String),

	#[error("unexpected supervisorctl output for {name}: {output}")]
	UnexpectedOutput { name: String, output: String },
}

/// Outcome of a control command. Failures are reported, not raised: the
/// caller decides whether a nonzero exit matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
	Success,
	Failed(i32),
	/// Skipped because supervisord is down.
	NotRunning,
}

impl CommandStatus {
	pub fn success(&self) -> bool {
		matches!(self, CommandStatus::Success)
	}
}

/// Seam between the lifecycle logic and the control daemon.
pub trait ControlClient {
	fn is_running(&self) -> bool;

	/// Runs one control command (`start main:*`, `update`, `shutdown`, ...).
	fn command(&self, args: &[&str]) -> Result<CommandStatus, ClientError>;

	/// Live state of one process, addressed as `group:name` or `name`.
	fn process_info(&self, name: &str) -> Result<ProcessInfo, ClientError>;

	fn all_process_info(&self) -> Result<Vec<ProcessInfo>, ClientError>;
}

/// `ControlClient` that shells out to `supervisorctl -c <conf>`.
#[derive(Debug, Clone)]
pub struct Supervisorctl {
	paths: SupervisorPaths,
	executable: Option<PathBuf>,
}

impl Supervisorctl {
	pub fn new(paths: SupervisorPaths) -> Self {
		Self {
			paths,
			executable: find_executable("supervisorctl"),
		}
	}

	pub fn with_executable(paths: SupervisorPaths, executable: PathBuf) -> Self {
		Self {
			paths,
			executable: Some(executable),
		}
	}

	fn base_command(&self) -> Result<Command, ClientError> {
		let exe = self
			.executable
			.as_ref()
			.ok_or(ClientError::ExecutableNotFound("supervisorctl"))?;
		let mut cmd = Command::new(exe);
		cmd.arg("-c").arg(self.paths.conf_path());
		Ok(cmd)
	}

	fn capture(&self, args: &[&str]) -> Result<(i32, String), ClientError> {
		let mut cmd = self.base_command()?;
		let output = cmd
			.args(args)
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.output()
			.map_err(|source| self.spawn_error(source))?;
		Ok((
			output.status.code().unwrap_or(-1),
			String::from_utf8_lossy(&output.stdout).into_owned(),
		))
	}

	fn spawn_error(&self, source: io::Error) -> ClientError {
		ClientError::Spawn {
			program: self.executable.clone().unwrap_or_default(),
			source,
		}
	}
}

impl ControlClient for Supervisorctl {
	fn is_running(&self) -> bool {
		is_running(&self.paths)
	}

	fn command(&self, args: &[&str]) -> Result<CommandStatus, ClientError> {
		tracing::debug!("supervisorctl {}", args.join(" "));
		let status = self
			.base_command()?
			.args(args)
			.status()
			.map_err(|source| self.spawn_error(source))?;
		Ok(match status.code() {
			Some(0) => CommandStatus::Success,
			Some(code) => CommandStatus::Failed(code),
			None => CommandStatus::Failed(-1),
		})
	}

	fn process_info(&self, name: &str) -> Result<ProcessInfo, ClientError> {
		let (_, output) = self.capture(&["status", name])?;
		if output.contains("no such process") || output.contains("no such group") {
			return Err(ClientError::NoSuchProcess(name.to_string()));
		}
		status::parse_status(&output)
			.into_iter()
			.next()
			.ok_or_else(|| ClientError::UnexpectedOutput {
				name: name.to_string(),
				output,
			})
	}

	fn all_process_info(&self) -> Result<Vec<ProcessInfo>, ClientError> {
		let (code, output) = self.capture(&["status"])?;
		if code != 0 && code != STATUS_NOT_ALL_RUNNING {
			tracing::warn!("supervisorctl status exited with code {}", code);
		}
		Ok(status::parse_status(&output))
	}
}

/// supervisord is considered up when its pid file and control socket both
/// exist and the recorded pid is alive. Never errors.
pub fn is_running(paths: &SupervisorPaths) -> bool {
	if !paths.socket_path().exists() {
		return false;
	}
	match read_pid(paths) {
		Some(pid) => kill(Pid::from_raw(pid), None).is_ok(),
		None => false,
	}
}

pub fn read_pid(paths: &SupervisorPaths) -> Option<i32> {
	std::fs::read_to_string(paths.pid_path())
		.ok()
		.and_then(|s| s.trim().parse().ok())
		.filter(|pid| *pid > 0)
}

/// Checks the directory of the running executable before `$PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
	let sibling = std::env::current_exe()
		.ok()
		.and_then(|exe| exe.parent().map(|dir| dir.join(name)))
		.filter(|candidate| candidate.is_file());
	sibling.or_else(|| which::which(name).ok())
}
