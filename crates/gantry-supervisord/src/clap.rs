use clap::Subcommand;

use crate::client::{self, ControlClient, Supervisorctl};
use crate::daemon::{DaemonError, Supervisord};
use crate::paths::SupervisorPaths;
use crate::ClientError;

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
	/// Start supervisord in the background
	Start,
	/// Shut supervisord down along with every program it runs
	Stop,
	/// Show whether supervisord is running
	Status,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonCommandError {
	#[error(transparent)]
	Daemon(#[from] DaemonError),
	#[error(transparent)]
	Client(#[from] ClientError),
}

impl DaemonCommand {
	pub fn execute(&self, paths: &SupervisorPaths) -> Result<(), DaemonCommandError> {
		match self {
			DaemonCommand::Start => {
				if client::is_running(paths) {
					eprintln!("supervisord already running");
					return Ok(());
				}
				Supervisord::new(paths.clone(), false).ensure_running()?;
				eprintln!("supervisord started");
			}
			DaemonCommand::Stop => {
				if !client::is_running(paths) {
					eprintln!("supervisord not running");
					return Ok(());
				}
				Supervisorctl::new(paths.clone()).command(&["shutdown"])?;
			}
			DaemonCommand::Status => {
				if client::is_running(paths) {
					if let Some(pid) = client::read_pid(paths) {
						eprintln!("supervisord running (pid {})", pid);
					} else {
						eprintln!("supervisord running");
					}
				} else {
					eprintln!("supervisord not running");
				}
			}
		}
		Ok(())
	}
}
