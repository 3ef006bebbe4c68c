use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gantry_supervisord::clap::DaemonCommand;

#[derive(Debug, Parser)]
#[command(name = "gantryctl", version, about = "Run multi-instance services under supervisord")]
pub struct Cli {
	/// State directory (default: $GANTRY_STATE_DIR or ~/.local/state/gantry)
	#[arg(long, global = true, value_name = "DIR")]
	pub state_dir: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Register service config files
	Register {
		#[arg(required = true)]
		files: Vec<PathBuf>,
	},
	/// Deregister service config files
	Deregister {
		#[arg(required = true)]
		files: Vec<PathBuf>,
	},
	/// List registered config files
	Configs,
	/// List registered instances
	Instances,
	/// Reconcile supervisord fragments with the registered configs
	Update,
	/// Start instances (all when none given)
	Start {
		/// Run supervisord attached to this terminal
		#[arg(short = 'f', long)]
		foreground: bool,
		instances: Vec<String>,
	},
	/// Stop instances, shutting supervisord down once nothing runs
	Stop { instances: Vec<String> },
	/// Restart instances
	Restart { instances: Vec<String> },
	/// Restart every program and reload uwsgi workers
	Reload { instances: Vec<String> },
	/// Restart only what needs it, waiting for web servers to come back
	Graceful { instances: Vec<String> },
	/// Show program status
	Status,
	/// Follow the logs of one instance
	Follow { instances: Vec<String> },
	/// Shut supervisord down
	Shutdown,
	/// Pass arguments through to supervisorctl
	Supervisorctl {
		#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
		args: Vec<String>,
	},
	/// Manage the supervisord process
	Daemon {
		#[command(subcommand)]
		command: DaemonCommand,
	},
}

impl Command {
	/// Commands that bring supervisord up before running.
	pub fn starts_daemon(&self) -> bool {
		matches!(
			self,
			Command::Start { .. } | Command::Restart { .. } | Command::Reload { .. } | Command::Graceful { .. }
		)
	}
}
