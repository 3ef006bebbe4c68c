mod cli;
mod output;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use gantry_core::config;
use gantry_core::{FileStateStore, StateStore};
use gantry_manager::{process_manager, ManagerOptions, ProcessManager};
use gantry_supervisord::{CommandStatus, ControlClient, SupervisorPaths, Supervisorctl};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() -> ExitCode {
	init_logging();
	let cli = Cli::parse();
	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!("{:#}", e);
			ExitCode::FAILURE
		}
	}
}

fn init_logging() {
	let filter = EnvFilter::try_from_env("GANTRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.without_time()
		.with_writer(std::io::stderr)
		.init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
	let state_dir = cli.state_dir.clone().unwrap_or_else(config::state_dir);
	let settings = config::load_global_config(&config::config_dir());
	let open_store = || {
		FileStateStore::open(&state_dir, settings.process_manager.single_instance)
			.with_context(|| format!("opening state in {}", state_dir.display()))
	};

	match cli.command {
		Command::Register { files } => {
			let mut store = open_store()?;
			for file in &files {
				let config = store.register(file)?;
				eprintln!(
					"Registered {} ({} service(s), instance {})",
					file.display(),
					config.services.len(),
					config.instance_name
				);
			}
		}
		Command::Deregister { files } => {
			let mut store = open_store()?;
			for file in &files {
				store.deregister(file)?;
				eprintln!("Deregistered {}", file.display());
			}
		}
		Command::Configs => output::print_configs(&open_store()?),
		Command::Instances => output::print_instances(&open_store()?.get_registered_instances()),
		Command::Supervisorctl { args } => {
			let client = Supervisorctl::new(SupervisorPaths::new(&state_dir));
			passthrough(&client, &args)?;
		}
		Command::Daemon { command } => command.execute(&SupervisorPaths::new(&state_dir))?,
		command => {
			let mut options = ManagerOptions::new(state_dir, settings);
			options.start_daemon = command.starts_daemon();
			if let Command::Start { foreground, .. } = &command {
				options.foreground = *foreground;
			}
			let mut pm = process_manager(&options)?;
			match command {
				Command::Start { instances, .. } => pm.start(&instances)?,
				Command::Stop { instances } => pm.stop(&instances)?,
				Command::Restart { instances } => pm.restart(&instances)?,
				Command::Reload { instances } => pm.reload(&instances)?,
				Command::Graceful { instances } => pm.graceful(&instances)?,
				Command::Follow { instances } => pm.follow(&instances)?,
				Command::Status => pm.status()?,
				Command::Shutdown => pm.shutdown()?,
				_ => pm.update()?,
			}
		}
	}
	Ok(())
}

/// Runs `supervisorctl <args..>`, failing when it exits nonzero.
fn passthrough(client: &dyn ControlClient, args: &[String]) -> anyhow::Result<()> {
	if !client.is_running() {
		anyhow::bail!("supervisord is not running");
	}
	let args: Vec<&str> = args.iter().map(String::as_str).collect();
	match client.command(&args)? {
		CommandStatus::Success => Ok(()),
		CommandStatus::Failed(code) => anyhow::bail!("supervisorctl exited with code {}", code),
		CommandStatus::NotRunning => anyhow::bail!("supervisord is not running"),
	}
}
