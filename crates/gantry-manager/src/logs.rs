use std::path::{Path, PathBuf};
use std::process::Command;

use gantry_core::Config;

use crate::error::{ManagerError, Result};
use crate::fragments::Naming;

/// stdout log of every service declared by `configs`, each under its own
/// config's log dir, in declaration order.
pub fn instance_log_files(naming: Naming, configs: &[&Config]) -> Vec<PathBuf> {
	configs
		.iter()
		.flat_map(|config| {
			config
				.services
				.iter()
				.map(|service| naming.log_file(&config.attribs.log_dir, &config.instance_name, service))
		})
		.collect()
}

/// Runs `tail -f` over `files` until it exits.
pub fn follow(tail: &Path, files: &[PathBuf]) -> Result<()> {
	tracing::debug!("{} -f {} file(s)", tail.display(), files.len());
	let status = Command::new(tail)
		.arg("-f")
		.args(files)
		.status()
		.map_err(ManagerError::Tail)?;
	if !status.success() {
		tracing::warn!("tail exited with {}", status);
	}
	Ok(())
}
