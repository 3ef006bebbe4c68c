//! Turns a `ChangeSet` into fragment writes and deletions under the
//! supervisord conf dir.
//!
//! Order matters: deregistered configs are cleaned up first, then each config
//! is written, then orphaned instances are removed, the new state is
//! persisted, and finally group fragments are recomputed from the persisted
//! state.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use gantry_core::{ChangeSet, Config, ConfigMap, Service, ServiceKey, StateStore};
use gantry_supervisord::SupervisorPaths;

use crate::error::{IoContext, ManagerError, Result};
use crate::fragments::{render_group, Naming, ProgramFragment};

/// What a reconciliation pass touched on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
	pub written: Vec<PathBuf>,
	pub removed: Vec<PathBuf>,
	/// Fragments that had gone missing for unchanged services.
	pub recreated: Vec<PathBuf>,
	pub groups_written: Vec<PathBuf>,
	pub groups_removed: Vec<PathBuf>,
}

pub struct Reconciler<'a> {
	paths: &'a SupervisorPaths,
	naming: Naming,
}

impl<'a> Reconciler<'a> {
	pub fn new(paths: &'a SupervisorPaths, naming: Naming) -> Self {
		Self { paths, naming }
	}

	pub fn reconcile(
		&self,
		store: &mut dyn StateStore,
		configs: &ConfigMap,
		changes: &ChangeSet,
	) -> Result<ReconcileReport> {
		let mut report = ReconcileReport::default();
		let conf_dir = self.paths.conf_dir();
		std::fs::create_dir_all(&conf_dir).at(&conf_dir)?;

		for (path, config) in &changes.remove_configs {
			tracing::info!("removing services of deregistered config {}", path.display());
			self.remove_fragments(&config.instance_name, &config.services, &mut report)?;
		}

		for (path, config) in configs {
			self.reconcile_config(path, config, &mut report)?;
		}

		for instance in &changes.remove_instances {
			let dir = self.paths.instance_conf_dir(instance);
			tracing::info!("removing instance {}", instance);
			match std::fs::remove_dir_all(&dir) {
				Ok(()) => report.removed.push(dir),
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => return Err(e).at(dir),
			}
			let group = self.paths.group_conf_path(instance);
			if remove_if_exists(&group)? {
				report.groups_removed.push(group);
			}
		}

		store.register_config_changes(configs, changes)?;

		for instance in &changes.changed_instances {
			self.write_group(&*store, instance, &mut report)?;
		}

		Ok(report)
	}

	fn reconcile_config(&self, path: &Path, config: &Config, report: &mut ReconcileReport) -> Result<()> {
		let mut attribs = &config.attribs;
		let mut instance = config.instance_name.as_str();
		let mut full_rewrite = false;

		if let Some(update) = &config.update_attribs {
			tracing::info!("updating all services of {} after attribute changes", path.display());
			attribs = update;
			full_rewrite = true;
		}
		if let Some(renamed) = &config.update_instance_name {
			tracing::info!("moving {} from instance {} to {}", path.display(), instance, renamed);
			let previous = config.services.iter().chain(&config.remove_services);
			self.remove_fragments(instance, previous, report)?;
			instance = renamed.as_str();
			full_rewrite = true;
		}

		let dir = self.paths.instance_conf_dir(instance);
		match std::fs::create_dir(&dir) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
			Err(e) => return Err(e).at(dir),
		}

		let fragment = |service| ProgramFragment {
			config_file: path,
			instance_name: instance,
			attribs,
			service,
		};

		if full_rewrite {
			for service in &config.services {
				report.written.push(self.write_fragment(&dir, fragment(service))?);
			}
		} else {
			for service in &config.update_services {
				report.written.push(self.write_fragment(&dir, fragment(service))?);
			}
			self.remove_fragments(instance, &config.remove_services, report)?;
		}

		let removed: BTreeSet<ServiceKey> = config.remove_services.iter().map(Service::key).collect();
		for service in &config.services {
			if removed.contains(&service.key()) {
				continue;
			}
			let conf = dir.join(service.fragment_file_name());
			if conf.exists() {
				continue;
			}
			match self.write_fragment(&dir, fragment(service)) {
				Ok(conf) => {
					tracing::warn!("recreated missing fragment {}", conf.display());
					report.recreated.push(conf);
				}
				Err(e @ (ManagerError::UnknownServiceType { .. } | ManagerError::Template { .. })) => {
					return Err(e)
				}
				Err(e) => tracing::warn!("failed to recreate {}: {}", conf.display(), e),
			}
		}
		Ok(())
	}

	fn write_fragment(&self, dir: &Path, fragment: ProgramFragment<'_>) -> Result<PathBuf> {
		let content = fragment.render(self.naming, self.paths)?;
		let log_dir = &fragment.attribs.log_dir;
		std::fs::create_dir_all(log_dir).at(log_dir)?;
		let conf = dir.join(fragment.file_name());
		tracing::info!(
			"writing {} for {}",
			conf.display(),
			self.naming.program_name(fragment.instance_name, fragment.service)
		);
		std::fs::write(&conf, content).at(&conf)?;
		Ok(conf)
	}

	fn remove_fragments<'s>(
		&self,
		instance: &str,
		services: impl IntoIterator<Item = &'s Service>,
		report: &mut ReconcileReport,
	) -> Result<()> {
		let dir = self.paths.instance_conf_dir(instance);
		for service in services {
			let conf = dir.join(service.fragment_file_name());
			if remove_if_exists(&conf)? {
				tracing::info!("removed {}", self.naming.program_name(instance, service));
				report.removed.push(conf);
			}
		}
		Ok(())
	}

	fn write_group(&self, store: &dyn StateStore, instance: &str, report: &mut ReconcileReport) -> Result<()> {
		let conf = self.paths.group_conf_path(instance);
		let programs: Vec<String> = store
			.get_registered_services()
			.into_iter()
			.filter(|r| r.instance_name == instance && r.service.service_type.is_grouped())
			.map(|r| self.naming.program_name(instance, &r.service))
			.collect();

		if self.naming.use_group() && !programs.is_empty() {
			tracing::info!("writing group {} ({} program(s))", instance, programs.len());
			std::fs::write(&conf, render_group(instance, &programs)).at(&conf)?;
			report.groups_written.push(conf);
		} else if remove_if_exists(&conf)? {
			tracing::info!("removed group {}", instance);
			report.groups_removed.push(conf);
		}
		Ok(())
	}
}

fn remove_if_exists(path: &Path) -> Result<bool> {
	match std::fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
		Err(e) => Err(e).at(path),
	}
}
