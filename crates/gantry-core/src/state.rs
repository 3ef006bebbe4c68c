//! Declared-state store: which config files are registered, and the snapshot
//! of each one that was last reconciled into supervisord fragments.

use crate::config::load_config_file;
use crate::error::CoreError;
use crate::types::{ChangeSet, Config, ConfigMap, RegisteredService, Service, ServiceKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "configstate.json";

/// Source of declared state for the reconciliation engine.
pub trait StateStore {
	/// Diffs every registered config file against its last applied snapshot.
	fn determine_config_changes(&self) -> Result<(ConfigMap, ChangeSet), CoreError>;

	/// Records a reconciled diff as the new applied state.
	fn register_config_changes(
		&mut self,
		configs: &ConfigMap,
		changes: &ChangeSet,
	) -> Result<(), CoreError>;

	fn get_instance_services(&self, instance_name: &str) -> Vec<Service>;

	fn get_instance_config(&self, instance_name: &str) -> Option<&Config>;

	/// Every applied config declaring services in `instance_name`.
	fn get_instance_configs(&self, instance_name: &str) -> Vec<&Config>;

	fn get_registered_instances(&self) -> Vec<String>;

	fn get_registered_services(&self) -> Vec<RegisteredService>;

	/// Whether supervisor groups are disabled.
	fn single_instance(&self) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
	/// Grouping mode the current fragments were written in.
	#[serde(default)]
	single_instance: Option<bool>,
	/// Registered config files and the snapshot last applied for each.
	#[serde(default)]
	config_files: BTreeMap<PathBuf, Option<Config>>,
	/// Deregistered configs whose fragments are not yet deleted.
	#[serde(default)]
	pending_removals: BTreeMap<PathBuf, Config>,
}

/// `StateStore` persisted as JSON in `<state_dir>/configstate.json`.
#[derive(Debug)]
pub struct FileStateStore {
	state_dir: PathBuf,
	path: PathBuf,
	single_instance: bool,
	state: PersistedState,
}

impl FileStateStore {
	pub fn open(state_dir: impl Into<PathBuf>, single_instance: bool) -> Result<Self, CoreError> {
		let state_dir = state_dir.into();
		let path = state_dir.join(STATE_FILE);
		let state = match std::fs::read_to_string(&path) {
			Ok(content) => serde_json::from_str(&content).map_err(|source| CoreError::StateParse {
				path: path.clone(),
				source,
			})?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
			Err(source) => return Err(CoreError::Read { path, source }),
		};
		Ok(Self {
			state_dir,
			path,
			single_instance,
			state,
		})
	}

	pub fn state_dir(&self) -> &Path {
		&self.state_dir
	}

	/// Validates and records a config file. Registering a path twice is a
	/// no-op. The fragments are written by the next reconciliation.
	pub fn register(&mut self, path: &Path) -> Result<Config, CoreError> {
		let path = canonical(path);
		let config = load_config_file(&path, &self.state_dir)?;
		if self.state.config_files.contains_key(&path) {
			tracing::info!("{} is already registered", path.display());
			return Ok(config);
		}
		tracing::info!(
			"registered {} ({} service(s) for instance {})",
			path.display(),
			config.services.len(),
			config.instance_name
		);
		self.state.config_files.insert(path, None);
		self.save()?;
		Ok(config)
	}

	/// Forgets a config file. Its fragments are removed by the next
	/// reconciliation.
	pub fn deregister(&mut self, path: &Path) -> Result<(), CoreError> {
		let path = canonical(path);
		let Some(applied) = self.state.config_files.remove(&path) else {
			return Err(CoreError::NotRegistered(path));
		};
		if let Some(applied) = applied {
			self.state.pending_removals.insert(path.clone(), applied);
		}
		tracing::info!("deregistered {}", path.display());
		self.save()
	}

	pub fn is_registered(&self, path: &Path) -> bool {
		self.state.config_files.contains_key(&canonical(path))
	}

	/// Registered paths with their last applied snapshot, if any.
	pub fn registered_configs(&self) -> impl Iterator<Item = (&Path, Option<&Config>)> {
		self.state
			.config_files
			.iter()
			.map(|(path, config)| (path.as_path(), config.as_ref()))
	}

	fn applied_configs(&self) -> impl Iterator<Item = &Config> {
		self.state.config_files.values().flatten()
	}

	fn save(&self) -> Result<(), CoreError> {
		std::fs::create_dir_all(&self.state_dir).map_err(|source| CoreError::StateWrite {
			path: self.state_dir.clone(),
			source,
		})?;
		let data = serde_json::to_string_pretty(&self.state).map_err(CoreError::StateSerialize)?;
		std::fs::write(&self.path, data).map_err(|source| CoreError::StateWrite {
			path: self.path.clone(),
			source,
		})
	}
}

impl StateStore for FileStateStore {
	fn determine_config_changes(&self) -> Result<(ConfigMap, ChangeSet), CoreError> {
		let mode_changed = self
			.state
			.single_instance
			.is_some_and(|applied| applied != self.single_instance);

		let mut configs = ConfigMap::new();
		let mut changes = ChangeSet {
			remove_configs: self.state.pending_removals.clone(),
			..ChangeSet::default()
		};
		let mut previous_instances: BTreeSet<String> = changes
			.remove_configs
			.values()
			.map(|c| c.instance_name.clone())
			.collect();

		for (path, applied) in &self.state.config_files {
			if let Some(applied) = applied {
				previous_instances.insert(applied.instance_name.clone());
			}
			let current = match load_config_file(path, &self.state_dir) {
				Ok(config) => config,
				Err(e) => {
					match applied {
						Some(applied) => {
							tracing::warn!("{e}; keeping last applied state");
							configs.insert(path.clone(), applied.clone());
						}
						None => tracing::warn!("{e}; skipping"),
					}
					continue;
				}
			};
			let config = match applied {
				None => {
					changes.changed_instances.insert(current.instance_name.clone());
					Config {
						update_services: current.services.clone(),
						..current
					}
				}
				Some(applied) => diff_config(applied, current, mode_changed, &mut changes),
			};
			configs.insert(path.clone(), config);
		}

		let current_instances: BTreeSet<String> = configs
			.values()
			.map(|c| c.effective_instance_name().to_string())
			.collect();

		for config in changes.remove_configs.values() {
			changes.changed_instances.insert(config.instance_name.clone());
		}
		if mode_changed {
			changes.changed_instances.extend(current_instances.iter().cloned());
		}
		changes
			.changed_instances
			.retain(|name| current_instances.contains(name));
		changes.remove_instances = previous_instances
			.difference(&current_instances)
			.cloned()
			.collect();

		Ok((configs, changes))
	}

	fn register_config_changes(
		&mut self,
		configs: &ConfigMap,
		changes: &ChangeSet,
	) -> Result<(), CoreError> {
		for (path, config) in configs {
			if let Some(slot) = self.state.config_files.get_mut(path) {
				*slot = Some(config.applied());
			}
		}
		for path in changes.remove_configs.keys() {
			self.state.pending_removals.remove(path);
		}
		self.state.single_instance = Some(self.single_instance);
		self.save()
	}

	fn get_instance_services(&self, instance_name: &str) -> Vec<Service> {
		self.applied_configs()
			.filter(|c| c.instance_name == instance_name)
			.flat_map(|c| c.services.iter().cloned())
			.collect()
	}

	fn get_instance_config(&self, instance_name: &str) -> Option<&Config> {
		self.applied_configs().find(|c| c.instance_name == instance_name)
	}

	fn get_instance_configs(&self, instance_name: &str) -> Vec<&Config> {
		self.applied_configs()
			.filter(|c| c.instance_name == instance_name)
			.collect()
	}

	fn get_registered_instances(&self) -> Vec<String> {
		let names: BTreeSet<&str> = self
			.applied_configs()
			.map(|c| c.instance_name.as_str())
			.collect();
		names.into_iter().map(str::to_string).collect()
	}

	fn get_registered_services(&self) -> Vec<RegisteredService> {
		self.applied_configs()
			.flat_map(|c| {
				c.services.iter().map(|service| RegisteredService {
					instance_name: c.instance_name.clone(),
					service: service.clone(),
				})
			})
			.collect()
	}

	fn single_instance(&self) -> bool {
		self.single_instance
	}
}

/// Compares a freshly loaded config against its applied snapshot. The result
/// carries the applied attribs and instance name with the new values in the
/// `update_*` markers.
fn diff_config(
	applied: &Config,
	current: Config,
	force_rewrite: bool,
	changes: &mut ChangeSet,
) -> Config {
	let mut config = Config::new(
		current.config_type,
		applied.instance_name.clone(),
		applied.attribs.clone(),
		current.services,
	);

	if current.attribs != applied.attribs || force_rewrite {
		config.update_attribs = Some(current.attribs);
	}
	if current.instance_name != applied.instance_name {
		changes.changed_instances.insert(applied.instance_name.clone());
		changes.changed_instances.insert(current.instance_name.clone());
		config.update_instance_name = Some(current.instance_name);
	}

	let old: BTreeMap<ServiceKey, &Service> =
		applied.services.iter().map(|s| (s.key(), s)).collect();
	let new: BTreeSet<ServiceKey> = config.services.iter().map(Service::key).collect();

	config.update_services = config
		.services
		.iter()
		.filter(|s| old.get(&s.key()) != Some(s))
		.cloned()
		.collect();
	config.remove_services = applied
		.services
		.iter()
		.filter(|s| !new.contains(&s.key()))
		.cloned()
		.collect();

	if !config.update_services.is_empty() || !config.remove_services.is_empty() {
		changes
			.changed_instances
			.insert(config.effective_instance_name().to_string());
	}
	config
}

fn canonical(path: &Path) -> PathBuf {
	std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
