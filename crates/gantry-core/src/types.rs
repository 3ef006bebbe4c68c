use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_INSTANCE_NAME: &str = "_default_";
pub const DEFAULT_UMASK: &str = "022";

/// Kind of managed program. Decides the fragment profile and how the program
/// behaves under `reload` and `graceful`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceType {
	Gunicorn,
	Celery,
	CeleryBeat,
	Standalone,
	Paste,
	Uwsgi,
	/// Declared with a kind gantry has no fragment profile for. Kept so the
	/// declaration round-trips; fragment generation rejects it.
	Unknown(String),
}

impl ServiceType {
	pub fn as_str(&self) -> &str {
		match self {
			ServiceType::Gunicorn => "gunicorn",
			ServiceType::Celery => "celery",
			ServiceType::CeleryBeat => "celery-beat",
			ServiceType::Standalone => "standalone",
			ServiceType::Paste => "paste",
			ServiceType::Uwsgi => "uwsgi",
			ServiceType::Unknown(name) => name,
		}
	}

	/// uwsgi programs are never members of an instance group.
	pub fn is_grouped(&self) -> bool {
		!matches!(self, ServiceType::Uwsgi)
	}

	/// Command template used when a declared service omits `command`.
	pub fn default_command(&self) -> Option<&'static str> {
		match self {
			ServiceType::Gunicorn => Some(
				"gunicorn --name {program_name} --bind {bind_address}:{bind_port} --chdir {app_root} app:app",
			),
			ServiceType::Celery => {
				Some("celery --app app.celery worker --loglevel INFO --hostname {program_name}@%h")
			}
			ServiceType::CeleryBeat => Some(
				"celery --app app.celery beat --loglevel INFO --schedule {state_dir}/celery-beat-schedule",
			),
			ServiceType::Standalone => Some(
				"python -m app.main -c {config_file} --server-name={server_name}{attach_to_pool_opt}",
			),
			ServiceType::Paste => Some("paster serve {config_file} --server-name={server_name}"),
			ServiceType::Uwsgi => Some("uwsgi --ini {config_file} --master"),
			ServiceType::Unknown(_) => None,
		}
	}
}

impl From<String> for ServiceType {
	fn from(s: String) -> Self {
		match s.as_str() {
			"gunicorn" => ServiceType::Gunicorn,
			"celery" => ServiceType::Celery,
			"celery-beat" => ServiceType::CeleryBeat,
			"standalone" => ServiceType::Standalone,
			"paste" => ServiceType::Paste,
			"uwsgi" => ServiceType::Uwsgi,
			_ => ServiceType::Unknown(s),
		}
	}
}

impl From<&str> for ServiceType {
	fn from(s: &str) -> Self {
		ServiceType::from(s.to_string())
	}
}

impl From<ServiceType> for String {
	fn from(t: ServiceType) -> Self {
		t.as_str().to_string()
	}
}

impl fmt::Display for ServiceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Identity of a service within the declared state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
	pub config_type: String,
	pub service_type: ServiceType,
	pub service_name: String,
}

/// One managed program. Never mutated in place: a changed attribute shows up
/// in the next diff as an updated service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
	pub config_type: String,
	pub service_type: ServiceType,
	pub service_name: String,
	pub command: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bind_address: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bind_port: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub umask: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub server_pool: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub readiness_port: Option<u16>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub environment: BTreeMap<String, String>,
}

impl Service {
	pub fn new(
		config_type: impl Into<String>,
		service_type: ServiceType,
		service_name: impl Into<String>,
		command: impl Into<String>,
	) -> Self {
		Self {
			config_type: config_type.into(),
			service_type,
			service_name: service_name.into(),
			command: command.into(),
			bind_address: None,
			bind_port: None,
			umask: None,
			server_pool: None,
			readiness_port: None,
			environment: BTreeMap::new(),
		}
	}

	pub fn key(&self) -> ServiceKey {
		ServiceKey {
			config_type: self.config_type.clone(),
			service_type: self.service_type.clone(),
			service_name: self.service_name.clone(),
		}
	}

	/// `<config_type>_<service_type>_<service_name>`: the stable stem shared by
	/// the fragment file name and the in-group process name.
	pub fn stem(&self) -> String {
		format!("{}_{}_{}", self.config_type, self.service_type, self.service_name)
	}

	pub fn fragment_file_name(&self) -> String {
		format!("{}.conf", self.stem())
	}

	/// Port probed by the readiness poll; falls back to the bind port.
	pub fn readiness_port(&self) -> Option<u16> {
		self.readiness_port.or(self.bind_port)
	}
}

/// Resolved per-config attributes embedded into every generated fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribs {
	pub app_root: PathBuf,
	pub log_dir: PathBuf,
	#[serde(default = "default_umask")]
	pub umask: String,
}

fn default_umask() -> String {
	DEFAULT_UMASK.to_string()
}

/// One declared config file. The `update_*`/`remove_services` markers are only
/// populated on the copy handed out by `determine_config_changes`; persisted
/// snapshots never carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
	pub config_type: String,
	pub instance_name: String,
	pub attribs: Attribs,
	#[serde(default)]
	pub services: Vec<Service>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub update_attribs: Option<Attribs>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub update_instance_name: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub update_services: Vec<Service>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub remove_services: Vec<Service>,
}

impl Config {
	pub fn new(
		config_type: impl Into<String>,
		instance_name: impl Into<String>,
		attribs: Attribs,
		services: Vec<Service>,
	) -> Self {
		Self {
			config_type: config_type.into(),
			instance_name: instance_name.into(),
			attribs,
			services,
			update_attribs: None,
			update_instance_name: None,
			update_services: Vec::new(),
			remove_services: Vec::new(),
		}
	}

	pub fn effective_attribs(&self) -> &Attribs {
		self.update_attribs.as_ref().unwrap_or(&self.attribs)
	}

	pub fn effective_instance_name(&self) -> &str {
		self.update_instance_name.as_deref().unwrap_or(&self.instance_name)
	}

	pub fn has_changes(&self) -> bool {
		self.update_attribs.is_some()
			|| self.update_instance_name.is_some()
			|| !self.update_services.is_empty()
			|| !self.remove_services.is_empty()
	}

	/// The snapshot persisted once this config has been reconciled.
	pub fn applied(&self) -> Config {
		Config::new(
			self.config_type.clone(),
			self.effective_instance_name(),
			self.effective_attribs().clone(),
			self.services.clone(),
		)
	}
}

pub type ConfigMap = BTreeMap<PathBuf, Config>;

/// Global part of a diff between the persisted state and the declared files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
	/// Deregistered configs, with the snapshot that was last applied.
	pub remove_configs: BTreeMap<PathBuf, Config>,
	/// Instance names no config references any more.
	pub remove_instances: BTreeSet<String>,
	/// Instance names whose group membership must be rewritten.
	pub changed_instances: BTreeSet<String>,
}

impl ChangeSet {
	pub fn is_empty(&self) -> bool {
		self.remove_configs.is_empty()
			&& self.remove_instances.is_empty()
			&& self.changed_instances.is_empty()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredService {
	pub instance_name: String,
	pub service: Service,
}
