use crate::error::CoreError;
use crate::types::{Attribs, Config, Service, ServiceType, DEFAULT_INSTANCE_NAME, DEFAULT_UMASK};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "gantry";
pub const GLOBAL_CONFIG_FILE: &str = "gantry.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
	#[serde(default)]
	pub process_manager: ProcessManagerConfig,
	#[serde(default)]
	pub supervisor: SupervisorConfig,
	#[serde(default)]
	pub readiness: ReadinessConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessManagerKind {
	#[default]
	Supervisor,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProcessManagerConfig {
	#[serde(default)]
	pub kind: ProcessManagerKind,
	/// Disables supervisor groups: programs are named after the bare service
	/// name and addressed through `all`.
	#[serde(default)]
	pub single_instance: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
	#[serde(default = "default_daemon_poll_interval")]
	pub daemon_poll_interval_ms: u64,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			daemon_poll_interval_ms: default_daemon_poll_interval(),
		}
	}
}

fn default_daemon_poll_interval() -> u64 {
	500
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
	#[serde(default = "default_readiness_interval")]
	pub interval_ms: u64,
	#[serde(default = "default_readiness_timeout")]
	pub timeout_secs: u64,
	#[serde(default = "default_readiness_host")]
	pub host: String,
	#[serde(default = "default_readiness_path")]
	pub path: String,
}

impl Default for ReadinessConfig {
	fn default() -> Self {
		Self {
			interval_ms: default_readiness_interval(),
			timeout_secs: default_readiness_timeout(),
			host: default_readiness_host(),
			path: default_readiness_path(),
		}
	}
}

fn default_readiness_interval() -> u64 {
	1000
}
fn default_readiness_timeout() -> u64 {
	5
}
fn default_readiness_host() -> String {
	"localhost".to_string()
}
fn default_readiness_path() -> String {
	"/".to_string()
}

/// Loads `gantry.toml` from `config_dir`. A missing file yields the defaults;
/// an unreadable or malformed one is reported and ignored.
pub fn load_global_config(config_dir: &Path) -> GlobalConfig {
	let path = config_dir.join(GLOBAL_CONFIG_FILE);
	if path.exists() {
		match std::fs::read_to_string(&path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(config) => return config,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	GlobalConfig::default()
}

pub fn state_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("GANTRY_STATE_DIR") {
		PathBuf::from(dir)
	} else if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".local").join("state").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME)
	}
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".config").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME).join("config")
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

// Declared service config files.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
	#[serde(default = "default_config_type")]
	config_type: String,
	instance_name: Option<String>,
	#[serde(default)]
	attribs: AttribsDef,
	#[serde(default)]
	services: BTreeMap<String, ServiceDef>,
}

fn default_config_type() -> String {
	"app".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AttribsDef {
	app_root: Option<PathBuf>,
	log_dir: Option<PathBuf>,
	umask: Option<String>,
}

/// `worker = "celery"` or a full `[services.worker]` table.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServiceDef {
	Kind(String),
	Full(ServiceTable),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceTable {
	#[serde(rename = "type")]
	service_type: String,
	command: Option<String>,
	bind_address: Option<String>,
	bind_port: Option<u16>,
	umask: Option<String>,
	server_pool: Option<String>,
	readiness_port: Option<u16>,
	#[serde(default)]
	environment: BTreeMap<String, String>,
}

const DEFAULT_BIND_ADDRESS: &str = "localhost";
const DEFAULT_GUNICORN_PORT: u16 = 8080;

/// Parses one declared config file into its `Config`. Relative paths in
/// `[attribs]` resolve against the file's directory; `log_dir` defaults to
/// `<state_dir>/log`.
pub fn load_config_file(path: &Path, state_dir: &Path) -> Result<Config, CoreError> {
	let content = std::fs::read_to_string(path).map_err(|source| CoreError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	let file: ConfigFile = toml::from_str(&content).map_err(|source| CoreError::Parse {
		path: path.to_path_buf(),
		source,
	})?;

	let base = path.parent().unwrap_or(Path::new("/"));
	let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
	let attribs = Attribs {
		app_root: file.attribs.app_root.map(resolve).unwrap_or_else(|| base.to_path_buf()),
		log_dir: file
			.attribs
			.log_dir
			.map(resolve)
			.unwrap_or_else(|| state_dir.join("log")),
		umask: file.attribs.umask.unwrap_or_else(|| DEFAULT_UMASK.to_string()),
	};

	let mut services = Vec::with_capacity(file.services.len());
	for (name, def) in file.services {
		let table = match def {
			ServiceDef::Kind(kind) => ServiceTable {
				service_type: kind,
				command: None,
				bind_address: None,
				bind_port: None,
				umask: None,
				server_pool: None,
				readiness_port: None,
				environment: BTreeMap::new(),
			},
			ServiceDef::Full(table) => table,
		};
		services.push(build_service(path, &file.config_type, name, table)?);
	}

	Ok(Config::new(
		file.config_type,
		file.instance_name.unwrap_or_else(|| DEFAULT_INSTANCE_NAME.to_string()),
		attribs,
		services,
	))
}

fn build_service(
	path: &Path,
	config_type: &str,
	name: String,
	table: ServiceTable,
) -> Result<Service, CoreError> {
	let service_type = ServiceType::from(table.service_type);
	let command = match table.command {
		Some(command) => command,
		None => service_type
			.default_command()
			.map(str::to_string)
			.ok_or_else(|| CoreError::MissingCommand {
				path: path.to_path_buf(),
				service: name.clone(),
				service_type: service_type.to_string(),
			})?,
	};

	let mut service = Service::new(config_type, service_type, name, command);
	service.bind_address = table.bind_address;
	service.bind_port = table.bind_port;
	service.umask = table.umask;
	service.server_pool = table.server_pool;
	service.readiness_port = table.readiness_port;
	service.environment = table.environment;

	match service.service_type {
		ServiceType::Gunicorn => {
			service.bind_address.get_or_insert_with(|| DEFAULT_BIND_ADDRESS.to_string());
			service.bind_port.get_or_insert(DEFAULT_GUNICORN_PORT);
		}
		ServiceType::Paste if service.readiness_port().is_none() => {
			return Err(CoreError::MissingReadinessPort {
				path: path.to_path_buf(),
				service: service.service_name,
			});
		}
		_ => {}
	}

	Ok(service)
}
