//! supervisord program and group fragments.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use gantry_core::template::{self, Vars};
use gantry_core::{Attribs, Service, ServiceType};
use gantry_supervisord::SupervisorPaths;

use crate::error::{ManagerError, Result};

const HEADER: &str = ";\n; This file is maintained by gantry - CHANGES WILL BE OVERWRITTEN\n;\n";

/// How programs are named and addressed, depending on whether supervisor
/// groups are in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Naming {
	use_group: bool,
}

impl Naming {
	pub fn new(use_group: bool) -> Self {
		Self { use_group }
	}

	pub fn use_group(&self) -> bool {
		self.use_group
	}

	/// `<instance>_<stem>` with groups, the bare service name without.
	pub fn program_name(&self, instance: &str, service: &Service) -> String {
		if self.use_group {
			format!("{}_{}", instance, service.stem())
		} else {
			service.service_name.clone()
		}
	}

	/// In-group process name override.
	pub fn process_name(&self, service: &Service) -> Option<String> {
		(self.use_group && service.service_type.is_grouped()).then(|| service.stem())
	}

	/// Name supervisorctl knows the service by.
	pub fn control_target(&self, instance: &str, service: &Service) -> String {
		match self.process_name(service) {
			Some(process) => format!("{}:{}", instance, process),
			None => self.program_name(instance, service),
		}
	}

	/// Target covering every grouped program of an instance.
	pub fn group_target(&self, instance: &str) -> String {
		if self.use_group {
			format!("{}:*", instance)
		} else {
			"all".to_string()
		}
	}

	pub fn log_file(&self, log_dir: &Path, instance: &str, service: &Service) -> PathBuf {
		log_dir.join(format!("{}.log", self.program_name(instance, service)))
	}
}

/// Per-kind program settings.
struct Profile {
	start_secs: u32,
	stop_wait_secs: u32,
	umask: bool,
	stop_signal: Option<&'static str>,
}

fn profile(service: &Service) -> Result<Profile> {
	let (start_secs, stop_wait_secs, umask, stop_signal) = match &service.service_type {
		ServiceType::Gunicorn => (15, 65, true, None),
		ServiceType::Celery | ServiceType::CeleryBeat => (10, 10, true, None),
		ServiceType::Standalone => (20, 65, false, None),
		ServiceType::Paste => (20, 65, true, None),
		ServiceType::Uwsgi => (10, 65, true, Some("INT")),
		ServiceType::Unknown(kind) => {
			return Err(ManagerError::UnknownServiceType {
				service_type: kind.clone(),
				service: service.service_name.clone(),
			})
		}
	};
	Ok(Profile {
		start_secs,
		stop_wait_secs,
		umask,
		stop_signal,
	})
}

/// Inputs for one program fragment.
#[derive(Debug, Clone, Copy)]
pub struct ProgramFragment<'a> {
	pub config_file: &'a Path,
	pub instance_name: &'a str,
	pub attribs: &'a Attribs,
	pub service: &'a Service,
}

impl ProgramFragment<'_> {
	pub fn file_name(&self) -> String {
		self.service.fragment_file_name()
	}

	fn umask(&self) -> &str {
		self.service.umask.as_deref().unwrap_or(&self.attribs.umask)
	}

	pub fn template_vars(&self, naming: Naming, paths: &SupervisorPaths) -> Vars {
		let service = self.service;
		let program_name = naming.program_name(self.instance_name, service);
		let log_file = naming.log_file(&self.attribs.log_dir, self.instance_name, service);

		let mut vars = Vars::new();
		vars.insert("log_file", log_file.display().to_string());
		vars.insert("config_type", service.config_type.clone());
		vars.insert("config_file", self.config_file.display().to_string());
		vars.insert("server_name", service.service_name.clone());
		vars.insert("service_name", service.service_name.clone());
		vars.insert("program_name", program_name);
		vars.insert(
			"attach_to_pool_opt",
			service
				.server_pool
				.as_ref()
				.map(|pool| format!(" --attach-to-pool={}", pool))
				.unwrap_or_default(),
		);
		vars.insert(
			"bind_address",
			service.bind_address.clone().unwrap_or_else(|| "localhost".to_string()),
		);
		if let Some(port) = service.bind_port {
			vars.insert("bind_port", port.to_string());
		}
		if let Some(port) = service.readiness_port() {
			vars.insert("readiness_port", port.to_string());
		}
		vars.insert("umask", self.umask().to_string());
		vars.insert("app_root", self.attribs.app_root.display().to_string());
		vars.insert("log_dir", self.attribs.log_dir.display().to_string());
		vars.insert("state_dir", paths.state_dir().display().to_string());
		vars.insert("supervisor_state_dir", paths.supervisor_dir().display().to_string());
		vars
	}

	/// Renders the whole fragment in memory. Fails before anything touches
	/// disk for an unknown kind or a bad command template.
	pub fn render(&self, naming: Naming, paths: &SupervisorPaths) -> Result<String> {
		let service = self.service;
		let profile = profile(service)?;
		let vars = self.template_vars(naming, paths);
		let command = template::render(&service.command, &vars).map_err(|source| {
			ManagerError::Template {
				service: service.service_name.clone(),
				source,
			}
		})?;

		let mut environment = vec![format!("GANTRY_CONFIG_FILE=\"{}\"", self.config_file.display())];
		environment.extend(
			service
				.environment
				.iter()
				.map(|(key, value)| format!("{}=\"{}\"", key, value.replace('"', "\\\""))),
		);

		let mut out = String::from(HEADER);
		let _ = writeln!(out);
		let _ = writeln!(out, "[program:{}]", naming.program_name(self.instance_name, service));
		let _ = writeln!(out, "command         = {}", command);
		let _ = writeln!(out, "directory       = {}", self.attribs.app_root.display());
		if profile.umask {
			let _ = writeln!(out, "umask           = {}", self.umask());
		}
		let _ = writeln!(out, "autostart       = true");
		let _ = writeln!(out, "autorestart     = true");
		let _ = writeln!(out, "startsecs       = {}", profile.start_secs);
		let _ = writeln!(out, "stopwaitsecs    = {}", profile.stop_wait_secs);
		if let Some(signal) = profile.stop_signal {
			let _ = writeln!(out, "stopsignal      = {}", signal);
		}
		let _ = writeln!(out, "environment     = {}", environment.join(","));
		let _ = writeln!(out, "numprocs        = 1");
		let _ = writeln!(out, "stdout_logfile  = {}", vars["log_file"]);
		let _ = writeln!(out, "redirect_stderr = true");
		if let Some(process_name) = naming.process_name(service) {
			let _ = writeln!(out, "process_name    = {}", process_name);
		}
		Ok(out)
	}
}

pub fn render_group(instance: &str, programs: &[String]) -> String {
	format!(
		"{}\n[group:{}]\nprograms = {}\n",
		HEADER,
		instance,
		programs.join(",")
	)
}
