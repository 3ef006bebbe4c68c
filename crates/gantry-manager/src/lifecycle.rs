use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use gantry_core::{FileStateStore, GlobalConfig, Service, ServiceType, StateStore};
use gantry_supervisord::client::find_executable;
use gantry_supervisord::{
	CommandStatus, ControlClient, ProcessState, SupervisorPaths, Supervisord, Supervisorctl,
};

use crate::error::{IoContext, ManagerError, Result};
use crate::fragments::Naming;
use crate::logs;
use crate::readiness::ReadinessProbe;
use crate::reconcile::{ReconcileReport, Reconciler};

/// Lifecycle operations every process manager backend provides.
pub trait ProcessManager {
	/// Reconciles declared state into the backend's configuration.
	fn update(&mut self) -> Result<()>;
	fn start(&mut self, instance_names: &[String]) -> Result<()>;
	fn stop(&mut self, instance_names: &[String]) -> Result<()>;
	fn restart(&mut self, instance_names: &[String]) -> Result<()>;
	fn reload(&mut self, instance_names: &[String]) -> Result<()>;
	fn graceful(&mut self, instance_names: &[String]) -> Result<()>;
	fn status(&mut self) -> Result<()>;
	fn follow(&mut self, instance_names: &[String]) -> Result<()>;
	fn shutdown(&mut self) -> Result<()>;
	/// Releases whatever the backend acquired for this session.
	fn terminate(&mut self) -> Result<()>;
}

/// Settings for one process manager session.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
	pub state_dir: PathBuf,
	/// Launch the control daemon if it is not running.
	pub start_daemon: bool,
	/// Run the control daemon attached; teardown waits for it to exit.
	pub foreground: bool,
	pub settings: GlobalConfig,
}

impl ManagerOptions {
	pub fn new(state_dir: impl Into<PathBuf>, settings: GlobalConfig) -> Self {
		Self {
			state_dir: state_dir.into(),
			start_daemon: false,
			foreground: false,
			settings,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
	Start,
	Stop,
	Restart,
}

impl Transition {
	fn verb(self) -> &'static str {
		match self {
			Transition::Start => "start",
			Transition::Stop => "stop",
			Transition::Restart => "restart",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadMode {
	Reload,
	Graceful,
}

/// supervisord backend.
pub struct SupervisorManager {
	paths: SupervisorPaths,
	naming: Naming,
	store: Box<dyn StateStore>,
	client: Box<dyn ControlClient>,
	daemon: Option<Supervisord>,
	readiness: ReadinessProbe,
	tail: Option<PathBuf>,
}

impl SupervisorManager {
	pub fn new(
		paths: SupervisorPaths,
		store: Box<dyn StateStore>,
		client: Box<dyn ControlClient>,
	) -> Result<Self> {
		let conf_dir = paths.conf_dir();
		std::fs::create_dir_all(&conf_dir).at(&conf_dir)?;
		let naming = Naming::new(!store.single_instance());
		Ok(Self {
			paths,
			naming,
			store,
			client,
			daemon: None,
			readiness: ReadinessProbe::default(),
			tail: find_executable("tail"),
		})
	}

	/// Production wiring: file-backed state, `supervisorctl`, and optionally a
	/// supervisord started on demand.
	pub fn open(options: &ManagerOptions) -> Result<Self> {
		let settings = &options.settings;
		let paths = SupervisorPaths::new(&options.state_dir);
		let store = FileStateStore::open(&options.state_dir, settings.process_manager.single_instance)?;
		let client = Supervisorctl::new(paths.clone());
		let manager = Self::new(paths.clone(), Box::new(store), Box::new(client))?
			.with_readiness(ReadinessProbe::from_config(&settings.readiness));
		if !options.start_daemon {
			return Ok(manager);
		}
		let daemon = Supervisord::new(paths, options.foreground).with_poll_interval(
			Duration::from_millis(settings.supervisor.daemon_poll_interval_ms),
		);
		manager.with_daemon(daemon)
	}

	/// Takes ownership of `daemon`, starting it if needed.
	pub fn with_daemon(mut self, mut daemon: Supervisord) -> Result<Self> {
		daemon.ensure_running()?;
		self.daemon = Some(daemon);
		Ok(self)
	}

	pub fn with_readiness(mut self, readiness: ReadinessProbe) -> Self {
		self.readiness = readiness;
		self
	}

	pub fn with_tail(mut self, tail: Option<PathBuf>) -> Self {
		self.tail = tail;
		self
	}

	/// Reconciles and reports what changed on disk. `update` is this plus a
	/// daemon reload.
	pub fn reconcile(&mut self) -> Result<ReconcileReport> {
		let (configs, changes) = self.store.determine_config_changes()?;
		Reconciler::new(&self.paths, self.naming).reconcile(self.store.as_mut(), &configs, &changes)
	}

	/// Log files of one instance, for `follow`.
	pub fn log_files(&self, instance_name: &str) -> Result<Vec<PathBuf>> {
		let configs = self.store.get_instance_configs(instance_name);
		if configs.is_empty() {
			return Err(ManagerError::UnknownInstance(instance_name.to_string()));
		}
		Ok(logs::instance_log_files(self.naming, &configs))
	}

	fn supervisorctl(&self, args: &[&str]) -> Result<CommandStatus> {
		if !self.client.is_running() {
			tracing::warn!("supervisord is not running");
			return Ok(CommandStatus::NotRunning);
		}
		let status = self.client.command(args)?;
		if let CommandStatus::Failed(code) = status {
			tracing::warn!("supervisorctl {} exited with code {}", args.join(" "), code);
		}
		Ok(status)
	}

	/// Splits `names` into registered instances and unknown names. No names
	/// means every registered instance.
	fn instance_names(&self, names: &[String]) -> Result<(Vec<String>, Vec<String>)> {
		let registered = self.store.get_registered_instances();
		if names.is_empty() {
			if registered.is_empty() {
				return Err(ManagerError::NoInstances);
			}
			return Ok((registered, Vec::new()));
		}
		Ok(names.iter().cloned().partition(|name| registered.contains(name)))
	}

	/// Fails before any reconciliation when no names are given and no config
	/// file is registered at all.
	fn ensure_declared(&self, names: &[String]) -> Result<()> {
		if !names.is_empty() {
			return Ok(());
		}
		let (configs, _) = self.store.determine_config_changes()?;
		if configs.is_empty() {
			return Err(ManagerError::NoInstances);
		}
		Ok(())
	}

	fn transition(&mut self, transition: Transition, names: &[String]) -> Result<()> {
		self.ensure_declared(names)?;
		self.update()?;
		let (instances, unknown) = self.instance_names(names)?;
		let verb = transition.verb();
		for instance in &instances {
			tracing::info!("{} {}", verb, instance);
			self.supervisorctl(&[verb, &self.naming.group_target(instance)])?;
			for service in self.store.get_instance_services(instance) {
				if !service.service_type.is_grouped() {
					self.supervisorctl(&[verb, &self.naming.control_target(instance, &service)])?;
				}
			}
		}
		for name in &unknown {
			tracing::info!("{} {} (not a registered instance)", verb, name);
			self.supervisorctl(&[verb, name])?;
		}
		Ok(())
	}

	fn reload_instances(&mut self, mode: ReloadMode, names: &[String]) -> Result<()> {
		self.ensure_declared(names)?;
		self.update()?;
		let (instances, _) = self.instance_names(names)?;
		for instance in &instances {
			if mode == ReloadMode::Reload {
				self.supervisorctl(&["restart", &self.naming.group_target(instance)])?;
			}
			for service in self.store.get_instance_services(instance) {
				let target = self.naming.control_target(instance, &service);
				match (&service.service_type, mode) {
					(ServiceType::Uwsgi, _) => self.send_hup(&target),
					(ServiceType::Standalone, ReloadMode::Graceful) => {
						self.supervisorctl(&["restart", &target])?;
					}
					(ServiceType::Paste, ReloadMode::Graceful) => {
						self.supervisorctl(&["restart", &target])?;
						self.wait_until_ready(&service)?;
					}
					_ => {}
				}
			}
		}
		Ok(())
	}

	fn wait_until_ready(&self, service: &Service) -> Result<()> {
		let port = service
			.readiness_port()
			.ok_or_else(|| ManagerError::NoReadinessPort(service.service_name.clone()))?;
		self.readiness.wait_until_ready(port)
	}

	/// Asks a uwsgi master to reload its workers. Failures are logged and the
	/// caller carries on.
	fn send_hup(&self, target: &str) {
		if !self.client.is_running() {
			tracing::warn!("supervisord is not running");
			return;
		}
		let pid = match self.client.process_info(target) {
			Ok(info) => info.pid,
			Err(e) => {
				tracing::warn!("Attempt to reload {} failed: {}", target, e);
				return;
			}
		};
		let Some(pid) = pid else {
			tracing::warn!("Attempt to reload {} failed: process is not running", target);
			return;
		};
		match i32::try_from(pid) {
			Ok(raw) => match kill(Pid::from_raw(raw), Signal::SIGHUP) {
				Ok(()) => tracing::info!("{}: sent HUP signal", target),
				Err(e) => tracing::warn!("Attempt to reload {} failed: {}", target, e),
			},
			Err(e) => tracing::warn!("Attempt to reload {} failed: {}", target, e),
		}
	}

	/// Shuts supervisord down once every process it knows is stopped.
	fn shutdown_if_idle(&self) -> Result<()> {
		if !self.client.is_running() {
			return Ok(());
		}
		let processes = self.client.all_process_info()?;
		if processes.iter().all(|p| p.state == ProcessState::Stopped) {
			tracing::info!("All processes stopped, supervisord will exit");
			self.supervisorctl(&["shutdown"])?;
		} else {
			tracing::info!("Not all processes stopped, supervisord not shut down");
		}
		Ok(())
	}
}

impl ProcessManager for SupervisorManager {
	fn update(&mut self) -> Result<()> {
		self.reconcile()?;
		if self.client.is_running() {
			self.supervisorctl(&["update"])?;
		}
		Ok(())
	}

	fn start(&mut self, instance_names: &[String]) -> Result<()> {
		self.transition(Transition::Start, instance_names)?;
		self.status()
	}

	fn stop(&mut self, instance_names: &[String]) -> Result<()> {
		self.transition(Transition::Stop, instance_names)?;
		self.shutdown_if_idle()
	}

	fn restart(&mut self, instance_names: &[String]) -> Result<()> {
		self.transition(Transition::Restart, instance_names)
	}

	fn reload(&mut self, instance_names: &[String]) -> Result<()> {
		self.reload_instances(ReloadMode::Reload, instance_names)
	}

	fn graceful(&mut self, instance_names: &[String]) -> Result<()> {
		self.reload_instances(ReloadMode::Graceful, instance_names)
	}

	fn status(&mut self) -> Result<()> {
		self.supervisorctl(&["status"])?;
		Ok(())
	}

	fn follow(&mut self, instance_names: &[String]) -> Result<()> {
		let instances = if instance_names.is_empty() {
			self.instance_names(&[])?.0
		} else {
			instance_names.to_vec()
		};
		if instances.len() != 1 {
			return Err(ManagerError::FollowMultiple(instances));
		}
		let files = self.log_files(&instances[0])?;
		let tail = self.tail.as_deref().ok_or(ManagerError::TailNotFound)?;
		logs::follow(tail, &files)
	}

	fn shutdown(&mut self) -> Result<()> {
		self.supervisorctl(&["shutdown"])?;
		Ok(())
	}

	fn terminate(&mut self) -> Result<()> {
		if let Some(daemon) = self.daemon.as_mut() {
			daemon.terminate()?;
		}
		Ok(())
	}
}
