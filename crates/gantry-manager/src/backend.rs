use std::ops::{Deref, DerefMut};

use gantry_core::ProcessManagerKind;

use crate::error::Result;
use crate::lifecycle::{ManagerOptions, ProcessManager, SupervisorManager};

/// Every process manager gantry can drive.
pub enum Backend {
	Supervisor(SupervisorManager),
}

impl Backend {
	pub fn for_kind(kind: ProcessManagerKind, options: &ManagerOptions) -> Result<Self> {
		match kind {
			ProcessManagerKind::Supervisor => Ok(Backend::Supervisor(SupervisorManager::open(options)?)),
		}
	}

	pub fn open(options: &ManagerOptions) -> Result<Self> {
		Self::for_kind(options.settings.process_manager.kind, options)
	}

	fn inner(&mut self) -> &mut dyn ProcessManager {
		match self {
			Backend::Supervisor(manager) => manager,
		}
	}
}

impl ProcessManager for Backend {
	fn update(&mut self) -> Result<()> {
		self.inner().update()
	}

	fn start(&mut self, instance_names: &[String]) -> Result<()> {
		self.inner().start(instance_names)
	}

	fn stop(&mut self, instance_names: &[String]) -> Result<()> {
		self.inner().stop(instance_names)
	}

	fn restart(&mut self, instance_names: &[String]) -> Result<()> {
		self.inner().restart(instance_names)
	}

	fn reload(&mut self, instance_names: &[String]) -> Result<()> {
		self.inner().reload(instance_names)
	}

	fn graceful(&mut self, instance_names: &[String]) -> Result<()> {
		self.inner().graceful(instance_names)
	}

	fn status(&mut self) -> Result<()> {
		self.inner().status()
	}

	fn follow(&mut self, instance_names: &[String]) -> Result<()> {
		self.inner().follow(instance_names)
	}

	fn shutdown(&mut self) -> Result<()> {
		self.inner().shutdown()
	}

	fn terminate(&mut self) -> Result<()> {
		self.inner().terminate()
	}
}

/// Scoped handle on a backend: `terminate` runs when the guard drops, on
/// every exit path.
pub struct ProcessManagerGuard<P: ProcessManager = Backend> {
	manager: P,
}

impl<P: ProcessManager> ProcessManagerGuard<P> {
	pub fn new(manager: P) -> Self {
		Self { manager }
	}
}

impl<P: ProcessManager> Deref for ProcessManagerGuard<P> {
	type Target = P;

	fn deref(&self) -> &P {
		&self.manager
	}
}

impl<P: ProcessManager> DerefMut for ProcessManagerGuard<P> {
	fn deref_mut(&mut self) -> &mut P {
		&mut self.manager
	}
}

impl<P: ProcessManager> Drop for ProcessManagerGuard<P> {
	fn drop(&mut self) {
		if let Err(e) = self.manager.terminate() {
			tracing::warn!("failed to release process manager: {}", e);
		}
	}
}

pub fn process_manager(options: &ManagerOptions) -> Result<ProcessManagerGuard> {
	Ok(ProcessManagerGuard::new(Backend::open(options)?))
}

/// Runs `f` against a freshly opened backend and tears it down afterwards.
pub fn with_process_manager<T>(
	options: &ManagerOptions,
	f: impl FnOnce(&mut dyn ProcessManager) -> Result<T>,
) -> Result<T> {
	let mut guard = process_manager(options)?;
	f(&mut *guard)
}
