use std::time::Duration;

use gantry_core::config::ReadinessConfig;

use crate::error::{ManagerError, Result};

/// HTTP readiness poll used after a graceful restart of a paste server.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
	host: String,
	path: String,
	interval: Duration,
	timeout: Duration,
}

impl Default for ReadinessProbe {
	fn default() -> Self {
		Self::from_config(&ReadinessConfig::default())
	}
}

impl ReadinessProbe {
	pub fn new(host: impl Into<String>, path: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
		Self {
			host: host.into(),
			path: path.into(),
			interval,
			timeout,
		}
	}

	pub fn from_config(config: &ReadinessConfig) -> Self {
		Self::new(
			config.host.clone(),
			config.path.clone(),
			Duration::from_millis(config.interval_ms),
			Duration::from_secs(config.timeout_secs),
		)
	}

	pub fn url(&self, port: u16) -> String {
		let path = if self.path.starts_with('/') {
			self.path.clone()
		} else {
			format!("/{}", self.path)
		};
		format!("http://{}:{}{}", self.host, port, path)
	}

	/// Polls until the server answers 200. Connection failures and timeouts
	/// are retried forever; any other status is a hard failure.
	pub fn wait_until_ready(&self, port: u16) -> Result<()> {
		let url = self.url(port);
		let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
		tracing::info!("waiting for {} to become ready", url);

		loop {
			match agent.get(&url).call() {
				Ok(response) if response.status() == 200 => {
					tracing::info!("{} is ready", url);
					return Ok(());
				}
				Ok(response) => return Err(self.failed(url, response.status())),
				Err(ureq::Error::Status(code, _)) => return Err(self.failed(url, code)),
				Err(e) => {
					tracing::debug!("{} not ready yet: {}", url, e);
				}
			}
			std::thread::sleep(self.interval);
		}
	}

	fn failed(&self, url: String, status: u16) -> ManagerError {
		tracing::error!("readiness check {} returned HTTP {}", url, status);
		ManagerError::ReadinessFailed { url, status }
	}
}
