//! Parsing of `supervisorctl status` output.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
	Stopped,
	Starting,
	Running,
	Backoff,
	Stopping,
	Exited,
	Fatal,
	Unknown,
}

impl ProcessState {
	pub fn parse(s: &str) -> Self {
		match s {
			"STOPPED" => ProcessState::Stopped,
			"STARTING" => ProcessState::Starting,
			"RUNNING" => ProcessState::Running,
			"BACKOFF" => ProcessState::Backoff,
			"STOPPING" => ProcessState::Stopping,
			"EXITED" => ProcessState::Exited,
			"FATAL" => ProcessState::Fatal,
			_ => ProcessState::Unknown,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ProcessState::Stopped => "STOPPED",
			ProcessState::Starting => "STARTING",
			ProcessState::Running => "RUNNING",
			ProcessState::Backoff => "BACKOFF",
			ProcessState::Stopping => "STOPPING",
			ProcessState::Exited => "EXITED",
			ProcessState::Fatal => "FATAL",
			ProcessState::Unknown => "UNKNOWN",
		}
	}
}

impl fmt::Display for ProcessState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
	pub name: String,
	pub group: Option<String>,
	pub state: ProcessState,
	pub pid: Option<u32>,
}

impl ProcessInfo {
	/// `group:name` when grouped, else the bare name.
	pub fn full_name(&self) -> String {
		match &self.group {
			Some(group) => format!("{}:{}", group, self.name),
			None => self.name.clone(),
		}
	}
}

/// One status line, e.g.
/// `main:app_gunicorn_web   RUNNING   pid 4242, uptime 0:01:02`.
/// Returns `None` for lines that are not process entries (errors, blanks).
pub fn parse_status_line(line: &str) -> Option<ProcessInfo> {
	let mut parts = line.split_whitespace();
	let full_name = parts.next()?;
	let state = parts.next()?;
	if full_name.ends_with(':') || !state.chars().all(|c| c.is_ascii_uppercase()) {
		return None;
	}
	let pid = match (state, parts.next()) {
		("RUNNING", Some("pid")) => parts
			.next()
			.and_then(|p| p.trim_end_matches(',').parse().ok()),
		_ => None,
	};
	let (group, name) = match full_name.split_once(':') {
		Some((group, name)) => (Some(group.to_string()), name.to_string()),
		None => (None, full_name.to_string()),
	};
	Some(ProcessInfo {
		name,
		group,
		state: ProcessState::parse(state),
		pid,
	})
}

pub fn parse_status(output: &str) -> Vec<ProcessInfo> {
	output.lines().filter_map(parse_status_line).collect()
}
