pub mod paths;
pub mod client;
pub mod daemon;
pub mod status;

#[cfg(feature = "clap")]
pub mod clap;

pub use paths::SupervisorPaths;
pub use client::{ClientError, CommandStatus, ControlClient, Supervisorctl};
pub use daemon::{DaemonError, Supervisord};
pub use status::{ProcessInfo, ProcessState};
