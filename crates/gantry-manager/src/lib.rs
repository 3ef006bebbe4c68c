//! # gantry-manager
//!
//! Keeps supervisord's program configuration in step with a set of declared
//! service configs, and drives start/stop/reload transitions across them.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gantry_core::config::{config_dir, load_global_config, state_dir};
//! use gantry_manager::{with_process_manager, ManagerOptions};
//!
//! let mut options = ManagerOptions::new(state_dir(), load_global_config(&config_dir()));
//! options.start_daemon = true;
//!
//! with_process_manager(&options, |pm| {
//!     pm.start(&["main".to_string()])?;
//!     pm.graceful(&[])
//! })
//! .unwrap();
//! ```

pub mod backend;
pub mod error;
pub mod fragments;
pub mod lifecycle;
pub mod logs;
pub mod readiness;
pub mod reconcile;

pub use backend::{process_manager, with_process_manager, Backend, ProcessManagerGuard};
pub use error::{ManagerError, Result};
pub use fragments::Naming;
pub use lifecycle::{ManagerOptions, ProcessManager, SupervisorManager};
pub use readiness::ReadinessProbe;
pub use reconcile::{ReconcileReport, Reconciler};
