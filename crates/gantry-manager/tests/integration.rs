use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use gantry_core::FileStateStore;
use gantry_manager::{ManagerError, ProcessManager, ReadinessProbe, SupervisorManager};
use gantry_supervisord::{
	ClientError, CommandStatus, ControlClient, ProcessInfo, ProcessState, SupervisorPaths,
};

const APP: &str = r#"
config_type = "app"
instance_name = "main"

[attribs]
app_root = "."
log_dir = "logs"

[services.web]
type = "gunicorn"
bind_port = 8080

[services.worker]
type = "celery"

[services.api]
type = "uwsgi"
"#;

#[derive(Default)]
struct Recorded {
	commands: Vec<Vec<String>>,
	/// Whether the watched path existed each time `update` was sent.
	seen_at_update: Vec<bool>,
}

#[derive(Clone, Default)]
struct StubClient {
	running: bool,
	log: Rc<RefCell<Recorded>>,
	watch: Option<PathBuf>,
	processes: Vec<ProcessInfo>,
}

impl StubClient {
	fn running() -> Self {
		Self {
			running: true,
			..Self::default()
		}
	}

	fn commands(&self) -> Vec<Vec<String>> {
		self.log.borrow().commands.clone()
	}

	fn sent(&self, args: &[&str]) -> bool {
		self.commands().iter().any(|c| c == args)
	}
}

impl ControlClient for StubClient {
	fn is_running(&self) -> bool {
		self.running
	}

	fn command(&self, args: &[&str]) -> Result<CommandStatus, ClientError> {
		let mut log = self.log.borrow_mut();
		if args.first() == Some(&"update") {
			if let Some(watch) = &self.watch {
				log.seen_at_update.push(watch.exists());
			}
		}
		log.commands.push(args.iter().map(|s| s.to_string()).collect());
		Ok(CommandStatus::Success)
	}

	fn process_info(&self, name: &str) -> Result<ProcessInfo, ClientError> {
		self.processes
			.iter()
			.find(|p| p.full_name() == name)
			.cloned()
			.ok_or_else(|| ClientError::NoSuchProcess(name.to_string()))
	}

	fn all_process_info(&self) -> Result<Vec<ProcessInfo>, ClientError> {
		Ok(self.processes.clone())
	}
}

struct Fixture {
	dir: tempfile::TempDir,
	state: PathBuf,
	config: PathBuf,
}

impl Fixture {
	fn new(content: &str) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let state = dir.path().join("state");
		let config = dir.path().join("app.toml");
		std::fs::write(&config, content).unwrap();
		let config = std::fs::canonicalize(config).unwrap();
		Self { dir, state, config }
	}

	fn rewrite(&self, content: &str) {
		std::fs::write(&self.config, content).unwrap();
	}

	fn paths(&self) -> SupervisorPaths {
		SupervisorPaths::new(&self.state)
	}

	fn fragment(&self, instance: &str, stem: &str) -> PathBuf {
		self.paths().instance_conf_dir(instance).join(format!("{}.conf", stem))
	}

	/// Opens the persisted store, registers the fixture config, and wires a
	/// manager around `client`.
	fn manager(&self, client: &StubClient, single_instance: bool) -> SupervisorManager {
		let mut store = FileStateStore::open(&self.state, single_instance).unwrap();
		store.register(&self.config).unwrap();
		SupervisorManager::new(self.paths(), Box::new(store), Box::new(client.clone()))
			.unwrap()
			.with_readiness(ReadinessProbe::new(
				"127.0.0.1",
				"/",
				Duration::from_millis(10),
				Duration::from_secs(1),
			))
	}

	/// Every file under the conf dir with its content.
	fn snapshot(&self) -> BTreeMap<PathBuf, String> {
		let mut files = BTreeMap::new();
		collect(&self.paths().conf_dir(), &mut files);
		files
	}
}

fn collect(dir: &Path, files: &mut BTreeMap<PathBuf, String>) {
	for entry in std::fs::read_dir(dir).unwrap().flatten() {
		let path = entry.path();
		if path.is_dir() {
			collect(&path, files);
		} else {
			files.insert(path.clone(), std::fs::read_to_string(&path).unwrap());
		}
	}
}

fn readiness_server(status: StatusCode) -> u16 {
	let (tx, rx) = std::sync::mpsc::channel();
	std::thread::spawn(move || {
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
			tx.send(listener.local_addr().unwrap().port()).unwrap();
			let app = Router::new().route("/", get(move || async move { status }));
			axum::serve(listener, app).await.unwrap();
		});
	});
	rx.recv().unwrap()
}

/// Serves 200 on a reserved port, but only starts listening after `delay`.
/// The returned receiver yields whether `marker` already existed at bind time.
fn late_readiness_server(delay: Duration, marker: PathBuf) -> (u16, std::sync::mpsc::Receiver<bool>) {
	let port = std::net::TcpListener::bind("127.0.0.1:0")
		.unwrap()
		.local_addr()
		.unwrap()
		.port();
	let (tx, rx) = std::sync::mpsc::channel();
	std::thread::spawn(move || {
		std::thread::sleep(delay);
		let rt = tokio::runtime::Runtime::new().unwrap();
		rt.block_on(async move {
			let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
			tx.send(marker.exists()).unwrap();
			let app = Router::new().route("/", get(|| async { StatusCode::OK }));
			axum::serve(listener, app).await.unwrap();
		});
	});
	(port, rx)
}

fn names(names: &[&str]) -> Vec<String> {
	names.iter().map(|s| s.to_string()).collect()
}

// --- Reconciliation ---

#[test]
fn update_writes_fragments_and_group() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	fx.manager(&client, false).update().unwrap();

	let web = std::fs::read_to_string(fx.fragment("main", "app_gunicorn_web")).unwrap();
	assert!(web.contains("[program:main_app_gunicorn_web]"));
	assert!(web.contains("process_name    = app_gunicorn_web"));
	assert!(fx.fragment("main", "app_celery_worker").exists());
	let api = std::fs::read_to_string(fx.fragment("main", "app_uwsgi_api")).unwrap();
	assert!(api.contains("[program:main_app_uwsgi_api]"));
	assert!(!api.contains("process_name"));

	let group = std::fs::read_to_string(fx.paths().group_conf_path("main")).unwrap();
	assert!(group.contains("[group:main]\nprograms = main_app_gunicorn_web,main_app_celery_worker\n"));
	assert!(fx.dir.path().join("logs").is_dir());
	// daemon down: nothing is sent
	assert!(client.commands().is_empty());
}

#[test]
fn reconcile_is_idempotent() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	let first = manager.reconcile().unwrap();
	assert_eq!(first.written.len(), 3);
	let before = fx.snapshot();

	let second = manager.reconcile().unwrap();
	assert!(second.written.is_empty());
	assert!(second.removed.is_empty());
	assert!(second.recreated.is_empty());
	assert_eq!(fx.snapshot(), before);
}

#[test]
fn missing_fragment_is_recreated() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	manager.reconcile().unwrap();
	let before = fx.snapshot();

	let web = fx.fragment("main", "app_gunicorn_web");
	std::fs::remove_file(&web).unwrap();
	let report = manager.reconcile().unwrap();

	assert_eq!(report.recreated, vec![web.clone()]);
	assert!(report.written.is_empty());
	assert_eq!(fx.snapshot(), before);
}

#[test]
fn attribute_change_rewrites_every_service() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	manager.reconcile().unwrap();

	fx.rewrite(&APP.replace("log_dir = \"logs\"", "log_dir = \"other-logs\""));
	let report = manager.reconcile().unwrap();
	assert_eq!(report.written.len(), 3);

	let new_logs = fx.dir.path().join("other-logs");
	let new_logs = std::fs::canonicalize(new_logs).unwrap();
	for stem in ["app_gunicorn_web", "app_celery_worker", "app_uwsgi_api"] {
		let content = std::fs::read_to_string(fx.fragment("main", stem)).unwrap();
		assert!(
			content.contains(&format!("stdout_logfile  = {}/", new_logs.display())),
			"{stem} still points at the old log dir"
		);
	}
}

#[test]
fn removed_service_is_deleted_before_update() {
	let fx = Fixture::new(APP);
	let worker = fx.fragment("main", "app_celery_worker");
	let client = StubClient {
		running: true,
		watch: Some(worker.clone()),
		..StubClient::default()
	};
	let mut manager = fx.manager(&client, false);
	manager.update().unwrap();

	fx.rewrite(&APP.replace("[services.worker]\ntype = \"celery\"\n", ""));
	manager.update().unwrap();

	assert_eq!(client.log.borrow().seen_at_update, vec![true, false]);
	assert!(!worker.exists());
	let group = std::fs::read_to_string(fx.paths().group_conf_path("main")).unwrap();
	assert!(group.contains("programs = main_app_gunicorn_web\n"));
}

#[test]
fn single_instance_mode_writes_no_group() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	fx.manager(&client, true).update().unwrap();

	assert!(!fx.paths().group_conf_path("main").exists());
	let web = std::fs::read_to_string(fx.fragment("main", "app_gunicorn_web")).unwrap();
	assert!(web.contains("[program:web]"));
	assert!(!web.contains("process_name"));
}

#[test]
fn group_is_deleted_when_no_member_remains() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	manager.update().unwrap();
	assert!(fx.paths().group_conf_path("main").exists());

	fx.rewrite(
		"instance_name = \"main\"\n[attribs]\nlog_dir = \"logs\"\n[services]\napi = \"uwsgi\"\n",
	);
	let report = manager.reconcile().unwrap();
	assert!(!fx.paths().group_conf_path("main").exists());
	assert_eq!(report.groups_removed, vec![fx.paths().group_conf_path("main")]);
}

#[test]
fn grouping_flip_rewrites_fragments_and_drops_group() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	fx.manager(&client, false).update().unwrap();

	let report = fx.manager(&client, true).reconcile().unwrap();
	assert_eq!(report.written.len(), 3);
	assert!(!fx.paths().group_conf_path("main").exists());
	let web = std::fs::read_to_string(fx.fragment("main", "app_gunicorn_web")).unwrap();
	assert!(web.contains("[program:web]"));
}

#[test]
fn instance_rename_moves_fragments() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	manager.update().unwrap();

	fx.rewrite(&APP.replace("instance_name = \"main\"", "instance_name = \"blue\""));
	manager.update().unwrap();

	assert!(!fx.paths().instance_conf_dir("main").exists());
	assert!(!fx.paths().group_conf_path("main").exists());
	assert!(fx.fragment("blue", "app_gunicorn_web").exists());
	let group = std::fs::read_to_string(fx.paths().group_conf_path("blue")).unwrap();
	assert!(group.contains("programs = blue_app_gunicorn_web,blue_app_celery_worker\n"));
}

#[test]
fn deregistered_config_is_cleaned_up() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	fx.manager(&client, false).update().unwrap();

	let mut store = FileStateStore::open(&fx.state, false).unwrap();
	store.deregister(&fx.config).unwrap();
	let mut manager =
		SupervisorManager::new(fx.paths(), Box::new(store), Box::new(client.clone())).unwrap();
	manager.update().unwrap();

	assert!(!fx.paths().instance_conf_dir("main").exists());
	assert!(!fx.paths().group_conf_path("main").exists());
	assert!(matches!(manager.start(&[]), Err(ManagerError::NoInstances)));
}

#[test]
fn unknown_service_type_fails_without_partial_file() {
	let fx = Fixture::new(&format!(
		"{}\n[services.odd]\ntype = \"mystery\"\ncommand = \"run-it\"\n",
		APP
	));
	let client = StubClient::default();
	let err = fx.manager(&client, false).update().unwrap_err();

	assert!(matches!(
		err,
		ManagerError::UnknownServiceType { ref service_type, .. } if service_type == "mystery"
	));
	assert!(!fx.fragment("main", "app_mystery_odd").exists());
}

// --- Lifecycle ---

#[test]
fn start_addresses_group_uwsgi_and_unknown_names() {
	let fx = Fixture::new(APP);
	let client = StubClient::running();
	fx.manager(&client, false)
		.start(&names(&["main", "legacy-thing"]))
		.unwrap();

	assert_eq!(
		client.commands(),
		vec![
			names(&["update"]),
			names(&["start", "main:*"]),
			names(&["start", "main_app_uwsgi_api"]),
			names(&["start", "legacy-thing"]),
			names(&["status"]),
		]
	);
}

#[test]
fn single_instance_start_uses_all() {
	let fx = Fixture::new(APP);
	let client = StubClient::running();
	fx.manager(&client, true).restart(&[]).unwrap();
	assert!(client.sent(&["restart", "all"]));
	assert!(client.sent(&["restart", "api"]));
}

#[test]
fn commands_are_skipped_when_daemon_is_down() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	manager.start(&[]).unwrap();
	manager.shutdown().unwrap();
	assert!(client.commands().is_empty());
}

#[test]
fn no_instances_registered() {
	let dir = tempfile::tempdir().unwrap();
	let store = FileStateStore::open(dir.path(), false).unwrap();
	let mut manager = SupervisorManager::new(
		SupervisorPaths::new(dir.path()),
		Box::new(store),
		Box::new(StubClient::running()),
	)
	.unwrap();
	let err = manager.start(&[]).unwrap_err();
	assert!(matches!(err, ManagerError::NoInstances));
	assert_eq!(err.to_string(), "No instances registered");
}

#[test]
fn no_instances_is_reported_before_update() {
	let dir = tempfile::tempdir().unwrap();
	let store = FileStateStore::open(dir.path(), false).unwrap();
	let client = StubClient::running();
	let mut manager = SupervisorManager::new(
		SupervisorPaths::new(dir.path()),
		Box::new(store),
		Box::new(client.clone()),
	)
	.unwrap();

	assert!(matches!(manager.restart(&[]), Err(ManagerError::NoInstances)));
	assert!(matches!(manager.graceful(&[]), Err(ManagerError::NoInstances)));
	assert!(client.commands().is_empty());
	assert!(!dir.path().join(gantry_core::state::STATE_FILE).exists());
}

#[test]
fn stop_shuts_daemon_down_when_everything_stopped() {
	let fx = Fixture::new(APP);
	let stopped = |name: &str| ProcessInfo {
		name: name.to_string(),
		group: Some("main".to_string()),
		state: ProcessState::Stopped,
		pid: None,
	};
	let client = StubClient {
		processes: vec![stopped("app_gunicorn_web"), stopped("app_celery_worker")],
		..StubClient::running()
	};
	fx.manager(&client, false).stop(&names(&["main"])).unwrap();

	let commands = client.commands();
	assert!(client.sent(&["stop", "main:*"]));
	assert!(client.sent(&["stop", "main_app_uwsgi_api"]));
	assert_eq!(commands.last(), Some(&names(&["shutdown"])));
}

#[test]
fn stop_keeps_daemon_when_something_still_runs() {
	let fx = Fixture::new(APP);
	let client = StubClient {
		processes: vec![ProcessInfo {
			name: "other".to_string(),
			group: None,
			state: ProcessState::Running,
			pid: Some(1),
		}],
		..StubClient::running()
	};
	fx.manager(&client, false).stop(&names(&["main"])).unwrap();
	assert!(!client.sent(&["shutdown"]));
}

fn graceful_app(port: u16) -> String {
	format!(
		r#"
config_type = "app"
instance_name = "main"

[attribs]
log_dir = "logs"

[services.web]
type = "gunicorn"

[services.legacy]
type = "paste"
readiness_port = {port}

[services.handler]
type = "standalone"

[services.api]
type = "uwsgi"
"#
	)
}

fn uwsgi_client(program: &str, pid: u32) -> StubClient {
	StubClient {
		processes: vec![ProcessInfo {
			name: program.to_string(),
			group: None,
			state: ProcessState::Running,
			pid: Some(pid),
		}],
		..StubClient::running()
	}
}

#[test]
fn graceful_restarts_individually_and_signals_uwsgi() {
	let port = readiness_server(StatusCode::OK);
	let fx = Fixture::new(&graceful_app(port));
	let mut uwsgi = std::process::Command::new("sleep").arg("30").spawn().unwrap();
	let client = uwsgi_client("main_app_uwsgi_api", uwsgi.id());

	fx.manager(&client, false).graceful(&names(&["main"])).unwrap();

	assert!(client.sent(&["restart", "main:app_paste_legacy"]));
	assert!(client.sent(&["restart", "main:app_standalone_handler"]));
	assert!(!client.sent(&["restart", "main:*"]));
	assert!(!client.sent(&["restart", "main:app_gunicorn_web"]));
	assert!(!client
		.commands()
		.iter()
		.any(|c| c.iter().any(|arg| arg.contains("uwsgi"))));

	let status = uwsgi.wait().unwrap();
	assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGHUP as i32));
}

#[test]
fn graceful_waits_for_paste_before_signalling_uwsgi() {
	let dir = tempfile::tempdir().unwrap();
	let hupped = dir.path().join("hupped");
	let delay = Duration::from_millis(300);
	let (port, bound) = late_readiness_server(delay, hupped.clone());
	let fx = Fixture::new(&format!(
		r#"
config_type = "app"
instance_name = "main"

[attribs]
log_dir = "logs"

[services.legacy]
type = "paste"
readiness_port = {port}

[services.pool]
type = "uwsgi"
"#
	));
	let mut uwsgi = std::process::Command::new("sh")
		.arg("-c")
		.arg("trap 'touch \"$0\"; exit 0' HUP; while :; do sleep 0.05; done")
		.arg(&hupped)
		.spawn()
		.unwrap();
	let client = uwsgi_client("main_app_uwsgi_pool", uwsgi.id());

	let started = std::time::Instant::now();
	fx.manager(&client, false).graceful(&[]).unwrap();

	assert!(started.elapsed() >= delay);
	assert!(client.sent(&["restart", "main:app_paste_legacy"]));
	assert!(!bound.recv().unwrap(), "uwsgi was signalled before paste answered");
	uwsgi.wait().unwrap();
	assert!(hupped.exists());
}

#[test]
fn graceful_aborts_on_non_200() {
	let port = readiness_server(StatusCode::INTERNAL_SERVER_ERROR);
	let fx = Fixture::new(&graceful_app(port));
	let client = StubClient::running();

	let err = fx.manager(&client, false).graceful(&[]).unwrap_err();
	assert!(matches!(err, ManagerError::ReadinessFailed { status: 500, .. }));
}

#[test]
fn reload_restarts_group_and_signals_uwsgi() {
	let fx = Fixture::new(APP);
	let mut uwsgi = std::process::Command::new("sleep").arg("30").spawn().unwrap();
	let client = uwsgi_client("main_app_uwsgi_api", uwsgi.id());

	fx.manager(&client, false).reload(&[]).unwrap();

	assert_eq!(
		client.commands(),
		vec![names(&["update"]), names(&["restart", "main:*"])]
	);
	let status = uwsgi.wait().unwrap();
	assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGHUP as i32));
}

#[test]
fn reload_survives_missing_uwsgi_process() {
	let fx = Fixture::new(APP);
	let client = StubClient::running();
	fx.manager(&client, false).reload(&[]).unwrap();
	assert!(client.sent(&["restart", "main:*"]));
}

#[test]
fn follow_requires_exactly_one_instance() {
	let fx = Fixture::new(APP);
	let other = fx.dir.path().join("blue.toml");
	std::fs::write(&other, "instance_name = \"blue\"\n[services]\nworker = \"celery\"\n").unwrap();
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	manager.update().unwrap();

	let mut store = FileStateStore::open(&fx.state, false).unwrap();
	store.register(&other).unwrap();
	let mut manager = SupervisorManager::new(fx.paths(), Box::new(store), Box::new(client.clone()))
		.unwrap()
		.with_tail(Some(PathBuf::from("true")));
	manager.update().unwrap();

	match manager.follow(&[]) {
		Err(ManagerError::FollowMultiple(instances)) => assert_eq!(instances, names(&["blue", "main"])),
		other => panic!("expected FollowMultiple, got {other:?}"),
	}
	manager.follow(&names(&["main"])).unwrap();
}

#[test]
fn log_files_cover_every_config_of_an_instance() {
	let fx = Fixture::new(APP);
	let extra = fx.dir.path().join("extra.toml");
	std::fs::write(
		&extra,
		"config_type = \"extra\"\ninstance_name = \"main\"\n[attribs]\nlog_dir = \"extra-logs\"\n[services]\njobs = \"celery\"\n",
	)
	.unwrap();
	let client = StubClient::default();
	let mut store = FileStateStore::open(&fx.state, false).unwrap();
	store.register(&fx.config).unwrap();
	store.register(&extra).unwrap();
	let mut manager =
		SupervisorManager::new(fx.paths(), Box::new(store), Box::new(client.clone())).unwrap();
	manager.update().unwrap();

	let logs = std::fs::canonicalize(fx.dir.path().join("logs")).unwrap();
	let extra_logs = std::fs::canonicalize(fx.dir.path().join("extra-logs")).unwrap();
	let files = manager.log_files("main").unwrap();
	assert_eq!(files.len(), 4);
	assert!(files.contains(&logs.join("main_app_gunicorn_web.log")));
	assert!(files.contains(&extra_logs.join("main_extra_celery_jobs.log")));
}

#[test]
fn log_files_follow_program_names() {
	let fx = Fixture::new(APP);
	let client = StubClient::default();
	let mut manager = fx.manager(&client, false);
	manager.update().unwrap();

	let logs = std::fs::canonicalize(fx.dir.path().join("logs")).unwrap();
	assert_eq!(
		manager.log_files("main").unwrap(),
		vec![
			logs.join("main_app_uwsgi_api.log"),
			logs.join("main_app_gunicorn_web.log"),
			logs.join("main_app_celery_worker.log"),
		]
	);
	assert!(matches!(
		manager.log_files("nope"),
		Err(ManagerError::UnknownInstance(_))
	));
}
