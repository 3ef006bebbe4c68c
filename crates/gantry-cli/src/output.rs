use gantry_core::FileStateStore;
use owo_colors::OwoColorize;

pub fn print_configs(store: &FileStateStore) {
	let rows: Vec<(String, String, String)> = store
		.registered_configs()
		.map(|(path, applied)| match applied {
			Some(config) => (
				config.config_type.clone(),
				config.instance_name.clone(),
				path.display().to_string(),
			),
			None => ("-".to_string(), "(pending)".to_string(), path.display().to_string()),
		})
		.collect();

	if rows.is_empty() {
		eprintln!("No config files registered");
		return;
	}

	let type_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(4);
	let instance_width = rows.iter().map(|r| r.1.len()).max().unwrap_or(0).max(8);
	println!(
		"{}",
		format!("{:<type_width$}  {:<instance_width$}  PATH", "TYPE", "INSTANCE").bold()
	);
	for (config_type, instance, path) in rows {
		println!(
			"{:<type_width$}  {:<instance_width$}  {}",
			config_type,
			instance.cyan(),
			path.dimmed()
		);
	}
}

pub fn print_instances(instances: &[String]) {
	if instances.is_empty() {
		eprintln!("No instances registered");
		return;
	}
	for name in instances {
		println!("{}", name.bold());
	}
}
