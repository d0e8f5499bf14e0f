mod backend;
mod backup;
mod base_cache;
mod bootstrap;
mod commands;
mod compositor;
mod data_loaders;
mod error;
mod geometry;
mod logging;
mod pipeline;
mod placement;
mod platform;
mod runtime;
mod scheduler;
mod shutdown;
mod utility;
mod widgets;

use std::{
	io::BufRead,
	path::{Path, PathBuf},
	process::ExitCode,
	sync::{
		mpsc::{self, Receiver, TryRecvError},
		Arc,
	},
	thread,
	time::{Duration, Instant, SystemTime},
};

use clap::Parser;
use parking_lot::Mutex;

use crate::{
	backend::{BackendMode, WallpaperBackend},
	backup::BackupRestoreManager,
	commands::Command,
	data_loaders::{config::AddonConfig, yaml},
	error::Result,
	pipeline::{MonitorSelection, RenderPipeline},
	placement::PlacementBus,
	runtime::Runtime,
	shutdown::ShutdownHooks,
	utility::{addon_root_dir, AddonDirs},
	widgets::{WidgetPluginHost, WidgetRegistry},
};

pub const ADDON_NAME: &str = "livepaper";
pub const DEBUG_NAME: &str = "LIVEPAPER";

const RESTORE_WAIT: Duration = Duration::from_millis(1500);
const MONITOR_CHECK_INTERVAL: Duration = Duration::from_secs(2);
const WATCHER_DEBOUNCE: Duration = Duration::from_millis(400);

/// Sentinel Livepaper - live widgets painted onto the desktop wallpaper.
#[derive(Parser, Debug)]
#[command(name = "sentinel-livepaper")]
#[command(author, version, about, long_about = None)]
struct Cli {
	/// Path to config.yaml. Defaults to the one in the addon root.
	#[arg(long, short, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Render a single frame, restore the original wallpaper and exit.
	#[arg(long)]
	once: bool,

	/// Only update this monitor (per-monitor backend).
	#[arg(long, value_name = "INDEX")]
	monitor: Option<usize>,

	/// Start the periodic update timer with this period in seconds.
	#[arg(long, value_name = "SECS")]
	interval: Option<u64>,

	/// Skip the per-monitor probe and always publish one spanning image.
	#[arg(long)]
	span: bool,
}

enum Input {
	Line(String),
	Closed,
}

#[cfg(windows)]
fn enable_per_monitor_dpi_awareness() {
	use windows::Win32::UI::HiDpi::{
		SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
	};

	unsafe {
		if SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2).is_err() {
			warn!(
				"[{}] Failed to set process DPI awareness to PerMonitorV2; monitor sizes may be scaled",
				DEBUG_NAME
			);
		}
	}
}

#[cfg(not(windows))]
fn enable_per_monitor_dpi_awareness() {}

fn should_ignore_reload_path(path: &Path) -> bool {
	let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
		return false;
	};

	let lower_name = file_name.to_ascii_lowercase();
	lower_name.ends_with(".tmp")
		|| lower_name.ends_with(".temp")
		|| lower_name.ends_with(".swp")
		|| lower_name.ends_with(".bak")
		|| lower_name.starts_with(".~")
}

fn newest_file_modified_recursive(dir: &Path) -> Option<SystemTime> {
	let mut newest: Option<SystemTime> = None;
	let entries = std::fs::read_dir(dir).ok()?;

	for entry in entries.flatten() {
		let path = entry.path();
		let candidate = if path.is_dir() {
			// A folder appearing or vanishing changes the parent's mtime.
			let own = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
			own.max(newest_file_modified_recursive(&path))
		} else if should_ignore_reload_path(&path) {
			None
		} else {
			std::fs::metadata(&path).and_then(|m| m.modified()).ok()
		};

		newest = newest.max(candidate);
	}

	newest
}

fn file_modified(path: &Path) -> Option<SystemTime> {
	std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn spawn_stdin_reader() -> std::io::Result<Receiver<Input>> {
	let (tx, rx) = mpsc::channel();
	thread::Builder::new()
		.name("livepaper-stdin".to_string())
		.spawn(move || {
			for line in std::io::stdin().lock().lines() {
				let Ok(line) = line else {
					break;
				};
				if tx.send(Input::Line(line)).is_err() {
					return;
				}
			}
			let _ = tx.send(Input::Closed);
		})?;
	Ok(rx)
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("[{}] Fatal: {}", DEBUG_NAME, e);
			shutdown::run_global("fatal error");
			eprintln!("livepaper: {e}");
			ExitCode::FAILURE
		}
	}
}

fn run(cli: Cli) -> Result<()> {
	let root = addon_root_dir();
	let config_path = cli.config.clone().unwrap_or_else(|| root.join("config.yaml"));
	let mut config = AddonConfig::load(&config_path).unwrap_or_default();

	logging::init(config.debug, &config.log_level);
	shutdown::install_panic_hook();
	enable_per_monitor_dpi_awareness();

	info!("!---------- [{}] Starting Livepaper Addon ----------!", DEBUG_NAME);
	let dirs = AddonDirs::under(&root);
	bootstrap::bootstrap_addon(&dirs, &config.widgets_dir(&root))?;
	if let Some(scaffolded) = AddonConfig::load(&config_path) {
		config = scaffolded;
		logging::set_debug(config.debug);
		logging::set_level(&config.log_level);
	}
	info!("[{}] Config loaded from {}", DEBUG_NAME, config_path.display());

	let shell = platform::native_shell(&config.headless_monitors);
	let backup = Arc::new(BackupRestoreManager::new(Arc::clone(&shell), dirs.clone()));
	if backup.backup().is_none() {
		warn!("[{}] Running without a wallpaper backup", DEBUG_NAME);
	}

	let mode = if cli.span {
		BackendMode::Span
	} else {
		config.settings.backend.mode
	};
	let backend = WallpaperBackend::select(
		Arc::clone(&shell),
		mode,
		&dirs.output,
		config.settings.backend.policy(),
	);

	let bus = Arc::new(PlacementBus::new());
	let registry = WidgetRegistry::with_builtins();
	info!("[{}] Widget entries: {}", DEBUG_NAME, registry.entries().join(", "));
	let host = WidgetPluginHost::new(registry, bus);
	let mut pipeline = RenderPipeline::new(
		Arc::clone(&shell),
		Arc::clone(&backup),
		backend,
		host,
		config.settings.compositor.monitor_background,
		config.settings.compositor.fill_color,
	);

	let mut widgets_dir = config.widgets_dir(&root);
	let loaded = pipeline.load_widgets(&widgets_dir);
	info!(
		"[{}] {} widget(s) loaded from {}; publishing via the {} backend",
		DEBUG_NAME,
		loaded,
		widgets_dir.display(),
		pipeline.backend_kind()
	);
	if let Some(index) = cli.monitor {
		pipeline.set_selection(MonitorSelection::Index(index));
	}
	let pipeline = Arc::new(Mutex::new(pipeline));

	let hooks = Arc::new(ShutdownHooks::new());
	{
		let backup = Arc::clone(&backup);
		let pipeline = Arc::clone(&pipeline);
		hooks.register("restore-wallpaper", move || {
			if let Err(e) = backup.restore_locked(&*pipeline, RESTORE_WAIT) {
				warn!("[{}] Restore failed: {}", DEBUG_NAME, e);
			}
		});
	}
	shutdown::install_global(Arc::clone(&hooks));
	shutdown::install_console_handler();

	let mut runtime = Runtime::new(Arc::clone(&pipeline));

	if cli.once {
		let outcome = runtime.render_now();
		info!("[{}] Single frame: {:?}", DEBUG_NAME, outcome);
		hooks.run("single frame done");
		return Ok(());
	}

	runtime.render_now();
	if config.settings.runtime.second_tick {
		runtime.start_ticker()?;
	}
	let interval = cli.interval.unwrap_or(config.settings.runtime.interval_secs);
	if interval > 0 {
		runtime.start_timer(Duration::from_secs(interval))?;
	}

	let input = spawn_stdin_reader()?;

	let mut loop_sleep = Duration::from_millis(config.settings.runtime.tick_sleep_ms.max(1));
	let mut watcher_enabled = config.settings.watcher.enabled;
	let mut watcher_interval = Duration::from_millis(config.settings.watcher.interval_ms.max(100));
	let mut last_watch_tick = Instant::now();
	let mut last_config_modified = file_modified(&config_path);
	let mut widgets_modified = newest_file_modified_recursive(&widgets_dir);
	let mut pending_widget_reload: Option<Instant> = None;
	let mut last_monitor_check = Instant::now();

	'main: loop {
		loop {
			match input.try_recv() {
				Ok(Input::Line(line)) => {
					if line.trim().is_empty() {
						continue;
					}
					match line.parse::<Command>() {
						Ok(command) => {
							let reply = runtime.execute(command);
							println!("{}", reply.message);
							if reply.quit {
								break 'main;
							}
						}
						Err(e) => println!("{e}"),
					}
				}
				Ok(Input::Closed) | Err(TryRecvError::Disconnected) => {
					info!("[{}] Command input closed; shutting down", DEBUG_NAME);
					break 'main;
				}
				Err(TryRecvError::Empty) => break,
			}
		}

		// Monitors added, removed or rearranged: render now instead of
		// waiting for the next tick.
		if last_monitor_check.elapsed() >= MONITOR_CHECK_INTERVAL {
			last_monitor_check = Instant::now();
			let changed = pipeline.lock().layout_changed();
			if changed {
				warn!("[{}][MONITORS] Layout change detected; re-rendering", DEBUG_NAME);
				runtime.render_now();
			}
		}

		if watcher_enabled && last_watch_tick.elapsed() >= watcher_interval {
			last_watch_tick = Instant::now();

			let current_modified = file_modified(&config_path);
			let changed = match (last_config_modified, current_modified) {
				(Some(prev), Some(curr)) => curr > prev,
				(None, Some(_)) => true,
				_ => false,
			};

			if changed {
				yaml::forget(&config_path);
				match AddonConfig::load(&config_path) {
					Some(new_config) => {
						config = new_config;
						logging::set_debug(config.debug);
						logging::set_level(&config.log_level);
						loop_sleep = Duration::from_millis(config.settings.runtime.tick_sleep_ms.max(1));
						watcher_enabled = config.settings.watcher.enabled;
						watcher_interval = Duration::from_millis(config.settings.watcher.interval_ms.max(100));

						let new_widgets_dir = config.widgets_dir(&root);
						let mut p = pipeline.lock();
						p.set_appearance(
							config.settings.compositor.monitor_background,
							config.settings.compositor.fill_color,
						);
						if new_widgets_dir != widgets_dir {
							widgets_dir = new_widgets_dir;
							p.load_widgets(&widgets_dir);
							widgets_modified = newest_file_modified_recursive(&widgets_dir);
						}
						drop(p);

						warn!("[{}][WATCHER] Reloaded config from {}", DEBUG_NAME, config_path.display());
					}
					None => {
						warn!(
							"[{}][WATCHER] Detected config change but failed to parse {}; keeping previous config",
							DEBUG_NAME,
							config_path.display()
						);
					}
				}

				last_config_modified = current_modified;
			}

			let current_widgets = newest_file_modified_recursive(&widgets_dir);
			if current_widgets != widgets_modified {
				widgets_modified = current_widgets;
				pending_widget_reload = Some(Instant::now());
			}
		}

		if let Some(since) = pending_widget_reload {
			if since.elapsed() >= WATCHER_DEBOUNCE {
				pending_widget_reload = None;
				let reloaded = pipeline.lock().reload_widgets();
				warn!(
					"[{}][WATCHER] Debounced reload: {} widget(s) from {}",
					DEBUG_NAME,
					reloaded,
					widgets_dir.display()
				);
			}
		}

		thread::sleep(loop_sleep);
	}

	runtime.stop_all();
	hooks.run("quit");
	info!("!---------- [{}] Livepaper Addon stopped ----------!", DEBUG_NAME);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn cli_flags_parse() {
		let cli = Cli::try_parse_from(["livepaper", "--once", "--span", "--monitor", "1", "--interval", "30"]).unwrap();
		assert!(cli.once && cli.span);
		assert_eq!(cli.monitor, Some(1));
		assert_eq!(cli.interval, Some(30));
		assert!(cli.config.is_none());
	}

	#[test]
	fn temp_files_do_not_count_as_changes() {
		assert!(should_ignore_reload_path(Path::new("clock/settings.json.tmp")));
		assert!(should_ignore_reload_path(Path::new(".~lock.json")));
		assert!(!should_ignore_reload_path(Path::new("clock/manifest.json")));
		assert!(!should_ignore_reload_path(Path::new("clock/settings.json")));
	}

	#[test]
	fn newest_mtime_sees_nested_files() {
		let tmp = TempDir::new().unwrap();
		assert_eq!(newest_file_modified_recursive(&tmp.path().join("missing")), None);

		let dir = tmp.path().join("clock");
		fs::create_dir_all(&dir).unwrap();
		fs::write(dir.join("settings.json"), "{}").unwrap();
		let newest = newest_file_modified_recursive(tmp.path()).unwrap();
		assert!(newest >= file_modified(&dir.join("settings.json")).unwrap());
	}
}
