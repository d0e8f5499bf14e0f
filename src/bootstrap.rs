use std::{fs, path::Path};

use crate::{info, warn, utility::AddonDirs, ADDON_NAME};

const DEFAULT_CONFIG: &str = r##"settings:
  runtime:
    tick_sleep_ms: 50
    second_tick: true
    interval_secs: 0
  backend:
    mode: auto
    publish_retries: 3
    retry_backoff_ms: 50
  compositor:
    fill_color: "#202428"
    monitor_background: solid
  watcher:
    enabled: true
    interval_ms: 600
  development:
    debug: false
    log_level: warn

widgets:
  dir: widgets
"##;

const DEFAULT_WIDGETS: [(&str, &str); 3] = [
    (
        "00_panel",
        r##"{
    "name": "panel",
    "enabled": true,
    "entry": "panel",
    "settings": { "color": "#00000060", "monitor": "p" },
    "placement": { "nx": 0.74, "ny": 0.04, "nw": 0.22, "nh": 0.16 }
}
"##,
    ),
    (
        "10_clock",
        r##"{
    "name": "clock",
    "enabled": true,
    "entry": "clock",
    "settings": { "color": "#ffffffe6", "show_seconds": true, "monitor": "p" },
    "placement": { "nx": 0.75, "ny": 0.05, "nw": 0.2, "nh": 0.09 }
}
"##,
    ),
    (
        "20_date",
        r##"{
    "name": "date",
    "enabled": true,
    "entry": "date",
    "settings": { "color": "#ffffffb0", "format": "%Y-%m-%d", "monitor": "p" },
    "placement": { "nx": 0.78, "ny": 0.14, "nw": 0.14, "nh": 0.04 }
}
"##,
    ),
];

/// Create the working directories and scaffold default files. Existing files
/// are never touched; only a failure to create the directories is an error.
pub fn bootstrap_addon(dirs: &AddonDirs, widgets_dir: &Path) -> std::io::Result<()> {
    info!("[{}] === Bootstrap starting ===", ADDON_NAME);

    dirs.create_all()?;
    info!("[{}] Working directories ready under {}", ADDON_NAME, dirs.root.display());

    scaffold_config_yaml(&dirs.root);
    if !widgets_dir.exists() {
        scaffold_default_widgets(widgets_dir);
    }

    info!("[{}] Scaffolding complete", ADDON_NAME);
    Ok(())
}

fn scaffold_config_yaml(addon_dir: &Path) {
    let path = addon_dir.join("config.yaml");
    if path.exists() {
        return;
    }

    match fs::write(&path, DEFAULT_CONFIG) {
        Ok(_) => info!("[{}] Created config.yaml", ADDON_NAME),
        Err(e) => warn!("[{}] Failed to create config.yaml: {e}", ADDON_NAME),
    }
}

fn scaffold_default_widgets(widgets_dir: &Path) {
    for (folder, manifest) in DEFAULT_WIDGETS {
        let dir = widgets_dir.join(folder);
        let result = fs::create_dir_all(&dir).and_then(|_| fs::write(dir.join("manifest.json"), manifest));
        match result {
            Ok(_) => info!("[{}] Created widget {}", ADDON_NAME, folder),
            Err(e) => warn!("[{}] Failed to create widget {}: {e}", ADDON_NAME, folder),
        }
    }
}
