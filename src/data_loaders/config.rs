use std::path::{Path, PathBuf};

use image::Rgba;
use serde_yaml::{Mapping, Value};

use super::yaml::load_yaml;
use crate::{
    backend::{BackendMode, PublishPolicy},
    base_cache::NEUTRAL_FILL,
    compositor::MonitorBackground,
    geometry::Rect,
    widgets::parse_color,
};

#[derive(Debug, Clone)]
pub struct AddonConfig {
    pub debug: bool,
    pub log_level: String,
    pub settings: AddonSettings,
    pub widgets: WidgetsConfig,
    /// Monitors for the headless shell, primary first.
    pub headless_monitors: Vec<Rect>,
}

#[derive(Debug, Clone, Default)]
pub struct AddonSettings {
    pub runtime: RuntimeSettings,
    pub backend: BackendSettings,
    pub compositor: CompositorSettings,
    pub watcher: WatcherSettings,
    pub development: DevelopmentSettings,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub tick_sleep_ms: u64,
    pub second_tick: bool,
    /// User timer period; 0 leaves it off.
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub mode: BackendMode,
    pub publish_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CompositorSettings {
    pub fill_color: Rgba<u8>,
    pub monitor_background: MonitorBackground,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DevelopmentSettings {
    pub debug: bool,
    pub log_level: String,
}

#[derive(Debug, Clone, Default)]
pub struct WidgetsConfig {
    pub dir: Option<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_sleep_ms: 50,
            second_tick: true,
            interval_secs: 0,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            mode: BackendMode::Auto,
            publish_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            fill_color: NEUTRAL_FILL,
            monitor_background: MonitorBackground::Solid,
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 600,
        }
    }
}

impl Default for DevelopmentSettings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for AddonConfig {
    fn default() -> Self {
        let settings = AddonSettings::default();
        Self {
            debug: settings.development.debug,
            log_level: settings.development.log_level.clone(),
            settings,
            widgets: WidgetsConfig::default(),
            headless_monitors: Vec::new(),
        }
    }
}

impl BackendSettings {
    pub fn policy(&self) -> PublishPolicy {
        PublishPolicy {
            retries: self.publish_retries,
            backoff: std::time::Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl AddonConfig {
    pub fn load(path: &Path) -> Option<Self> {
        let value = load_yaml(path)?;
        Self::from_yaml(&value)
    }

    pub fn from_yaml(root: &Value) -> Option<Self> {
        let map = root.as_mapping()?;

        let settings = parse_settings(map);
        let debug = settings.development.debug;
        let log_level = settings.development.log_level.clone();

        let widgets = WidgetsConfig {
            dir: mapping_at(map, "widgets")
                .and_then(|w| str_any(w, &["dir", "path", "root"]))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        };

        let headless_monitors = mapping_at(map, "headless")
            .map(parse_headless_monitors)
            .unwrap_or_default();

        Some(Self {
            debug,
            log_level,
            settings,
            widgets,
            headless_monitors,
        })
    }

    /// Widget root: configured path (relative ones resolve against the addon
    /// root) or `<root>/widgets`.
    pub fn widgets_dir(&self, addon_root: &Path) -> PathBuf {
        match &self.widgets.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => addon_root.join(dir),
            None => addon_root.join("widgets"),
        }
    }
}

fn parse_settings(root: &Mapping) -> AddonSettings {
    let mut settings = AddonSettings::default();

    settings.development.debug = bool_at(root, "debug").unwrap_or(settings.development.debug);
    settings.development.log_level = str_at(root, "log_level")
        .unwrap_or(&settings.development.log_level)
        .to_lowercase();

    let settings_map = mapping_at(root, "settings");
    let runtime_map = settings_map.and_then(|v| mapping_at(v, "runtime"));
    let backend_map = settings_map.and_then(|v| mapping_at(v, "backend"));
    let compositor_map = settings_map.and_then(|v| mapping_at(v, "compositor"));
    let watcher_map = settings_map.and_then(|v| {
        mapping_at(v, "watcher").or_else(|| mapping_at(v, "performance").and_then(|p| mapping_at(p, "watcher")))
    });
    let development_map = settings_map.and_then(|v| mapping_at(v, "development"));

    if let Some(runtime) = runtime_map {
        settings.runtime.tick_sleep_ms = u64_at(runtime, "tick_sleep_ms")
            .unwrap_or(settings.runtime.tick_sleep_ms)
            .clamp(1, 1000);
        settings.runtime.second_tick = bool_any(runtime, &["second_tick", "tick_every_second"])
            .unwrap_or(settings.runtime.second_tick);
        settings.runtime.interval_secs = u64_any(runtime, &["interval_secs", "update_interval_secs"])
            .unwrap_or(settings.runtime.interval_secs)
            .min(24 * 60 * 60);
    }

    if let Some(backend) = backend_map {
        settings.backend.mode = str_at(backend, "mode")
            .map(BackendMode::parse)
            .unwrap_or(settings.backend.mode);
        settings.backend.publish_retries = u64_at(backend, "publish_retries")
            .map(|v| v.min(10) as u32)
            .unwrap_or(settings.backend.publish_retries);
        settings.backend.retry_backoff_ms = u64_at(backend, "retry_backoff_ms")
            .unwrap_or(settings.backend.retry_backoff_ms)
            .clamp(1, 2000);
    }

    if let Some(compositor) = compositor_map {
        if let Some(color) = str_any(compositor, &["fill_color", "background_color"]).and_then(parse_color) {
            // The fill is the bottom layer; it has to be opaque.
            settings.compositor.fill_color = Rgba([color[0], color[1], color[2], 255]);
        }
        settings.compositor.monitor_background = str_at(compositor, "monitor_background")
            .map(MonitorBackground::parse)
            .unwrap_or(settings.compositor.monitor_background);
    }

    if let Some(watcher) = watcher_map {
        settings.watcher.enabled = bool_any(watcher, &["enabled", "auto_reload", "live_reload"])
            .unwrap_or(settings.watcher.enabled);
        settings.watcher.interval_ms = u64_any(watcher, &["interval_ms", "scan_interval_ms"])
            .unwrap_or(settings.watcher.interval_ms)
            .max(100);
    }

    if let Some(dev) = development_map {
        settings.development.debug = bool_any(dev, &["debug", "debug_mode"]).unwrap_or(settings.development.debug);
        settings.development.log_level = str_any(dev, &["log_level", "logging"])
            .unwrap_or(&settings.development.log_level)
            .to_lowercase();
    }

    settings
}

fn parse_headless_monitors(headless: &Mapping) -> Vec<Rect> {
    let Some(list) = headless
        .get(Value::String("monitors".to_string()))
        .and_then(Value::as_sequence)
    else {
        return Vec::new();
    };

    let mut monitors: Vec<(bool, Rect)> = list
        .iter()
        .filter_map(Value::as_mapping)
        .filter_map(|m| {
            let width = u64_at(m, "width")? as u32;
            let height = u64_at(m, "height")? as u32;
            let rect = Rect::new(
                i64_at(m, "x").unwrap_or(0) as i32,
                i64_at(m, "y").unwrap_or(0) as i32,
                width,
                height,
            );
            Some((bool_at(m, "primary").unwrap_or(false), rect))
        })
        .collect();

    // Stable: keeps listed order apart from moving the primary to the front.
    monitors.sort_by_key(|(primary, _)| !*primary);
    monitors.into_iter().map(|(_, rect)| rect).collect()
}

fn bool_at(map: &Mapping, key: &str) -> Option<bool> {
    map.get(Value::String(key.to_string()))?.as_bool()
}

fn bool_any(map: &Mapping, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| bool_at(map, k))
}

fn str_at<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(Value::String(key.to_string()))?.as_str()
}

fn str_any<'a>(map: &'a Mapping, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| str_at(map, k))
}

fn mapping_at<'a>(map: &'a Mapping, key: &str) -> Option<&'a Mapping> {
    map.get(Value::String(key.to_string()))?.as_mapping()
}

fn i64_at(map: &Mapping, key: &str) -> Option<i64> {
    map.get(Value::String(key.to_string()))?.as_i64()
}

fn u64_at(map: &Mapping, key: &str) -> Option<u64> {
    i64_at(map, key).and_then(|v| if v >= 0 { Some(v as u64) } else { None })
}

fn u64_any(map: &Mapping, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| u64_at(map, k))
}
