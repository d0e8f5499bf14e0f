//! Loads widget folders and draws them under a per-widget guard.
//!
//! Layout of the widget root:
//!
//! ```text
//! widgets/
//!   clock/
//!     manifest.json   { name, enabled, entry, settings, placement }
//!     settings.json   user overrides, optional
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Local};
use image::RgbaImage;
use serde::Deserialize;
use serde_json::Value;

use super::{setting_f64, setting_str, DrawContext, Settings, Widget, WidgetRegistry};
use crate::{
    error::{LivepaperError, Result},
    geometry::{MonitorDescriptor, Rect},
    info,
    placement::{NormRect, PlacementBus},
    shutdown, warn,
};

const MANIFEST_FILE: &str = "manifest.json";
const USER_SETTINGS_FILE: &str = "settings.json";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ManifestPlacement {
    pub nx: f64,
    pub ny: f64,
    pub nw: f64,
    pub nh: f64,
}

#[derive(Debug, Deserialize)]
pub struct WidgetManifest {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub entry: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub placement: Option<ManifestPlacement>,
}

/// Which monitors a widget is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorTarget {
    All,
    Primary,
    Index(usize),
}

impl MonitorTarget {
    fn from_setting(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|i| Self::Index(i as usize))
                .unwrap_or(Self::All),
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "p" | "primary" => Self::Primary,
                other => other.parse().map(Self::Index).unwrap_or(Self::All),
            },
            _ => Self::All,
        }
    }

    pub fn matches(&self, monitor: &MonitorDescriptor) -> bool {
        match self {
            Self::All => true,
            Self::Primary => monitor.is_primary,
            Self::Index(index) => monitor.index == *index,
        }
    }
}

pub struct WidgetHandle {
    pub name: String,
    pub dir: PathBuf,
    pub settings: Settings,
    pub monitor: MonitorTarget,
    pub failures: u32,
    widget: Box<dyn Widget>,
}

impl WidgetHandle {
    /// Where the widget paints on `monitor_rect` (surface coordinates).
    pub fn resolve_area(&self, bus: &PlacementBus, monitor: &MonitorDescriptor, monitor_rect: Rect) -> Rect {
        if let Some(norm) = bus.get(Some(monitor.index), &self.name) {
            return denormalize(norm, monitor_rect);
        }

        if let (Some(x), Some(y), Some(w), Some(h)) = (
            setting_f64(&self.settings, "nx"),
            setting_f64(&self.settings, "ny"),
            setting_f64(&self.settings, "nw"),
            setting_f64(&self.settings, "nh"),
        ) {
            return denormalize(NormRect::new(x, y, w, h).sanitized(), monitor_rect);
        }

        let (w, h) = self.widget.preferred_size(&monitor.bounds);
        let w = w.clamp(1, monitor_rect.width.max(1));
        let h = h.clamp(1, monitor_rect.height.max(1));
        let ox = offset(self.settings.get("offset_x"), monitor_rect.width);
        let oy = offset(self.settings.get("offset_y"), monitor_rect.height);
        let free_x = monitor_rect.width as i32 - w as i32;
        let free_y = monitor_rect.height as i32 - h as i32;

        let (x, y) = match setting_str(&self.settings, "anchor").unwrap_or("top-left") {
            "top-right" => (free_x - ox, oy),
            "bottom-left" => (ox, free_y - oy),
            "bottom-right" => (free_x - ox, free_y - oy),
            "center" => (free_x / 2 + ox, free_y / 2 + oy),
            _ => (ox, oy),
        };

        Rect::new(monitor_rect.x + x, monitor_rect.y + y, w, h)
    }
}

fn denormalize(norm: NormRect, monitor_rect: Rect) -> Rect {
    let (mw, mh) = (f64::from(monitor_rect.width), f64::from(monitor_rect.height));
    Rect::new(
        monitor_rect.x + (norm.x * mw).round() as i32,
        monitor_rect.y + (norm.y * mh).round() as i32,
        ((norm.w * mw).round() as u32).max(1),
        ((norm.h * mh).round() as u32).max(1),
    )
}

/// Fractions of the monitor extent for floats in `[-1, 1]`, pixels otherwise.
fn offset(value: Option<&Value>, extent: u32) -> i32 {
    let Some(Value::Number(n)) = value else {
        return 0;
    };
    if n.is_f64() {
        let v = n.as_f64().unwrap_or(0.0);
        if v.abs() <= 1.0 {
            return (v * f64::from(extent)).round() as i32;
        }
        return v.round() as i32;
    }
    n.as_i64().unwrap_or(0) as i32
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrawReport {
    pub drawn: usize,
    pub failed: usize,
}

pub struct WidgetPluginHost {
    registry: WidgetRegistry,
    bus: Arc<PlacementBus>,
    root: Option<PathBuf>,
    handles: Vec<WidgetHandle>,
}

impl WidgetPluginHost {
    pub fn new(registry: WidgetRegistry, bus: Arc<PlacementBus>) -> Self {
        Self {
            registry,
            bus,
            root: None,
            handles: Vec::new(),
        }
    }

    pub fn handles(&self) -> &[WidgetHandle] {
        &self.handles
    }

    /// Replace the loaded widgets with the ones found under `root`.
    /// Folders are visited in name order, which is also the draw order.
    pub fn load(&mut self, root: &Path) -> usize {
        self.root = Some(root.to_path_buf());
        self.handles.clear();

        let mut dirs: Vec<PathBuf> = match fs::read_dir(root) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(e) => {
                warn!("[LIVEPAPER][WIDGETS] Cannot read widget root {}: {}", root.display(), e);
                return 0;
            }
        };
        dirs.sort();

        for dir in dirs {
            match self.load_one(&dir) {
                Ok(Some(handle)) => {
                    info!(
                        "[LIVEPAPER][WIDGETS] Loaded '{}' ({}) from {} (monitor {:?})",
                        handle.name,
                        handle.widget.name(),
                        dir.display(),
                        handle.monitor
                    );
                    self.handles.push(handle);
                }
                Ok(None) => {
                    info!("[LIVEPAPER][WIDGETS] Skipping disabled widget {}", dir.display());
                }
                Err(e) => {
                    warn!("[LIVEPAPER][WIDGETS] Skipping {}: {}", dir.display(), e);
                }
            }
        }

        self.handles.len()
    }

    pub fn reload(&mut self) -> usize {
        match self.root.clone() {
            Some(root) => self.load(&root),
            None => 0,
        }
    }

    fn load_one(&self, dir: &Path) -> Result<Option<WidgetHandle>> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(LivepaperError::Config(format!("no {MANIFEST_FILE}")));
        }
        let manifest: WidgetManifest = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
        let name = manifest.name.trim().to_string();
        if name.is_empty() {
            return Err(LivepaperError::Config("manifest has an empty name".to_string()));
        }

        let user = read_user_settings(&dir.join(USER_SETTINGS_FILE))?;
        let enabled = user
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(manifest.enabled);
        if !enabled {
            return Ok(None);
        }

        let settings = merge_settings(&manifest, user);
        let mut widget = self
            .registry
            .create(&manifest.entry)
            .ok_or_else(|| LivepaperError::widget(&name, format!("unknown entry '{}'", manifest.entry)))?;

        shutdown::contain(|| widget.apply_settings(&settings))
            .map_err(|panic| LivepaperError::widget(&name, panic))??;

        Ok(Some(WidgetHandle {
            monitor: MonitorTarget::from_setting(settings.get("monitor")),
            name,
            dir: dir.to_path_buf(),
            settings,
            failures: 0,
            widget,
        }))
    }

    /// Draw every widget targeting `monitor`. Failures are contained per
    /// widget; the rest of the frame is unaffected.
    pub fn draw_all(
        &mut self,
        surface: &mut RgbaImage,
        monitor: &MonitorDescriptor,
        monitor_rect: Rect,
        virtual_rect: Rect,
        now: DateTime<Local>,
    ) -> DrawReport {
        let mut report = DrawReport::default();
        let bus = Arc::clone(&self.bus);

        for handle in self.handles.iter_mut().filter(|h| h.monitor.matches(monitor)) {
            let outcome = shutdown::contain(|| {
                let area = handle.resolve_area(&bus, monitor, monitor_rect);
                let mut ctx = DrawContext {
                    surface: &mut *surface,
                    monitor_rect,
                    virtual_rect,
                    monitor_index: monitor.index,
                    area,
                    now,
                };
                handle.widget.draw(&mut ctx)
            });

            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(format!("panicked: {panic}")),
            };

            match fault {
                None => {
                    handle.failures = 0;
                    report.drawn += 1;
                }
                Some(reason) => {
                    handle.failures += 1;
                    report.failed += 1;
                    warn!(
                        "[LIVEPAPER][WIDGETS] '{}' failed on monitor {} ({} in a row): {}",
                        handle.name,
                        monitor.index,
                        handle.failures,
                        reason
                    );
                }
            }
        }

        report
    }
}

fn read_user_settings(path: &Path) -> Result<Settings> {
    if !path.is_file() {
        return Ok(Settings::new());
    }
    match serde_json::from_str::<Value>(&fs::read_to_string(path)?)? {
        Value::Object(map) => Ok(map),
        _ => Err(LivepaperError::Config(format!(
            "{} is not a JSON object",
            path.display()
        ))),
    }
}

/// Manifest defaults (including its placement) overlaid key by key with the
/// user file.
fn merge_settings(manifest: &WidgetManifest, user: Settings) -> Settings {
    let mut merged = manifest.settings.clone();
    if let Some(p) = manifest.placement {
        for (key, value) in [("nx", p.nx), ("ny", p.ny), ("nw", p.nw), ("nh", p.nh)] {
            merged.insert(key.to_string(), Value::from(value));
        }
    }
    for (key, value) in user {
        merged.insert(key, value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::fill_rect;
    use chrono::TimeZone;
    use image::Rgba;
    use serde_json::json;
    use tempfile::TempDir;

    struct Failing;
    struct Panicking;
    struct Painter;

    impl Widget for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn apply_settings(&mut self, _: &Settings) -> Result<()> {
            Ok(())
        }
        fn preferred_size(&self, _: &Rect) -> (u32, u32) {
            (4, 4)
        }
        fn draw(&mut self, _: &mut DrawContext<'_>) -> Result<()> {
            Err(LivepaperError::widget("failing", "always"))
        }
    }

    impl Widget for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn apply_settings(&mut self, _: &Settings) -> Result<()> {
            Ok(())
        }
        fn preferred_size(&self, _: &Rect) -> (u32, u32) {
            (4, 4)
        }
        fn draw(&mut self, _: &mut DrawContext<'_>) -> Result<()> {
            panic!("widget bug");
        }
    }

    impl Widget for Painter {
        fn name(&self) -> &str {
            "painter"
        }
        fn apply_settings(&mut self, _: &Settings) -> Result<()> {
            Ok(())
        }
        fn preferred_size(&self, _: &Rect) -> (u32, u32) {
            (10, 10)
        }
        fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
            fill_rect(ctx.surface, ctx.area, Rgba([0, 255, 0, 255]));
            Ok(())
        }
    }

    fn registry() -> WidgetRegistry {
        let mut registry = WidgetRegistry::with_builtins();
        registry.register("failing", || Box::new(Failing));
        registry.register("panicking", || Box::new(Panicking));
        registry.register("painter", || Box::new(Painter));
        registry
    }

    fn write_widget(root: &Path, folder: &str, manifest: Value, user: Option<Value>) {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        if let Some(user) = user {
            fs::write(dir.join(USER_SETTINGS_FILE), user.to_string()).unwrap();
        }
    }

    fn monitor(index: usize, bounds: Rect) -> MonitorDescriptor {
        MonitorDescriptor {
            index,
            bounds,
            is_primary: index == 0,
            backend_id: None,
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn faulty_widgets_do_not_stop_the_others() {
        let tmp = TempDir::new().unwrap();
        write_widget(tmp.path(), "a_failing", json!({"name": "failing", "entry": "failing"}), None);
        write_widget(tmp.path(), "b_panicking", json!({"name": "panicking", "entry": "panicking"}), None);
        write_widget(tmp.path(), "c_painter", json!({"name": "painter", "entry": "painter"}), None);

        let mut host = WidgetPluginHost::new(registry(), Arc::new(PlacementBus::new()));
        assert_eq!(host.load(tmp.path()), 3);

        let rect = Rect::new(0, 0, 40, 40);
        let mut surface = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255]));
        for _ in 0..2 {
            let report = host.draw_all(&mut surface, &monitor(0, rect), rect, rect, now());
            assert_eq!(report, DrawReport { drawn: 1, failed: 2 });
        }

        assert_eq!(surface.get_pixel(5, 5), &Rgba([0, 255, 0, 255]));
        assert_eq!(host.handles()[0].failures, 2);
        assert_eq!(host.handles()[1].failures, 2);
        assert_eq!(host.handles()[2].failures, 0);
    }

    #[test]
    fn disabled_and_unresolvable_widgets_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write_widget(tmp.path(), "off", json!({"name": "off", "entry": "clock", "enabled": false}), None);
        write_widget(
            tmp.path(),
            "user_off",
            json!({"name": "user_off", "entry": "clock"}),
            Some(json!({"enabled": false})),
        );
        write_widget(tmp.path(), "unknown", json!({"name": "unknown", "entry": "weather"}), None);
        fs::create_dir_all(tmp.path().join("no_manifest")).unwrap();
        write_widget(tmp.path(), "ok", json!({"name": "clock", "entry": "clock"}), None);

        let mut host = WidgetPluginHost::new(registry(), Arc::new(PlacementBus::new()));
        assert_eq!(host.load(tmp.path()), 1);
        assert_eq!(host.handles()[0].name, "clock");
    }

    #[test]
    fn user_settings_win_per_key() {
        let tmp = TempDir::new().unwrap();
        write_widget(
            tmp.path(),
            "clock",
            json!({
                "name": "clock",
                "entry": "clock",
                "settings": {"color": "#ffffff", "scale": 2, "monitor": "*"},
                "placement": {"nx": 0.1, "ny": 0.1, "nw": 0.2, "nh": 0.2}
            }),
            Some(json!({"scale": 4, "monitor": "p", "nx": 0.5})),
        );

        let mut host = WidgetPluginHost::new(registry(), Arc::new(PlacementBus::new()));
        host.load(tmp.path());
        let handle = &host.handles()[0];
        assert_eq!(handle.settings["color"], json!("#ffffff"));
        assert_eq!(handle.settings["scale"], json!(4));
        assert_eq!(handle.settings["nx"], json!(0.5));
        assert_eq!(handle.settings["ny"], json!(0.1));
        assert_eq!(handle.monitor, MonitorTarget::Primary);
    }

    #[test]
    fn invalid_settings_fault_at_load() {
        let tmp = TempDir::new().unwrap();
        write_widget(
            tmp.path(),
            "clock",
            json!({"name": "clock", "entry": "clock", "settings": {"color": "nope"}}),
            None,
        );
        let mut host = WidgetPluginHost::new(registry(), Arc::new(PlacementBus::new()));
        assert_eq!(host.load(tmp.path()), 0);
    }

    #[test]
    fn placement_precedence_bus_then_settings_then_anchor() {
        let tmp = TempDir::new().unwrap();
        write_widget(
            tmp.path(),
            "painter",
            json!({"name": "painter", "entry": "painter",
                   "placement": {"nx": 0.5, "ny": 0.5, "nw": 0.25, "nh": 0.25}}),
            None,
        );
        let bus = Arc::new(PlacementBus::new());
        let mut host = WidgetPluginHost::new(registry(), Arc::clone(&bus));
        host.load(tmp.path());

        let m = monitor(1, Rect::new(100, 0, 200, 100));
        let local = Rect::new(0, 0, 200, 100);
        let handle = &host.handles()[0];

        assert_eq!(handle.resolve_area(&bus, &m, local), Rect::new(100, 50, 50, 25));

        bus.set(None, "Painter", NormRect::new(0.0, 0.0, 0.5, 0.5));
        assert_eq!(handle.resolve_area(&bus, &m, local), Rect::new(0, 0, 100, 50));

        bus.set(Some(1), "painter", NormRect::new(0.5, 0.0, 0.5, 1.0));
        assert_eq!(handle.resolve_area(&bus, &m, local), Rect::new(100, 0, 100, 100));
        let other = monitor(0, Rect::new(0, 0, 200, 100));
        assert_eq!(handle.resolve_area(&bus, &other, local), Rect::new(0, 0, 100, 50));
    }

    #[test]
    fn anchor_with_fraction_and_pixel_offsets() {
        let tmp = TempDir::new().unwrap();
        write_widget(
            tmp.path(),
            "painter",
            json!({"name": "painter", "entry": "painter",
                   "settings": {"anchor": "bottom-right", "offset_x": 0.1, "offset_y": 5}}),
            None,
        );
        let bus = PlacementBus::new();
        let mut host = WidgetPluginHost::new(registry(), Arc::new(PlacementBus::new()));
        host.load(tmp.path());

        let m = monitor(0, Rect::new(0, 0, 200, 100));
        let area = host.handles()[0].resolve_area(&bus, &m, Rect::new(50, 0, 200, 100));
        // 200 - 10 - 20 = 170 from the monitor's left edge; 100 - 10 - 5 = 85.
        assert_eq!(area, Rect::new(220, 85, 10, 10));
    }

    #[test]
    fn monitor_target_filters_draws() {
        let tmp = TempDir::new().unwrap();
        write_widget(
            tmp.path(),
            "painter",
            json!({"name": "painter", "entry": "painter", "settings": {"monitor": 1}}),
            None,
        );
        let mut host = WidgetPluginHost::new(registry(), Arc::new(PlacementBus::new()));
        host.load(tmp.path());

        let rect = Rect::new(0, 0, 20, 20);
        let mut surface = RgbaImage::new(20, 20);
        assert_eq!(host.draw_all(&mut surface, &monitor(0, rect), rect, rect, now()).drawn, 0);
        assert_eq!(host.draw_all(&mut surface, &monitor(1, rect), rect, rect, now()).drawn, 1);
    }

    #[test]
    fn monitor_target_parsing() {
        assert_eq!(MonitorTarget::from_setting(None), MonitorTarget::All);
        assert_eq!(MonitorTarget::from_setting(Some(&json!("*"))), MonitorTarget::All);
        assert_eq!(MonitorTarget::from_setting(Some(&json!("P"))), MonitorTarget::Primary);
        assert_eq!(MonitorTarget::from_setting(Some(&json!("2"))), MonitorTarget::Index(2));
        assert_eq!(MonitorTarget::from_setting(Some(&json!(3))), MonitorTarget::Index(3));
    }
}
