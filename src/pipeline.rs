//! The single render path. Everything that touches the base cache, the output
//! files or the backend flags runs through [`RenderPipeline::render`] while the
//! caller holds the pipeline mutex.

use std::{path::Path, sync::Arc};

use chrono::{DateTime, Local};
use image::Rgba;

use crate::{
    backend::WallpaperBackend,
    backup::BackupRestoreManager,
    base_cache::BaseImageCache,
    compositor::{self, MonitorBackground},
    geometry::{GeometryProvider, Layout},
    info,
    platform::DesktopShell,
    warn,
    widgets::WidgetPluginHost,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorSelection {
    #[default]
    All,
    Index(usize),
}

/// A selected monitor, pinned to its per-monitor id when one is known so a
/// reordered enumeration keeps updating the same physical screen.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PinnedMonitor {
    index: usize,
    backend_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Nothing to draw on (no monitors, or the wallpaper was restored).
    Skipped,
    Published { monitors: usize, widget_faults: usize },
    /// The frame could not be published; the previous one stays on screen.
    Abandoned,
}

#[derive(Debug, Clone, Default)]
pub struct RenderStats {
    pub frames: u64,
    pub skipped: u64,
    pub abandoned: u64,
    pub widget_faults: u64,
    pub last_render: Option<DateTime<Local>>,
}

pub struct RenderPipeline {
    shell: Arc<dyn DesktopShell>,
    backup: Arc<BackupRestoreManager>,
    backend: WallpaperBackend,
    cache: BaseImageCache,
    host: WidgetPluginHost,
    background: MonitorBackground,
    fill: Rgba<u8>,
    pinned: Option<PinnedMonitor>,
    last_layout: Option<Layout>,
    stats: RenderStats,
}

impl RenderPipeline {
    pub fn new(
        shell: Arc<dyn DesktopShell>,
        backup: Arc<BackupRestoreManager>,
        backend: WallpaperBackend,
        host: WidgetPluginHost,
        background: MonitorBackground,
        fill: Rgba<u8>,
    ) -> Self {
        let cache = BaseImageCache::new(backup.source_image(), fill);
        Self {
            shell,
            backup,
            backend,
            cache,
            host,
            background,
            fill,
            pinned: None,
            last_layout: None,
            stats: RenderStats::default(),
        }
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn cache(&self) -> &BaseImageCache {
        &self.cache
    }

    pub fn host(&self) -> &WidgetPluginHost {
        &self.host
    }

    pub fn selection(&self) -> MonitorSelection {
        match &self.pinned {
            Some(pinned) => MonitorSelection::Index(pinned.index),
            None => MonitorSelection::All,
        }
    }

    pub fn set_selection(&mut self, selection: MonitorSelection) {
        self.pinned = match selection {
            MonitorSelection::All => None,
            MonitorSelection::Index(index) => {
                let layout = self.current_layout();
                let backend_id = layout.find(None, index).and_then(|m| m.backend_id.clone());
                info!(
                    "[LIVEPAPER][RENDER] Selected monitor {} (id {:?})",
                    index, backend_id
                );
                Some(PinnedMonitor { index, backend_id })
            }
        };
    }

    /// Layout with per-monitor ids attached when that backend is active.
    fn current_layout(&self) -> Layout {
        let mut layout = GeometryProvider::query(&*self.shell);
        if let WallpaperBackend::PerMonitor(backend) = &self.backend {
            if let Ok(ids) = backend.list_monitors() {
                layout.attach_backend_ids(&ids);
            }
        }
        layout
    }

    /// Index of the selected monitor in `layout`, following its id. `None`
    /// inside means the pinned monitor is gone.
    fn locate_pinned(&mut self, layout: &Layout) -> Option<Option<usize>> {
        let pinned = self.pinned.as_mut()?;
        let ids_known = layout.monitors.iter().any(|m| m.backend_id.is_some());
        let found = match pinned.backend_id.as_deref() {
            Some(id) if ids_known => layout.monitors.iter().find(|m| m.backend_id.as_deref() == Some(id)),
            _ => layout.find(None, pinned.index),
        };
        if let Some(monitor) = found {
            pinned.index = monitor.index;
            if pinned.backend_id.is_none() {
                pinned.backend_id = monitor.backend_id.clone();
            }
        }
        Some(found.map(|m| m.index))
    }

    pub fn set_appearance(&mut self, background: MonitorBackground, fill: Rgba<u8>) {
        self.background = background;
        self.fill = fill;
        self.cache.set_fill(fill);
    }

    pub fn load_widgets(&mut self, root: &Path) -> usize {
        self.host.load(root)
    }

    pub fn reload_widgets(&mut self) -> usize {
        self.host.reload()
    }

    /// Monitor count of the current layout.
    pub fn monitor_count(&self) -> usize {
        GeometryProvider::query(&*self.shell).monitors.len()
    }

    /// True when the monitor rectangles differ from the last rendered layout.
    pub fn layout_changed(&self) -> bool {
        let current = GeometryProvider::query(&*self.shell);
        match &self.last_layout {
            Some(last) => !same_rects(last, &current),
            None => false,
        }
    }

    pub fn render(&mut self, now: DateTime<Local>) -> RenderOutcome {
        if self.backup.is_restored() {
            self.stats.skipped += 1;
            return RenderOutcome::Skipped;
        }

        let layout = self.current_layout();
        if layout.monitors.is_empty() {
            warn!("[LIVEPAPER][RENDER] No monitors reported; skipping tick");
            self.stats.skipped += 1;
            return RenderOutcome::Skipped;
        }

        if let Some(last) = &self.last_layout {
            if !same_rects(last, &layout) {
                info!(
                    "[LIVEPAPER][RENDER] Monitor layout changed: {} -> {} monitor(s)",
                    last.monitors.len(),
                    layout.monitors.len()
                );
            }
        }

        let target = self.locate_pinned(&layout);
        let outcome = match &mut self.backend {
            WallpaperBackend::PerMonitor(backend) => {
                let base = match self.background {
                    MonitorBackground::Wallpaper => Some(&*self.cache.ensure_built(&layout)),
                    MonitorBackground::Solid => None,
                };

                let mut published = 0;
                let mut faults = 0;
                let mut withheld = false;
                for monitor in layout.monitors.iter().filter(|m| match target {
                    None => true,
                    Some(index) => index == Some(m.index),
                }) {
                    let frame = compositor::render_monitor_frame(
                        monitor,
                        &layout,
                        base,
                        self.background,
                        self.fill,
                        &mut self.host,
                        now,
                    );
                    faults += frame.report.failed;

                    let Some(id) = monitor.backend_id.as_deref() else {
                        warn!(
                            "[LIVEPAPER][RENDER] Monitor {} has no per-monitor id; skipped",
                            monitor.index
                        );
                        continue;
                    };
                    match backend.publish(id, &frame.image, self.backup.gate()) {
                        Ok(Some(_)) => published += 1,
                        Ok(None) => {
                            withheld = true;
                            break;
                        }
                        Err(e) => warn!(
                            "[LIVEPAPER][RENDER] Publish to monitor {} failed: {}",
                            monitor.index,
                            e
                        ),
                    }
                }

                if withheld {
                    RenderOutcome::Skipped
                } else if published == 0 {
                    RenderOutcome::Abandoned
                } else {
                    RenderOutcome::Published {
                        monitors: published,
                        widget_faults: faults,
                    }
                }
            }
            WallpaperBackend::Span(backend) => {
                let base = self.cache.ensure_built(&layout);
                let frame = compositor::render_span_frame(&layout, base, &mut self.host, now);
                match backend.publish(&frame.image, self.backup.gate()) {
                    Ok(true) => RenderOutcome::Published {
                        monitors: layout.monitors.len(),
                        widget_faults: frame.report.failed,
                    },
                    Ok(false) => RenderOutcome::Skipped,
                    Err(e) => {
                        warn!("[LIVEPAPER][RENDER] Span publish failed; tick abandoned: {}", e);
                        RenderOutcome::Abandoned
                    }
                }
            }
        };

        match outcome {
            RenderOutcome::Published { widget_faults, .. } => {
                self.stats.frames += 1;
                self.stats.widget_faults += widget_faults as u64;
                self.stats.last_render = Some(now);
            }
            RenderOutcome::Abandoned => self.stats.abandoned += 1,
            RenderOutcome::Skipped => self.stats.skipped += 1,
        }
        self.last_layout = Some(layout);
        outcome
    }

    pub fn status_line(&self) -> String {
        let selection = match self.selection() {
            MonitorSelection::All => "all".to_string(),
            MonitorSelection::Index(i) => i.to_string(),
        };
        let last = self
            .stats
            .last_render
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "backend={} monitor={} widgets={} frames={} abandoned={} skipped={} widget_faults={} base_builds={} last={}",
            self.backend.kind(),
            selection,
            self.host.handles().len(),
            self.stats.frames,
            self.stats.abandoned,
            self.stats.skipped,
            self.stats.widget_faults,
            self.cache.builds(),
            last
        )
    }
}

fn same_rects(a: &Layout, b: &Layout) -> bool {
    a.monitors.len() == b.monitors.len()
        && a
            .monitors
            .iter()
            .zip(&b.monitors)
            .all(|(x, y)| x.bounds == y.bounds && x.is_primary == y.is_primary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BackendMode, PublishPolicy},
        base_cache::NEUTRAL_FILL,
        geometry::Rect,
        placement::PlacementBus,
        platform::{headless::ShellCall, DisplayStyle, HeadlessShell},
        utility::AddonDirs,
        widgets::WidgetRegistry,
    };
    use chrono::TimeZone;
    use std::{fs, time::Duration};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        shell: HeadlessShell,
        backup: Arc<BackupRestoreManager>,
        pipeline: RenderPipeline,
    }

    fn fixture(per_monitor: bool) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let dirs = AddonDirs::under(tmp.path());
        dirs.create_all().unwrap();

        let original = tmp.path().join("original.png");
        image::RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]))
            .save(&original)
            .unwrap();
        let shell = HeadlessShell::new(vec![Rect::new(0, 0, 64, 32), Rect::new(64, 0, 32, 32)])
            .with_per_monitor(per_monitor)
            .with_wallpaper(&original, DisplayStyle::FILL);
        let shared: Arc<dyn DesktopShell> = Arc::new(shell.clone());

        let backup = Arc::new(BackupRestoreManager::new(Arc::clone(&shared), dirs.clone()));
        backup.backup();

        let widgets = tmp.path().join("widgets").join("clock");
        fs::create_dir_all(&widgets).unwrap();
        fs::write(widgets.join("manifest.json"), r#"{"name":"clock","entry":"clock"}"#).unwrap();

        let policy = PublishPolicy {
            retries: 1,
            backoff: Duration::from_millis(1),
        };
        let backend = WallpaperBackend::select(Arc::clone(&shared), BackendMode::Auto, &dirs.output, policy);
        let host = WidgetPluginHost::new(WidgetRegistry::with_builtins(), Arc::new(PlacementBus::new()));
        let mut pipeline = RenderPipeline::new(
            shared,
            Arc::clone(&backup),
            backend,
            host,
            MonitorBackground::Solid,
            NEUTRAL_FILL,
        );
        pipeline.load_widgets(&tmp.path().join("widgets"));

        Fixture {
            _tmp: tmp,
            shell,
            backup,
            pipeline,
        }
    }

    fn at(second: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 10, 0, second).unwrap()
    }

    #[test]
    fn span_ticks_reuse_the_base_until_layout_changes() {
        let mut f = fixture(false);
        for s in 0..5 {
            assert!(matches!(f.pipeline.render(at(s)), RenderOutcome::Published { monitors: 2, .. }));
        }
        assert_eq!(f.pipeline.backend_kind(), "span");
        assert_eq!(f.pipeline.cache().builds(), 1);

        f.shell.set_monitors(vec![Rect::new(0, 0, 64, 32)]);
        assert!(f.pipeline.layout_changed());
        f.pipeline.render(at(6));
        f.pipeline.render(at(7));
        assert_eq!(f.pipeline.cache().builds(), 2);
        assert_eq!(f.pipeline.stats().frames, 7);
    }

    #[test]
    fn per_monitor_respects_selection() {
        let mut f = fixture(true);
        f.pipeline.set_selection(MonitorSelection::Index(1));
        let outcome = f.pipeline.render(at(0));
        assert_eq!(
            outcome,
            RenderOutcome::Published {
                monitors: 1,
                widget_faults: 0
            }
        );

        let sets: Vec<_> = f
            .shell
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ShellCall::SetMonitorWallpaper(id, _) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(sets, vec!["headless@64,0".to_string()]);
        // Solid background never needs the base composite.
        assert_eq!(f.pipeline.cache().builds(), 0);
    }

    #[test]
    fn selection_follows_the_monitor_when_enumeration_reorders() {
        let mut f = fixture(true);
        f.pipeline.set_selection(MonitorSelection::Index(1));

        f.shell.set_monitors(vec![Rect::new(64, 0, 32, 32), Rect::new(0, 0, 64, 32)]);
        assert!(matches!(f.pipeline.render(at(0)), RenderOutcome::Published { monitors: 1, .. }));
        assert_eq!(f.pipeline.selection(), MonitorSelection::Index(0));

        let last = f.shell.calls().into_iter().rev().find_map(|c| match c {
            ShellCall::SetMonitorWallpaper(id, _) => Some(id),
            _ => None,
        });
        assert_eq!(last.as_deref(), Some("headless@64,0"));

        // Once the pinned monitor is unplugged nothing else is picked.
        f.shell.set_monitors(vec![Rect::new(0, 0, 64, 32)]);
        assert_eq!(f.pipeline.render(at(1)), RenderOutcome::Abandoned);
    }

    #[test]
    fn failed_publish_abandons_the_tick() {
        let mut f = fixture(false);
        f.shell.fail_next_sets(1);
        assert_eq!(f.pipeline.render(at(0)), RenderOutcome::Abandoned);
        assert!(matches!(f.pipeline.render(at(1)), RenderOutcome::Published { .. }));
        assert_eq!(f.pipeline.stats().abandoned, 1);
    }

    #[test]
    fn no_monitors_skips() {
        let mut f = fixture(false);
        f.shell.set_monitors(Vec::new());
        assert_eq!(f.pipeline.render(at(0)), RenderOutcome::Skipped);
    }

    #[test]
    fn nothing_is_published_after_restore() {
        let mut f = fixture(false);
        f.pipeline.render(at(0));
        assert!(f.backup.restore().unwrap());
        let before = f.shell.calls().len();
        assert_eq!(f.pipeline.render(at(1)), RenderOutcome::Skipped);
        assert_eq!(f.shell.calls().len(), before);
        assert!(f.pipeline.status_line().contains("backend=span"));
    }
}
