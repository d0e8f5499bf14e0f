//! Frame assembly: background plus widgets, always on a fresh buffer.

use chrono::{DateTime, Local};
use image::{Rgba, RgbaImage};

use crate::{
    base_cache::BaseComposite,
    geometry::{Layout, MonitorDescriptor, Rect},
    widgets::{DrawReport, WidgetPluginHost},
};

/// What a per-monitor frame starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorBackground {
    /// Solid fill; the OS keeps showing the original elsewhere.
    #[default]
    Solid,
    /// The monitor's slice of the cached base composite.
    Wallpaper,
}

impl MonitorBackground {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "wallpaper" | "base" => Self::Wallpaper,
            _ => Self::Solid,
        }
    }
}

pub struct Frame {
    pub image: RgbaImage,
    pub report: DrawReport,
}

/// Frame sized to one monitor, widgets in monitor-local coordinates.
pub fn render_monitor_frame(
    monitor: &MonitorDescriptor,
    layout: &Layout,
    base: Option<&BaseComposite>,
    background: MonitorBackground,
    fill: Rgba<u8>,
    host: &mut WidgetPluginHost,
    now: DateTime<Local>,
) -> Frame {
    let (width, height) = monitor.bounds.size();
    let mut image = match (background, base) {
        (MonitorBackground::Wallpaper, Some(base)) => base.crop_monitor(&monitor.bounds),
        _ => RgbaImage::from_pixel(width, height, fill),
    };

    let monitor_rect = Rect::new(0, 0, width, height);
    let virtual_rect = layout.virtual_screen.bounds.relative_to(&monitor.bounds);
    let report = host.draw_all(&mut image, monitor, monitor_rect, virtual_rect, now);

    Frame { image, report }
}

/// Frame covering the virtual screen: a copy of the base, then every
/// monitor's widgets at that monitor's offset.
pub fn render_span_frame(
    layout: &Layout,
    base: &BaseComposite,
    host: &mut WidgetPluginHost,
    now: DateTime<Local>,
) -> Frame {
    let vs = layout.virtual_screen.bounds;
    let mut image = base.image.clone();
    let virtual_rect = Rect::new(0, 0, vs.width, vs.height);
    let mut report = DrawReport::default();

    for monitor in &layout.monitors {
        let monitor_rect = monitor.bounds.relative_to(&vs);
        let r = host.draw_all(&mut image, monitor, monitor_rect, virtual_rect, now);
        report.drawn += r.drawn;
        report.failed += r.failed;
    }

    Frame { image, report }
}
