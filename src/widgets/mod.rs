//! Widgets painted on top of the base composite.
//!
//! A widget is anything satisfying [`Widget`]. Implementations are produced by
//! factories in the [`registry::WidgetRegistry`]; the manifest in each widget
//! folder names the factory through its `entry` field.

use chrono::{DateTime, Local};
use image::{Rgba, RgbaImage};
use serde_json::{Map, Value};

use crate::{error::Result, geometry::Rect};

pub mod builtin;
pub mod font;
pub mod host;
pub mod registry;

pub use host::{DrawReport, WidgetHandle, WidgetPluginHost};
pub use registry::WidgetRegistry;

/// Merged widget settings: manifest defaults overlaid by user overrides.
pub type Settings = Map<String, Value>;

/// Everything a widget may look at while drawing one frame.
///
/// All rectangles are in surface coordinates: for a span frame the virtual
/// screen sits at the origin, for a per-monitor frame the monitor does.
pub struct DrawContext<'a> {
    pub surface: &'a mut RgbaImage,
    pub monitor_rect: Rect,
    pub virtual_rect: Rect,
    pub monitor_index: usize,
    /// Where this widget should paint, already resolved from placement.
    pub area: Rect,
    pub now: DateTime<Local>,
}

pub trait Widget: Send {
    fn name(&self) -> &str;

    fn apply_settings(&mut self, settings: &Settings) -> Result<()>;

    /// Size used when neither the placement bus nor the settings give one.
    fn preferred_size(&self, monitor: &Rect) -> (u32, u32);

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()>;
}

/// `#rgb`, `#rrggbb` or `#rrggbbaa`.
pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();

    match hex.len() {
        3 => {
            let mut out = [0u8; 4];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            out[3] = 255;
            Some(Rgba(out))
        }
        6 => Some(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        ])),
        8 => Some(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            channel(&hex[6..8])?,
        ])),
        _ => None,
    }
}

pub fn setting_str<'a>(settings: &'a Settings, key: &str) -> Option<&'a str> {
    settings.get(key)?.as_str()
}

pub fn setting_bool(settings: &Settings, key: &str) -> Option<bool> {
    settings.get(key)?.as_bool()
}

pub fn setting_f64(settings: &Settings, key: &str) -> Option<f64> {
    settings.get(key)?.as_f64()
}

pub fn setting_u32(settings: &Settings, key: &str) -> Option<u32> {
    settings
        .get(key)?
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
}

/// Source-over blend of one pixel, silently clipped to the surface.
pub fn blend_pixel(surface: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= i64::from(surface.width()) || y >= i64::from(surface.height()) {
        return;
    }

    let dst = surface.get_pixel_mut(x as u32, y as u32);
    let alpha = u32::from(color[3]);
    if alpha == 255 {
        *dst = color;
        return;
    }
    if alpha == 0 {
        return;
    }

    let inv = 255 - alpha;
    for c in 0..3 {
        dst[c] = ((u32::from(color[c]) * alpha + u32::from(dst[c]) * inv) / 255) as u8;
    }
    dst[3] = (alpha + u32::from(dst[3]) * inv / 255).min(255) as u8;
}

pub fn fill_rect(surface: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    let bounds = Rect::new(0, 0, surface.width(), surface.height());
    let Some(clipped) = rect.intersect(&bounds) else {
        return;
    };

    for y in clipped.y..clipped.bottom() {
        for x in clipped.x..clipped.right() {
            blend_pixel(surface, i64::from(x), i64::from(y), color);
        }
    }
}

pub fn draw_text(surface: &mut RgbaImage, x: i32, y: i32, text: &str, scale: u32, color: Rgba<u8>) {
    let scale = scale.max(1);
    let advance = ((font::GLYPH_WIDTH + font::GLYPH_SPACING) * scale) as i32;

    for (i, c) in text.chars().enumerate() {
        let origin_x = x + advance * i as i32;
        for (row, bits) in font::glyph(c).iter().enumerate() {
            for col in 0..font::GLYPH_WIDTH {
                if bits & (1 << (font::GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + (col * scale) as i32;
                let py = y + (row as u32 * scale) as i32;
                fill_rect(surface, Rect::new(px, py, scale, scale), color);
            }
        }
    }
}
