//! Widgets compiled into the addon.

use image::Rgba;

use super::{
    draw_text, fill_rect, font, parse_color, setting_bool, setting_str, setting_u32, DrawContext,
    Settings, Widget,
};
use crate::{
    error::{LivepaperError, Result},
    geometry::Rect,
};

const DEFAULT_TEXT: Rgba<u8> = Rgba([255, 255, 255, 230]);

fn color_setting(widget: &str, settings: &Settings, key: &str, default: Rgba<u8>) -> Result<Rgba<u8>> {
    match setting_str(settings, key) {
        Some(raw) => parse_color(raw)
            .ok_or_else(|| LivepaperError::widget(widget, format!("invalid color '{raw}' for '{key}'"))),
        None => Ok(default),
    }
}

/// Text centered in the widget area, scaled to fit unless a scale is set.
fn draw_centered(ctx: &mut DrawContext<'_>, text: &str, scale: Option<u32>, color: Rgba<u8>) {
    let area = ctx.area;
    let scale = scale.unwrap_or_else(|| font::fit_scale(text, area.width, area.height));
    let (w, h) = font::measure(text, scale);
    let x = area.x + (area.width as i32 - w as i32) / 2;
    let y = area.y + (area.height as i32 - h as i32) / 2;
    draw_text(ctx.surface, x, y, text, scale, color);
}

fn text_size(monitor: &Rect, sample: &str) -> (u32, u32) {
    let scale = (monitor.height / 120).max(1);
    let (w, h) = font::measure(sample, scale);
    (w + 2 * scale, h + 2 * scale)
}

pub struct ClockWidget {
    color: Rgba<u8>,
    scale: Option<u32>,
    twelve_hour: bool,
    show_seconds: bool,
}

impl ClockWidget {
    pub fn new() -> Self {
        Self {
            color: DEFAULT_TEXT,
            scale: None,
            twelve_hour: false,
            show_seconds: true,
        }
    }

    fn format(&self) -> &'static str {
        match (self.twelve_hour, self.show_seconds) {
            (false, true) => "%H:%M:%S",
            (false, false) => "%H:%M",
            (true, true) => "%I:%M:%S %p",
            (true, false) => "%I:%M %p",
        }
    }
}

impl Widget for ClockWidget {
    fn name(&self) -> &str {
        "clock"
    }

    fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        self.color = color_setting("clock", settings, "color", DEFAULT_TEXT)?;
        self.scale = setting_u32(settings, "scale").filter(|s| *s > 0);
        self.twelve_hour = setting_bool(settings, "twelve_hour").unwrap_or(false);
        self.show_seconds = setting_bool(settings, "show_seconds").unwrap_or(true);
        Ok(())
    }

    fn preferred_size(&self, monitor: &Rect) -> (u32, u32) {
        text_size(monitor, &"0".repeat(self.format().len() + 2))
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        let text = ctx.now.format(self.format()).to_string();
        draw_centered(ctx, &text, self.scale, self.color);
        Ok(())
    }
}

pub struct DateWidget {
    color: Rgba<u8>,
    scale: Option<u32>,
    format: String,
}

impl DateWidget {
    pub fn new() -> Self {
        Self {
            color: DEFAULT_TEXT,
            scale: None,
            format: "%Y-%m-%d".to_string(),
        }
    }
}

impl Widget for DateWidget {
    fn name(&self) -> &str {
        "date"
    }

    fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        self.color = color_setting("date", settings, "color", DEFAULT_TEXT)?;
        self.scale = setting_u32(settings, "scale").filter(|s| *s > 0);
        if let Some(format) = setting_str(settings, "format") {
            if format.trim().is_empty() {
                return Err(LivepaperError::widget("date", "empty date format"));
            }
            self.format = format.to_string();
        }
        Ok(())
    }

    fn preferred_size(&self, monitor: &Rect) -> (u32, u32) {
        text_size(monitor, "0000-00-00")
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        use std::fmt::Write;

        // chrono reports bad format strings through fmt::Error.
        let mut text = String::new();
        write!(text, "{}", ctx.now.format(&self.format))
            .map_err(|_| LivepaperError::widget("date", format!("bad format '{}'", self.format)))?;
        draw_centered(ctx, &text, self.scale, self.color);
        Ok(())
    }
}

/// Translucent backdrop, usually placed underneath text widgets.
pub struct PanelWidget {
    color: Rgba<u8>,
}

impl PanelWidget {
    pub fn new() -> Self {
        Self {
            color: Rgba([0, 0, 0, 96]),
        }
    }
}

impl Widget for PanelWidget {
    fn name(&self) -> &str {
        "panel"
    }

    fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        self.color = color_setting("panel", settings, "color", self.color)?;
        Ok(())
    }

    fn preferred_size(&self, monitor: &Rect) -> (u32, u32) {
        (monitor.width / 4, monitor.height / 8)
    }

    fn draw(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        fill_rect(ctx.surface, ctx.area, self.color);
        Ok(())
    }
}
