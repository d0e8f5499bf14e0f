//! OS wallpaper surface.
//!
//! Everything that talks to the desktop shell goes through [`DesktopShell`].
//! On Windows this is backed by GDI, the registry and `IDesktopWallpaper`;
//! elsewhere the headless shell stands in.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    error::Result,
    geometry::{MonitorDescriptor, Rect},
};

pub mod headless;
#[cfg(windows)]
pub mod win32;

pub use headless::HeadlessShell;

/// Wallpaper display mode as stored under `Control Panel\Desktop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayStyle {
    pub style_id: u32,
    pub tile: u32,
}

impl DisplayStyle {
    pub const SPAN: Self = Self { style_id: 22, tile: 0 };
    pub const FILL: Self = Self { style_id: 10, tile: 0 };
}

/// What the desktop currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WallpaperSettings {
    pub path: Option<PathBuf>,
    pub style: DisplayStyle,
}

/// The per-monitor wallpaper API. Ids are opaque device paths.
pub trait PerMonitorApi: Send {
    fn monitors(&self) -> Result<Vec<(String, Rect)>>;
    fn set_wallpaper(&self, monitor_id: &str, image: &Path) -> Result<()>;
}

pub trait DesktopShell: Send + Sync {
    fn enumerate_monitors(&self) -> Vec<MonitorDescriptor>;

    /// Capability probe. `PlatformUnavailable` means the span fallback
    /// must be used for the rest of the process lifetime.
    fn open_per_monitor(&self) -> Result<Box<dyn PerMonitorApi>>;

    fn current_wallpaper(&self) -> Option<WallpaperSettings>;

    fn apply_style(&self, style: DisplayStyle) -> Result<()>;

    /// Global "set wallpaper" for the whole virtual desktop.
    fn set_wallpaper(&self, image: &Path) -> Result<()>;
}

/// The shell for the current target.
#[cfg(windows)]
pub fn native_shell(_headless_monitors: &[Rect]) -> Arc<dyn DesktopShell> {
    Arc::new(win32::WindowsShell::new())
}

#[cfg(not(windows))]
pub fn native_shell(headless_monitors: &[Rect]) -> Arc<dyn DesktopShell> {
    Arc::new(HeadlessShell::new(headless_monitors.to_vec()))
}
