//! Shell without a desktop: configured monitors, in-memory wallpaper state and
//! a log of every call. Used on non-Windows targets and by the tests.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use super::{DesktopShell, DisplayStyle, PerMonitorApi, WallpaperSettings};
use crate::{
    error::{LivepaperError, Result},
    geometry::{MonitorDescriptor, Rect},
    info,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCall {
    ApplyStyle(DisplayStyle),
    SetWallpaper(PathBuf),
    SetMonitorWallpaper(String, PathBuf),
}

#[derive(Debug, Default)]
struct HeadlessState {
    monitors: Vec<Rect>,
    per_monitor: bool,
    current: Option<WallpaperSettings>,
    calls: Vec<ShellCall>,
    failing_sets: u32,
}

#[derive(Clone, Default)]
pub struct HeadlessShell {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessShell {
    pub fn new(monitors: Vec<Rect>) -> Self {
        let monitors = if monitors.is_empty() {
            vec![Rect::new(0, 0, 1920, 1080)]
        } else {
            monitors
        };

        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                monitors,
                ..Default::default()
            })),
        }
    }

    #[cfg(test)]
    pub fn with_per_monitor(self, supported: bool) -> Self {
        self.state.lock().per_monitor = supported;
        self
    }

    #[cfg(test)]
    pub fn with_wallpaper(self, path: &Path, style: DisplayStyle) -> Self {
        self.state.lock().current = Some(WallpaperSettings {
            path: Some(path.to_path_buf()),
            style,
        });
        self
    }

    #[cfg(test)]
    pub fn set_monitors(&self, monitors: Vec<Rect>) {
        self.state.lock().monitors = monitors;
    }

    #[cfg(test)]
    /// Make the next `count` global set-wallpaper calls fail.
    pub fn fail_next_sets(&self, count: u32) {
        self.state.lock().failing_sets = count;
    }

    pub fn calls(&self) -> Vec<ShellCall> {
        self.state.lock().calls.clone()
    }

    pub fn current(&self) -> Option<WallpaperSettings> {
        self.state.lock().current.clone()
    }

    /// Tied to the monitor's position, not its enumeration slot, so it
    /// survives reordering the way a device path does.
    fn monitor_id(rect: &Rect) -> String {
        format!("headless@{},{}", rect.x, rect.y)
    }
}

impl DesktopShell for HeadlessShell {
    fn enumerate_monitors(&self) -> Vec<MonitorDescriptor> {
        self.state
            .lock()
            .monitors
            .iter()
            .enumerate()
            .map(|(index, bounds)| MonitorDescriptor {
                index,
                bounds: *bounds,
                is_primary: index == 0,
                backend_id: None,
            })
            .collect()
    }

    fn open_per_monitor(&self) -> Result<Box<dyn PerMonitorApi>> {
        if !self.state.lock().per_monitor {
            return Err(LivepaperError::PlatformUnavailable(
                "headless shell has no per-monitor wallpaper API".to_string(),
            ));
        }
        Ok(Box::new(HeadlessPerMonitor {
            shell: self.clone(),
        }))
    }

    fn current_wallpaper(&self) -> Option<WallpaperSettings> {
        self.current()
    }

    fn apply_style(&self, style: DisplayStyle) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(ShellCall::ApplyStyle(style));
        let path = state.current.as_ref().and_then(|c| c.path.clone());
        state.current = Some(WallpaperSettings { path, style });
        Ok(())
    }

    fn set_wallpaper(&self, image: &Path) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_sets > 0 {
            state.failing_sets -= 1;
            return Err(LivepaperError::Shell("injected set-wallpaper failure".to_string()));
        }

        info!("[LIVEPAPER][HEADLESS] set wallpaper -> {}", image.display());
        state.calls.push(ShellCall::SetWallpaper(image.to_path_buf()));
        let style = state
            .current
            .as_ref()
            .map(|c| c.style)
            .unwrap_or(DisplayStyle::FILL);
        state.current = Some(WallpaperSettings {
            path: Some(image.to_path_buf()),
            style,
        });
        Ok(())
    }
}

struct HeadlessPerMonitor {
    shell: HeadlessShell,
}

impl PerMonitorApi for HeadlessPerMonitor {
    fn monitors(&self) -> Result<Vec<(String, Rect)>> {
        Ok(self
            .shell
            .state
            .lock()
            .monitors
            .iter()
            .map(|rect| (HeadlessShell::monitor_id(rect), *rect))
            .collect())
    }

    fn set_wallpaper(&self, monitor_id: &str, image: &Path) -> Result<()> {
        let mut state = self.shell.state.lock();
        state
            .calls
            .push(ShellCall::SetMonitorWallpaper(monitor_id.to_string(), image.to_path_buf()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_a_single_primary_monitor() {
        let shell = HeadlessShell::new(Vec::new());
        let monitors = shell.enumerate_monitors();
        assert_eq!(monitors.len(), 1);
        assert!(monitors[0].is_primary);
    }

    #[test]
    fn per_monitor_api_follows_capability() {
        let shell = HeadlessShell::new(Vec::new());
        assert!(matches!(
            shell.open_per_monitor(),
            Err(LivepaperError::PlatformUnavailable(_))
        ));

        let shell = shell.with_per_monitor(true);
        let api = shell.open_per_monitor().unwrap();
        assert_eq!(api.monitors().unwrap().len(), 1);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let shell = HeadlessShell::new(Vec::new());
        shell.fail_next_sets(1);
        assert!(shell.set_wallpaper(Path::new("a.bmp")).is_err());
        assert!(shell.set_wallpaper(Path::new("a.bmp")).is_ok());
        assert_eq!(shell.calls().len(), 1);
    }
}
