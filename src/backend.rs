//! The two ways of getting a frame onto the desktop.
//!
//! Which one is used is decided once, at startup, by probing the per-monitor
//! API. A failed probe means span mode for the rest of the process.

use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use image::{ImageFormat, RgbaImage};
use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::{
    error::{LivepaperError, Result},
    geometry::Rect,
    info,
    platform::{DesktopShell, DisplayStyle, PerMonitorApi},
    warn,
};

pub const SPAN_FILE_NAME: &str = "livepaper.bmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendMode {
    /// Per-monitor when available, span otherwise.
    #[default]
    Auto,
    Span,
}

impl BackendMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "span" => Self::Span,
            _ => Self::Auto,
        }
    }
}

/// Bounded retry for writes that a shell thumbnailer or a scanner may
/// briefly hold open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Pairs the "desktop still ours?" check with the OS call that shows a
/// frame. Restore closes it, so no frame can be shown after the original
/// wallpaper is back.
#[derive(Debug, Default)]
pub struct PublishGate {
    closed: Mutex<bool>,
}

impl PublishGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `show` unless the gate is closed. `Ok(false)` means it was withheld.
    pub fn show(&self, show: impl FnOnce() -> Result<()>) -> Result<bool> {
        let closed = self.closed.lock();
        if *closed {
            return Ok(false);
        }
        show()?;
        Ok(true)
    }

    /// Close the gate and run `f` while no `show` can start or be in flight.
    pub fn close_with<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut closed = self.closed.lock();
        *closed = true;
        f()
    }
}

/// Encode `image` as BMP next to `path`, then rename it over `path`.
pub fn write_atomic(path: &Path, image: &RgbaImage, policy: PublishPolicy) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| LivepaperError::Config(format!("{} has no parent directory", path.display())))?;

    let mut attempt = 0;
    loop {
        match write_once(dir, path, image) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(
                    "[LIVEPAPER][OUTPUT] Write of {} failed (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    policy.retries + 1,
                    e
                );
                thread::sleep(policy.backoff * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

fn write_once(dir: &Path, path: &Path, image: &RgbaImage) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        image.write_to(&mut writer, ImageFormat::Bmp)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| LivepaperError::Io(e.error))?;
    Ok(())
}

pub struct PerMonitorBackend {
    api: Box<dyn PerMonitorApi>,
    output_dir: PathBuf,
    policy: PublishPolicy,
}

impl PerMonitorBackend {
    pub fn list_monitors(&self) -> Result<Vec<(String, Rect)>> {
        self.api.monitors()
    }

    pub fn frame_path(&self, monitor_id: &str) -> PathBuf {
        let slug: String = monitor_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let slug = slug.trim_matches('_');
        let slug = &slug[slug.len().saturating_sub(48)..];
        self.output_dir.join(format!("monitor_{slug}.bmp"))
    }

    /// Write the frame for one monitor and hand it to the OS. On failure the
    /// monitor keeps whatever it showed before. `None` when the gate is closed.
    pub fn publish(&self, monitor_id: &str, frame: &RgbaImage, gate: &PublishGate) -> Result<Option<PathBuf>> {
        let path = self.frame_path(monitor_id);
        write_atomic(&path, frame, self.policy)?;
        let shown = gate.show(|| self.api.set_wallpaper(monitor_id, &path))?;
        Ok(shown.then_some(path))
    }
}

pub struct SpanBackend {
    shell: Arc<dyn DesktopShell>,
    stable_path: PathBuf,
    policy: PublishPolicy,
    style_applied: bool,
}

impl SpanBackend {
    pub fn new(shell: Arc<dyn DesktopShell>, output_dir: &Path, policy: PublishPolicy) -> Self {
        Self {
            shell,
            stable_path: output_dir.join(SPAN_FILE_NAME),
            policy,
            style_applied: false,
        }
    }

    pub fn stable_path(&self) -> &Path {
        &self.stable_path
    }

    pub fn style_applied(&self) -> bool {
        self.style_applied
    }

    /// Replace the stable image, switch to span mode if not done yet, and poke
    /// the shell. The poke happens every time even though the path never
    /// changes; some shells only reload when told to. Returns `false` when
    /// the gate is closed and nothing reached the shell.
    pub fn publish(&mut self, frame: &RgbaImage, gate: &PublishGate) -> Result<bool> {
        write_atomic(&self.stable_path, frame, self.policy)?;

        let shell = &self.shell;
        let stable_path = &self.stable_path;
        let style_applied = &mut self.style_applied;
        gate.show(|| {
            if !*style_applied {
                shell.apply_style(DisplayStyle::SPAN)?;
                *style_applied = true;
                info!("[LIVEPAPER][SPAN] Desktop switched to span mode");
            }
            shell.set_wallpaper(stable_path)
        })
    }
}

pub enum WallpaperBackend {
    PerMonitor(PerMonitorBackend),
    Span(SpanBackend),
}

impl WallpaperBackend {
    pub fn select(
        shell: Arc<dyn DesktopShell>,
        mode: BackendMode,
        output_dir: &Path,
        policy: PublishPolicy,
    ) -> Self {
        if mode == BackendMode::Span {
            info!("[LIVEPAPER][BACKEND] Span mode forced by configuration");
            return Self::Span(SpanBackend::new(shell, output_dir, policy));
        }

        match shell.open_per_monitor() {
            Ok(api) => {
                info!("[LIVEPAPER][BACKEND] Using per-monitor wallpaper API");
                Self::PerMonitor(PerMonitorBackend {
                    api,
                    output_dir: output_dir.to_path_buf(),
                    policy,
                })
            }
            Err(e) => {
                warn!("[LIVEPAPER][BACKEND] Per-monitor API unavailable ({}); falling back to span", e);
                Self::Span(SpanBackend::new(shell, output_dir, policy))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PerMonitor(_) => "per-monitor",
            Self::Span(_) => "span",
        }
    }
}
