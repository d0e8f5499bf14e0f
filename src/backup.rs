//! Snapshot of the user's wallpaper taken before takeover, restored exactly
//! once on exit or failure.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    backend::PublishGate,
    error::{LivepaperError, Result},
    info,
    platform::{DesktopShell, DisplayStyle},
    utility::AddonDirs,
    warn,
};

const BACKUP_META: &str = "backup.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallpaperBackup {
    pub original_path: Option<PathBuf>,
    pub style_id: u32,
    pub tile: u32,
    /// Private copy of the image bytes, immune to later overwrites.
    pub image_copy: Option<PathBuf>,
}

impl WallpaperBackup {
    pub fn style(&self) -> DisplayStyle {
        DisplayStyle {
            style_id: self.style_id,
            tile: self.tile,
        }
    }
}

pub struct BackupRestoreManager {
    shell: Arc<dyn DesktopShell>,
    dirs: AddonDirs,
    backup: Mutex<Option<WallpaperBackup>>,
    restored: AtomicBool,
    gate: PublishGate,
}

impl BackupRestoreManager {
    pub fn new(shell: Arc<dyn DesktopShell>, dirs: AddonDirs) -> Self {
        Self {
            shell,
            dirs,
            backup: Mutex::new(None),
            restored: AtomicBool::new(false),
            gate: PublishGate::new(),
        }
    }

    /// Capture the current wallpaper. Never fails: anything that goes wrong
    /// leaves the manager with a partial backup or none at all.
    pub fn backup(&self) -> Option<WallpaperBackup> {
        if let Err(e) = fs::create_dir_all(&self.dirs.backup) {
            warn!("[LIVEPAPER][BACKUP] Cannot create {}: {}", self.dirs.backup.display(), e);
        }

        let Some(current) = self.shell.current_wallpaper() else {
            warn!("[LIVEPAPER][BACKUP] Shell reported no wallpaper settings; no backup available");
            return None;
        };

        // A previous run was killed while our frame was on screen: the real
        // original is the one recorded by that run.
        let points_at_us = current
            .path
            .as_deref()
            .map(|p| p.starts_with(&self.dirs.output))
            .unwrap_or(false);
        if points_at_us {
            if let Some(previous) = self.load_meta() {
                warn!(
                    "[LIVEPAPER][BACKUP] Desktop still shows a livepaper frame; recovering backup of {:?}",
                    previous.original_path
                );
                *self.backup.lock() = Some(previous.clone());
                return Some(previous);
            }
            warn!("[LIVEPAPER][BACKUP] Desktop shows a livepaper frame and no previous backup exists");
        }

        let image_copy = current
            .path
            .as_deref()
            .filter(|p| !points_at_us && p.is_file())
            .and_then(|p| self.copy_image(p));

        let backup = WallpaperBackup {
            original_path: current.path.filter(|_| !points_at_us),
            style_id: current.style.style_id,
            tile: current.style.tile,
            image_copy,
        };

        if let Err(e) = self.save_meta(&backup) {
            warn!("[LIVEPAPER][BACKUP] Failed to persist backup metadata: {}", e);
        }

        info!(
            "[LIVEPAPER][BACKUP] Captured wallpaper {:?} style={} tile={} copy={:?}",
            backup.original_path, backup.style_id, backup.tile, backup.image_copy
        );
        *self.backup.lock() = Some(backup.clone());
        Some(backup)
    }

    fn copy_image(&self, source: &Path) -> Option<PathBuf> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("img")
            .to_lowercase();
        let target = self.dirs.backup.join(format!("original.{ext}"));
        match fs::copy(source, &target) {
            Ok(_) => Some(target),
            Err(e) => {
                warn!(
                    "[LIVEPAPER][BACKUP] Failed to copy {} into backup: {}",
                    source.display(),
                    e
                );
                None
            }
        }
    }

    fn save_meta(&self, backup: &WallpaperBackup) -> Result<()> {
        let raw = serde_json::to_string_pretty(backup)?;
        fs::write(self.dirs.backup.join(BACKUP_META), raw)?;
        Ok(())
    }

    fn load_meta(&self) -> Option<WallpaperBackup> {
        let raw = fs::read_to_string(self.dirs.backup.join(BACKUP_META)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn current(&self) -> Option<WallpaperBackup> {
        self.backup.lock().clone()
    }

    /// Image the base composite is built from: the private copy when we have
    /// one, otherwise the original path if it still exists.
    pub fn source_image(&self) -> Option<PathBuf> {
        let backup = self.backup.lock();
        let backup = backup.as_ref()?;
        backup
            .image_copy
            .clone()
            .filter(|p| p.is_file())
            .or_else(|| backup.original_path.clone().filter(|p| p.is_file()))
    }

    /// Every OS call that shows a frame goes through this gate.
    pub fn gate(&self) -> &PublishGate {
        &self.gate
    }

    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::Acquire)
    }

    /// Restore while holding the render lock, waiting at most `wait` for an
    /// in-flight frame to finish. Past the bound the restore goes ahead; the
    /// publish gate still keeps that frame off the desktop.
    pub fn restore_locked<T>(&self, render: &Mutex<T>, wait: Duration) -> Result<bool> {
        let guard = render.try_lock_for(wait);
        if guard.is_none() {
            warn!(
                "[LIVEPAPER][RESTORE] Render still busy after {}ms; restoring anyway",
                wait.as_millis()
            );
        }
        let result = self.restore();
        drop(guard);
        result
    }

    /// Single-shot restore. Returns `Ok(true)` for the caller that performed
    /// it and `Ok(false)` for everyone after.
    ///
    /// A failed restore leaves the desktop, the backup folder and the last
    /// frame untouched so the next start can recover from `backup.json`.
    pub fn restore(&self) -> Result<bool> {
        if self
            .restored
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        let result = self.gate.close_with(|| {
            let backup = self.backup.lock().clone();
            let applied = match backup {
                Some(backup) => self.apply_backup(&backup),
                None => Err(LivepaperError::Restore("no backup available".to_string())),
            };
            if applied.is_ok() {
                self.backup.lock().take();
                self.clear_artifacts();
            }
            applied
        });

        match result {
            Ok(()) => {
                warn!("[LIVEPAPER][RESTORE] Original wallpaper restored");
                Ok(true)
            }
            Err(e) => {
                crate::error!("[LIVEPAPER][RESTORE] {}; leaving the desktop as-is", e);
                Err(e)
            }
        }
    }

    fn apply_backup(&self, backup: &WallpaperBackup) -> Result<()> {
        let target = match backup.image_copy.as_deref().filter(|p| p.is_file()) {
            Some(copy) => {
                fs::create_dir_all(&self.dirs.restored)?;
                let name = copy
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "original.img".into());
                let target = self.dirs.restored.join(name);
                fs::copy(copy, &target)?;
                target
            }
            None => match backup.original_path.as_deref().filter(|p| p.is_file()) {
                Some(original) => original.to_path_buf(),
                None => {
                    return Err(LivepaperError::Restore(
                        "backup image missing; leaving desktop as-is".to_string(),
                    ))
                }
            },
        };

        self.shell.apply_style(backup.style())?;
        self.shell.set_wallpaper(&target)?;
        Ok(())
    }

    fn clear_artifacts(&self) {
        for dir in [&self.dirs.backup, &self.dirs.output] {
            if !dir.exists() {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(dir) {
                warn!("[LIVEPAPER][RESTORE] Failed to clear {}: {}", dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{headless::ShellCall, HeadlessShell};
    use std::{sync::mpsc, thread};
    use tempfile::TempDir;

    fn setup(with_wallpaper: bool) -> (TempDir, HeadlessShell, Arc<BackupRestoreManager>) {
        let tmp = TempDir::new().unwrap();
        let dirs = AddonDirs::under(&tmp.path().join("addon"));
        dirs.create_all().unwrap();

        let mut shell = HeadlessShell::new(Vec::new());
        if with_wallpaper {
            let original = tmp.path().join("beach.png");
            fs::write(&original, b"not-really-a-png").unwrap();
            shell = shell.with_wallpaper(&original, DisplayStyle { style_id: 6, tile: 0 });
        }

        let manager = Arc::new(BackupRestoreManager::new(Arc::new(shell.clone()), dirs));
        (tmp, shell, manager)
    }

    #[test]
    fn backup_copies_image_bytes() {
        let (_tmp, _shell, manager) = setup(true);
        let backup = manager.backup().unwrap();
        let copy = backup.image_copy.unwrap();
        assert_eq!(fs::read(copy).unwrap(), b"not-really-a-png");
        assert_eq!(backup.style_id, 6);
    }

    #[test]
    fn missing_wallpaper_degrades_to_no_copy() {
        let (tmp, _shell, _) = setup(false);
        let dirs = AddonDirs::under(&tmp.path().join("addon"));
        let shell = HeadlessShell::new(Vec::new())
            .with_wallpaper(&tmp.path().join("gone.jpg"), DisplayStyle::FILL);
        let manager = BackupRestoreManager::new(Arc::new(shell), dirs);
        let backup = manager.backup().unwrap();
        assert!(backup.image_copy.is_none());
        assert!(manager.source_image().is_none());
    }

    #[test]
    fn concurrent_restore_runs_once() {
        let (_tmp, shell, manager) = setup(true);
        manager.backup().unwrap();
        shell.apply_style(DisplayStyle::SPAN).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || manager.restore())
            })
            .collect();

        let performed = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .filter(|done| *done)
            .count();
        assert_eq!(performed, 1);

        let sets: Vec<_> = shell
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ShellCall::SetWallpaper(_)))
            .collect();
        assert_eq!(sets.len(), 1);

        let current = shell.current().unwrap();
        assert_eq!(current.style, DisplayStyle { style_id: 6, tile: 0 });
        let restored = current.path.unwrap();
        assert_eq!(fs::read(restored).unwrap(), b"not-really-a-png");
        assert!(manager.is_restored());
    }

    #[test]
    fn restore_without_backup_leaves_desktop_alone() {
        let (_tmp, shell, manager) = setup(false);
        assert!(manager.restore().is_err());
        assert!(shell.calls().is_empty());
        assert_eq!(manager.restore().unwrap(), false);
    }

    #[test]
    fn restore_locked_waits_then_proceeds() {
        let (_tmp, _shell, manager) = setup(true);
        manager.backup().unwrap();
        let render = Mutex::new(());
        let _held = render.lock();
        let done = manager
            .restore_locked(&render, Duration::from_millis(20))
            .unwrap();
        assert!(done);
    }

    #[test]
    fn recovers_previous_backup_after_crash() {
        let (tmp, _shell, manager) = setup(true);
        let first = manager.backup().unwrap();

        let dirs = AddonDirs::under(&tmp.path().join("addon"));
        let stale_frame = dirs.output.join("livepaper.bmp");
        fs::write(&stale_frame, b"frame").unwrap();
        let crashed_shell =
            HeadlessShell::new(Vec::new()).with_wallpaper(&stale_frame, DisplayStyle::SPAN);
        let second = BackupRestoreManager::new(Arc::new(crashed_shell), dirs);
        let recovered = second.backup().unwrap();
        assert_eq!(recovered, first);
    }

    #[test]
    fn failed_restore_keeps_backup_and_frame() {
        let (tmp, shell, manager) = setup(true);
        manager.backup().unwrap();
        let dirs = AddonDirs::under(&tmp.path().join("addon"));
        let frame = dirs.output.join("livepaper.bmp");
        fs::write(&frame, b"frame").unwrap();
        shell.set_wallpaper(&frame).unwrap();

        shell.fail_next_sets(1);
        assert!(matches!(manager.restore(), Err(LivepaperError::Shell(_))));

        assert_eq!(shell.current().unwrap().path.as_deref(), Some(frame.as_path()));
        assert!(frame.is_file());
        assert!(dirs.backup.join(BACKUP_META).is_file());
        assert!(manager.current().is_some());
        assert_eq!(manager.restore().unwrap(), false);

        // Next start finds our frame on screen and recovers the original.
        let next = BackupRestoreManager::new(Arc::new(shell.clone()), dirs);
        let recovered = next.backup().unwrap();
        assert_eq!(recovered.style_id, 6);
        assert!(recovered.original_path.unwrap().ends_with("beach.png"));
    }

    #[test]
    fn restore_waits_for_a_frame_being_shown_and_blocks_later_ones() {
        let (_tmp, shell, manager) = setup(true);
        manager.backup().unwrap();
        let frame = PathBuf::from("frame.bmp");

        let (entered_tx, entered_rx) = mpsc::channel();
        let showing = {
            let manager = Arc::clone(&manager);
            let shell = shell.clone();
            let frame = frame.clone();
            thread::spawn(move || {
                manager.gate().show(|| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    shell.set_wallpaper(&frame)
                })
            })
        };

        entered_rx.recv().unwrap();
        assert!(manager.restore().unwrap());
        assert!(showing.join().unwrap().unwrap());

        let mut late = false;
        assert!(!manager.gate().show(|| {
            late = true;
            Ok(())
        })
        .unwrap());
        assert!(!late);

        let last = shell
            .calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                ShellCall::SetWallpaper(p) => Some(p),
                _ => None,
            })
            .unwrap();
        assert_ne!(last, frame);
        assert_eq!(fs::read(last).unwrap(), b"not-really-a-png");
    }
}
