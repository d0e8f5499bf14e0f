use std::{
    env,
    path::{Path, PathBuf},
};

use crate::ADDON_NAME;

#[cfg(windows)]
pub fn to_wstring(s: &str) -> Vec<u16> {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt};

    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

#[cfg(windows)]
pub fn path_to_wstring(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;

    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

pub fn user_home_dir() -> Option<PathBuf> {
    env::var("USERPROFILE")
        .or_else(|_| env::var("HOME"))
        .map(PathBuf::from)
        .ok()
}

/// Directory the addon binary was installed into, if it lives under `bin/`.
fn installed_root_dir() -> Option<PathBuf> {
    let exe_path = env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;

    if exe_dir.file_name().and_then(|n| n.to_str()) == Some("bin") {
        return exe_dir.parent().map(Path::to_path_buf);
    }

    None
}

pub fn sentinel_root_dir() -> Option<PathBuf> {
    user_home_dir().map(|p| p.join(".Sentinel"))
}

pub fn sentinel_addons_dir() -> Option<PathBuf> {
    sentinel_root_dir().map(|p| p.join("Addons"))
}

/// The addon's own root: `bin/..` when installed, `~/.Sentinel/Addons/livepaper`
/// otherwise, and the working directory as a last resort.
pub fn addon_root_dir() -> PathBuf {
    if let Some(root) = installed_root_dir() {
        return root;
    }

    if let Some(addons_dir) = sentinel_addons_dir() {
        return addons_dir.join(ADDON_NAME);
    }

    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Working directories used by the render path, all below one root.
#[derive(Debug, Clone)]
pub struct AddonDirs {
    pub root: PathBuf,
    pub output: PathBuf,
    pub backup: PathBuf,
    pub restored: PathBuf,
}

impl AddonDirs {
    pub fn under(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            output: root.join("output"),
            backup: root.join("backup"),
            restored: root.join("restored"),
        }
    }

    pub fn create_all(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output)?;
        std::fs::create_dir_all(&self.backup)?;
        std::fs::create_dir_all(&self.restored)?;
        Ok(())
    }
}
