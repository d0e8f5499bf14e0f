use std::{ffi::c_void, mem, path::Path, path::PathBuf};

use windows::{
    core::{w, BOOL, PCWSTR, PWSTR},
    Win32::{
        Foundation::{LPARAM, MAX_PATH, RECT},
        Graphics::Gdi::{EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFOEXW},
        System::{
            Com::{
                CoCreateInstance, CoInitializeEx, CoTaskMemFree, CLSCTX_ALL,
                COINIT_APARTMENTTHREADED,
            },
            Registry::{
                RegGetValueW, RegSetKeyValueW, HKEY_CURRENT_USER, REG_SZ, RRF_RT_REG_SZ,
            },
        },
        UI::{
            Shell::{DesktopWallpaper, IDesktopWallpaper},
            WindowsAndMessaging::{
                SystemParametersInfoW, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_GETDESKWALLPAPER,
                SPI_SETDESKWALLPAPER,
            },
        },
    },
};

use super::{DesktopShell, DisplayStyle, PerMonitorApi, WallpaperSettings};
use crate::{
    error::{LivepaperError, Result},
    geometry::{MonitorDescriptor, Rect},
    utility::{path_to_wstring, to_wstring},
    warn,
};

const DESKTOP_KEY: PCWSTR = w!("Control Panel\\Desktop");

pub struct WindowsShell;

impl WindowsShell {
    pub fn new() -> Self {
        ensure_com();
        Self
    }
}

fn ensure_com() {
    unsafe {
        let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
    }
}

fn rect_from(r: RECT) -> Rect {
    Rect::new(
        r.left,
        r.top,
        (r.right - r.left).max(0) as u32,
        (r.bottom - r.top).max(0) as u32,
    )
}

fn create_desktop_wallpaper() -> Result<IDesktopWallpaper> {
    ensure_com();
    unsafe {
        CoCreateInstance::<_, IDesktopWallpaper>(&DesktopWallpaper, None, CLSCTX_ALL).map_err(|e| {
            LivepaperError::PlatformUnavailable(format!("CoCreateInstance(DesktopWallpaper) failed: {e:?}"))
        })
    }
}

fn take_pwstr(value: PWSTR) -> Option<String> {
    if value.is_null() {
        return None;
    }
    unsafe {
        let text = value.to_string().ok();
        CoTaskMemFree(Some(value.0 as *const c_void));
        text
    }
}

fn read_desktop_value(name: &str) -> Option<String> {
    let name_wide = to_wstring(name);
    let mut buffer = [0u16; 64];
    let mut size = (buffer.len() * mem::size_of::<u16>()) as u32;

    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            DESKTOP_KEY,
            PCWSTR(name_wide.as_ptr()),
            RRF_RT_REG_SZ,
            None,
            Some(buffer.as_mut_ptr() as *mut c_void),
            Some(&mut size),
        )
    };
    if status.is_err() {
        return None;
    }

    let len = buffer.iter().position(|c| *c == 0).unwrap_or(buffer.len());
    Some(String::from_utf16_lossy(&buffer[..len]))
}

fn write_desktop_value(name: &str, value: &str) -> Result<()> {
    let name_wide = to_wstring(name);
    let value_wide = to_wstring(value);
    let status = unsafe {
        RegSetKeyValueW(
            HKEY_CURRENT_USER,
            DESKTOP_KEY,
            PCWSTR(name_wide.as_ptr()),
            REG_SZ.0,
            Some(value_wide.as_ptr() as *const c_void),
            (value_wide.len() * mem::size_of::<u16>()) as u32,
        )
    };
    status
        .ok()
        .map_err(|e| LivepaperError::Shell(format!("RegSetKeyValueW({name}) failed: {e:?}")))
}

impl DesktopShell for WindowsShell {
    fn enumerate_monitors(&self) -> Vec<MonitorDescriptor> {
        unsafe extern "system" fn enum_monitor_proc(
            monitor: HMONITOR,
            _hdc: HDC,
            _rect: *mut RECT,
            lparam: LPARAM,
        ) -> BOOL {
            let vec = &mut *(lparam.0 as *mut Vec<MonitorDescriptor>);

            let mut info: MONITORINFOEXW = mem::zeroed();
            info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;

            if GetMonitorInfoW(monitor, &mut info as *mut MONITORINFOEXW as *mut _).as_bool() {
                vec.push(MonitorDescriptor {
                    index: vec.len(),
                    bounds: rect_from(info.monitorInfo.rcMonitor),
                    is_primary: info.monitorInfo.dwFlags & 1 != 0,
                    backend_id: None,
                });
            }

            BOOL(1)
        }

        let mut monitors = Vec::<MonitorDescriptor>::new();
        unsafe {
            let _ = EnumDisplayMonitors(
                None,
                None,
                Some(enum_monitor_proc),
                LPARAM((&mut monitors as *mut Vec<MonitorDescriptor>) as isize),
            );
        }

        monitors
    }

    fn open_per_monitor(&self) -> Result<Box<dyn PerMonitorApi>> {
        let api = create_desktop_wallpaper()?;
        let count = unsafe { api.GetMonitorDevicePathCount() }.map_err(|e| {
            LivepaperError::PlatformUnavailable(format!("GetMonitorDevicePathCount failed: {e:?}"))
        })?;
        if count == 0 {
            return Err(LivepaperError::PlatformUnavailable(
                "IDesktopWallpaper reports no monitors".to_string(),
            ));
        }
        Ok(Box::new(WindowsPerMonitor))
    }

    fn current_wallpaper(&self) -> Option<WallpaperSettings> {
        let mut buffer = [0u16; MAX_PATH as usize];
        let path = unsafe {
            SystemParametersInfoW(
                SPI_GETDESKWALLPAPER,
                buffer.len() as u32,
                Some(buffer.as_mut_ptr() as *mut c_void),
                Default::default(),
            )
        }
        .ok()
        .map(|_| {
            let len = buffer.iter().position(|c| *c == 0).unwrap_or(buffer.len());
            String::from_utf16_lossy(&buffer[..len])
        })
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

        let style_id = read_desktop_value("WallpaperStyle")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DisplayStyle::FILL.style_id);
        let tile = read_desktop_value("TileWallpaper")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);

        Some(WallpaperSettings {
            path,
            style: DisplayStyle { style_id, tile },
        })
    }

    fn apply_style(&self, style: DisplayStyle) -> Result<()> {
        write_desktop_value("WallpaperStyle", &style.style_id.to_string())?;
        write_desktop_value("TileWallpaper", &style.tile.to_string())
    }

    fn set_wallpaper(&self, image: &Path) -> Result<()> {
        let mut path_wide = path_to_wstring(image);
        unsafe {
            SystemParametersInfoW(
                SPI_SETDESKWALLPAPER,
                0,
                Some(path_wide.as_mut_ptr() as *mut c_void),
                SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
            )
        }
        .map_err(|e| {
            warn!("[LIVEPAPER][SHELL] SystemParametersInfoW failed: {:?}", e);
            LivepaperError::Shell(format!("SPI_SETDESKWALLPAPER failed: {e:?}"))
        })
    }
}

/// Holds no COM pointer so it can cross threads; the COM object is created
/// on the calling thread for every operation.
struct WindowsPerMonitor;

impl PerMonitorApi for WindowsPerMonitor {
    fn monitors(&self) -> Result<Vec<(String, Rect)>> {
        let api = create_desktop_wallpaper()?;
        let mut out = Vec::new();
        unsafe {
            let count = api
                .GetMonitorDevicePathCount()
                .map_err(|e| LivepaperError::Shell(format!("GetMonitorDevicePathCount failed: {e:?}")))?;

            for i in 0..count {
                let Ok(raw) = api.GetMonitorDevicePathAt(i) else {
                    continue;
                };
                let Some(id) = take_pwstr(raw) else {
                    continue;
                };
                let id_wide = to_wstring(&id);
                let Ok(rect) = api.GetMonitorRECT(PCWSTR(id_wide.as_ptr())) else {
                    // Detached monitors still report a device path.
                    continue;
                };
                out.push((id, rect_from(rect)));
            }
        }
        Ok(out)
    }

    fn set_wallpaper(&self, monitor_id: &str, image: &Path) -> Result<()> {
        let api = create_desktop_wallpaper()?;
        let id_wide = to_wstring(monitor_id);
        let path_wide = path_to_wstring(image);
        unsafe {
            api.SetWallpaper(PCWSTR(id_wide.as_ptr()), PCWSTR(path_wide.as_ptr()))
                .map_err(|e| LivepaperError::Shell(format!("IDesktopWallpaper::SetWallpaper failed: {e:?}")))
        }
    }
}
