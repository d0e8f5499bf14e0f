//! Monitor and virtual-screen geometry.
//!
//! Monitors are enumerated fresh on every query and never persisted. OS
//! enumeration order is not stable, so lookups go through the backend id when
//! one is known and fall back to the enumeration index.

use crate::platform::DesktopShell;

/// Axis-aligned pixel rectangle. The origin may be negative (monitors left of
/// or above the primary one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[cfg(test)]
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(left, top, (right - left) as u32, (bottom - top) as u32)
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Rect::new(left, top, (right - left) as u32, (bottom - top) as u32))
    }

    /// Same rectangle expressed relative to `origin`.
    pub fn relative_to(&self, origin: &Rect) -> Rect {
        Rect::new(self.x - origin.x, self.y - origin.y, self.width, self.height)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorDescriptor {
    pub index: usize,
    pub bounds: Rect,
    pub is_primary: bool,
    /// Identifier understood by the per-monitor wallpaper API, if active.
    pub backend_id: Option<String>,
}

/// Bounding rectangle of every monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualScreen {
    pub bounds: Rect,
}

impl VirtualScreen {
    pub fn from_monitors(monitors: &[MonitorDescriptor]) -> Self {
        let bounds = monitors
            .iter()
            .fold(Rect::default(), |acc, m| acc.union(&m.bounds));
        Self { bounds }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

/// Monitors plus their bounding virtual screen, captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Layout {
    pub monitors: Vec<MonitorDescriptor>,
    pub virtual_screen: VirtualScreen,
}

impl Layout {
    pub fn from_monitors(mut monitors: Vec<MonitorDescriptor>) -> Self {
        monitors.retain(|m| !m.bounds.is_empty());
        for (index, monitor) in monitors.iter_mut().enumerate() {
            monitor.index = index;
        }
        let virtual_screen = VirtualScreen::from_monitors(&monitors);
        Self {
            monitors,
            virtual_screen,
        }
    }

    /// Resolve a monitor by backend id when given, otherwise by index.
    pub fn find(&self, backend_id: Option<&str>, index: usize) -> Option<&MonitorDescriptor> {
        if let Some(id) = backend_id {
            if let Some(found) = self
                .monitors
                .iter()
                .find(|m| m.backend_id.as_deref() == Some(id))
            {
                return Some(found);
            }
        }
        self.monitors.iter().find(|m| m.index == index)
    }

    pub fn primary(&self) -> Option<&MonitorDescriptor> {
        self.monitors
            .iter()
            .find(|m| m.is_primary)
            .or_else(|| self.monitors.first())
    }

    /// Attach per-monitor API ids by matching rectangles.
    pub fn attach_backend_ids(&mut self, ids: &[(String, Rect)]) {
        for monitor in &mut self.monitors {
            monitor.backend_id = ids
                .iter()
                .find(|(_, rect)| *rect == monitor.bounds)
                .map(|(id, _)| id.clone());
        }
    }
}

/// Pure query over the shell: no state is kept between calls.
pub struct GeometryProvider;

impl GeometryProvider {
    pub fn query(shell: &dyn DesktopShell) -> Layout {
        Layout::from_monitors(shell.enumerate_monitors())
    }
}
