//! Live widget placement shared between the layout editor and the renderer.
//!
//! Keys are `(monitor index | *, widget name)`. A monitor-scoped entry wins
//! over the wildcard one. Writes are last-write-wins with no versioning.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Normalized rectangle, fractions of a monitor's width and height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

pub const MIN_NORM_SIZE: f64 = 0.01;

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

impl NormRect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Clamp into `[0,1]`, enforce the minimum size, then pull the origin
    /// back so the rectangle ends inside the monitor.
    pub fn sanitized(self) -> Self {
        let w = clamp_unit(self.w).max(MIN_NORM_SIZE);
        let h = clamp_unit(self.h).max(MIN_NORM_SIZE);
        let x = clamp_unit(self.x).min(1.0 - w);
        let y = clamp_unit(self.y).min(1.0 - h);
        Self { x, y, w, h }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlacementKey {
    monitor: Option<usize>,
    name: String,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Handle passed to both the editor side and the widget host.
#[derive(Debug, Default)]
pub struct PlacementBus {
    entries: RwLock<HashMap<PlacementKey, NormRect>>,
}

impl PlacementBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a placement. `None` writes the `*` wildcard entry.
    pub fn set(&self, monitor: Option<usize>, widget: &str, rect: NormRect) -> NormRect {
        let stored = rect.sanitized();
        self.entries.write().insert(
            PlacementKey {
                monitor,
                name: normalize_name(widget),
            },
            stored,
        );
        stored
    }

    pub fn get(&self, monitor: Option<usize>, widget: &str) -> Option<NormRect> {
        let name = normalize_name(widget);
        let entries = self.entries.read();

        if let Some(index) = monitor {
            let scoped = PlacementKey {
                monitor: Some(index),
                name: name.clone(),
            };
            if let Some(rect) = entries.get(&scoped) {
                return Some(*rect);
            }
        }

        entries
            .get(&PlacementKey {
                monitor: None,
                name,
            })
            .copied()
    }

    pub fn remove(&self, monitor: Option<usize>, widget: &str) -> Option<NormRect> {
        self.entries.write().remove(&PlacementKey {
            monitor,
            name: normalize_name(widget),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_scoped_entry_beats_wildcard() {
        let bus = PlacementBus::new();
        bus.set(None, "Clock", NormRect::new(0.1, 0.1, 0.2, 0.2));
        bus.set(Some(1), "clock", NormRect::new(0.5, 0.5, 0.2, 0.2));

        assert_eq!(bus.get(Some(1), "clock").unwrap().x, 0.5);
        assert_eq!(bus.get(Some(0), "clock").unwrap().x, 0.1);
        assert_eq!(bus.get(None, " CLOCK ").unwrap().x, 0.1);
    }

    #[test]
    fn missing_entries_return_none() {
        let bus = PlacementBus::new();
        bus.set(Some(2), "clock", NormRect::new(0.0, 0.0, 0.5, 0.5));
        assert!(bus.get(Some(0), "clock").is_none());
        assert!(bus.get(None, "date").is_none());
    }

    #[test]
    fn out_of_range_values_are_sanitized_on_write() {
        let bus = PlacementBus::new();
        let stored = bus.set(None, "clock", NormRect::new(1.5, 0.2, -1.0, 0.3));

        assert!(stored.w >= MIN_NORM_SIZE);
        assert!(stored.x <= 1.0);
        assert!(stored.x + stored.w <= 1.0 + f64::EPSILON);
        assert!((stored.x - 0.99).abs() < 1e-9);
        assert_eq!(bus.get(None, "clock"), Some(stored));
    }

    #[test]
    fn sanitize_keeps_valid_rects() {
        let rect = NormRect::new(0.25, 0.5, 0.5, 0.25).sanitized();
        assert_eq!(rect, NormRect::new(0.25, 0.5, 0.5, 0.25));

        let nan = NormRect::new(f64::NAN, 0.0, f64::NAN, 2.0).sanitized();
        assert_eq!(nan.x, 0.0);
        assert_eq!(nan.w, MIN_NORM_SIZE);
        assert_eq!(nan.h, 1.0);
        assert_eq!(nan.y, 0.0);
    }

    #[test]
    fn last_write_wins() {
        let bus = PlacementBus::new();
        bus.set(Some(0), "clock", NormRect::new(0.1, 0.1, 0.1, 0.1));
        bus.set(Some(0), "clock", NormRect::new(0.3, 0.1, 0.1, 0.1));
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.get(Some(0), "clock").unwrap().x, 0.3);
        assert!(bus.remove(Some(0), "clock").is_some());
        assert_eq!(bus.len(), 0);
    }
}
