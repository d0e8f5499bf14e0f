//! Widget-free background covering the virtual screen.
//!
//! Decoding and resizing the original wallpaper is the expensive step, so the
//! result is kept until the virtual screen changes.

use std::path::{Path, PathBuf};

use image::{imageops, DynamicImage, GenericImageView, ImageReader, Rgba, RgbaImage};

use crate::{
    geometry::{Layout, Rect},
    info, warn,
};

pub const NEUTRAL_FILL: Rgba<u8> = Rgba([32, 36, 40, 255]);

#[derive(Debug, Clone)]
pub struct BaseComposite {
    pub image: RgbaImage,
    pub source_virtual_screen: Rect,
}

impl BaseComposite {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Slice of the composite under one monitor.
    pub fn crop_monitor(&self, monitor: &Rect) -> RgbaImage {
        let local = monitor.relative_to(&self.source_virtual_screen);
        imageops::crop_imm(
            &self.image,
            local.x.max(0) as u32,
            local.y.max(0) as u32,
            monitor.width,
            monitor.height,
        )
        .to_image()
    }
}

pub struct BaseImageCache {
    source: Option<PathBuf>,
    fill: Rgba<u8>,
    cached: Option<BaseComposite>,
    builds: u64,
}

impl BaseImageCache {
    pub fn new(source: Option<PathBuf>, fill: Rgba<u8>) -> Self {
        Self {
            source,
            fill,
            cached: None,
            builds: 0,
        }
    }

    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn is_valid_for(&self, layout: &Layout) -> bool {
        self.cached
            .as_ref()
            .map(|c| c.source_virtual_screen == layout.virtual_screen.bounds)
            .unwrap_or(false)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn set_fill(&mut self, fill: Rgba<u8>) {
        if self.fill != fill {
            self.fill = fill;
            self.invalidate();
        }
    }

    pub fn cached(&self) -> Option<&BaseComposite> {
        self.cached.as_ref()
    }

    /// Return the composite for `layout`, rebuilding only when the virtual
    /// screen differs from the one the cache was built for.
    pub fn ensure_built(&mut self, layout: &Layout) -> &BaseComposite {
        if !self.is_valid_for(layout) {
            self.cached = None;
        }

        let source = self.source.as_deref();
        let fill = self.fill;
        let builds = &mut self.builds;
        self.cached.get_or_insert_with(|| {
            let composite = build_composite(source, fill, layout);
            *builds += 1;
            info!(
                "[LIVEPAPER][BASE] Built base composite #{} for {}x{} at ({}, {})",
                builds,
                composite.width(),
                composite.height(),
                composite.source_virtual_screen.x,
                composite.source_virtual_screen.y
            );
            composite
        })
    }
}

fn build_composite(source: Option<&Path>, fill: Rgba<u8>, layout: &Layout) -> BaseComposite {
    let vs = layout.virtual_screen.bounds;
    let mut canvas = RgbaImage::from_pixel(vs.width.max(1), vs.height.max(1), fill);

    if let Some(original) = source.and_then(decode_source) {
        for monitor in &layout.monitors {
            let filled = resize_to_fill(&original, monitor.bounds.width, monitor.bounds.height);
            let local = monitor.bounds.relative_to(&vs);
            imageops::replace(&mut canvas, &filled, i64::from(local.x), i64::from(local.y));
        }
    }

    BaseComposite {
        image: canvas,
        source_virtual_screen: vs,
    }
}

fn decode_source(path: &Path) -> Option<DynamicImage> {
    let decoded = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(image::ImageError::IoError)
        .and_then(|r| r.decode());

    match decoded {
        Ok(img) => Some(img),
        Err(e) => {
            warn!(
                "[LIVEPAPER][BASE] Cannot decode original wallpaper {}: {}; using neutral fill",
                path.display(),
                e
            );
            None
        }
    }
}

/// Aspect-preserving scale that covers the target, then a centered crop.
pub fn resize_to_fill(img: &DynamicImage, target_width: u32, target_height: u32) -> RgbaImage {
    let (img_width, img_height) = img.dimensions();
    if img_width == 0 || img_height == 0 || target_width == 0 || target_height == 0 {
        return RgbaImage::new(target_width, target_height);
    }

    let scale_x = f64::from(target_width) / f64::from(img_width);
    let scale_y = f64::from(target_height) / f64::from(img_height);
    let scale = scale_x.max(scale_y);

    let scaled_width = ((f64::from(img_width) * scale).ceil() as u32).max(target_width);
    let scaled_height = ((f64::from(img_height) * scale).ceil() as u32).max(target_height);

    let resized = img.resize_exact(scaled_width, scaled_height, imageops::FilterType::CatmullRom);

    let crop_x = (scaled_width - target_width) / 2;
    let crop_y = (scaled_height - target_height) / 2;

    resized
        .crop_imm(crop_x, crop_y, target_width, target_height)
        .to_rgba8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MonitorDescriptor;
    use tempfile::TempDir;

    fn layout(rects: &[Rect]) -> Layout {
        Layout::from_monitors(
            rects
                .iter()
                .enumerate()
                .map(|(index, bounds)| MonitorDescriptor {
                    index,
                    bounds: *bounds,
                    is_primary: index == 0,
                    backend_id: None,
                })
                .collect(),
        )
    }

    #[test]
    fn rebuilds_only_when_layout_changes() {
        let mut cache = BaseImageCache::new(None, NEUTRAL_FILL);
        let single = layout(&[Rect::new(0, 0, 64, 32)]);
        let dual = layout(&[Rect::new(0, 0, 64, 32), Rect::new(64, 0, 32, 32)]);

        for _ in 0..5 {
            cache.ensure_built(&single);
        }
        assert_eq!(cache.builds(), 1);

        for _ in 0..3 {
            cache.ensure_built(&dual);
        }
        assert_eq!(cache.builds(), 2);
        assert_eq!(cache.cached().unwrap().width(), 96);

        cache.ensure_built(&single);
        assert_eq!(cache.builds(), 3);
    }

    #[test]
    fn no_original_fills_with_neutral_color() {
        let mut cache = BaseImageCache::new(None, NEUTRAL_FILL);
        let base = cache.ensure_built(&layout(&[Rect::new(-10, -10, 20, 10)]));
        assert_eq!(base.image.get_pixel(0, 0), &NEUTRAL_FILL);
        assert_eq!(base.source_virtual_screen, Rect::new(-10, -10, 20, 10));
    }

    #[test]
    fn original_is_filled_per_monitor_at_offsets() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("red.png");
        RgbaImage::from_pixel(40, 10, Rgba([200, 0, 0, 255]))
            .save(&source)
            .unwrap();

        let mut cache = BaseImageCache::new(Some(source), NEUTRAL_FILL);
        // Two monitors with a gap between them: the gap keeps the fill.
        let base = cache.ensure_built(&layout(&[Rect::new(0, 0, 20, 20), Rect::new(30, 0, 10, 10)]));

        assert_eq!(base.width(), 40);
        assert_eq!(base.image.get_pixel(5, 5), &Rgba([200, 0, 0, 255]));
        assert_eq!(base.image.get_pixel(35, 5), &Rgba([200, 0, 0, 255]));
        assert_eq!(base.image.get_pixel(25, 5), &NEUTRAL_FILL);
        assert_eq!(base.image.get_pixel(35, 15), &NEUTRAL_FILL);
    }

    #[test]
    fn undecodable_original_falls_back_to_fill() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("broken.png");
        std::fs::write(&source, b"garbage").unwrap();

        let mut cache = BaseImageCache::new(Some(source), NEUTRAL_FILL);
        let base = cache.ensure_built(&layout(&[Rect::new(0, 0, 8, 8)]));
        assert_eq!(base.image.get_pixel(4, 4), &NEUTRAL_FILL);
    }

    #[test]
    fn resize_to_fill_matches_target_exactly() {
        let wide = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([1, 2, 3, 255])));
        assert_eq!(resize_to_fill(&wide, 100, 100).dimensions(), (100, 100));
        let tall = DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 90, Rgba([1, 2, 3, 255])));
        assert_eq!(resize_to_fill(&tall, 160, 90).dimensions(), (160, 90));
    }

    #[test]
    fn crop_monitor_uses_virtual_origin() {
        let mut cache = BaseImageCache::new(None, NEUTRAL_FILL);
        let l = layout(&[Rect::new(-20, 0, 20, 10), Rect::new(0, 0, 10, 10)]);
        let base = cache.ensure_built(&l);
        let crop = base.crop_monitor(&Rect::new(0, 0, 10, 10));
        assert_eq!(crop.dimensions(), (10, 10));
    }
}
