use image::RgbaImage;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::model::{AnnotationObject, Color};

/// How big a surface is allowed to be.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceConfig {
    pub max_width: u32,
    pub height: u32,
    pub background_color: Color,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            height: 600,
            background_color: Color::WHITE,
        }
    }
}

/// Horizontal padding the editor reserves around the canvas.
pub const CONTAINER_PADDING: u32 = 32;

impl SurfaceConfig {
    /// Surface width for a container: `min(max_width, container - padding)`, never zero.
    pub fn width_for_container(&self, container_width: u32) -> u32 {
        container_width
            .saturating_sub(CONTAINER_PADDING)
            .min(self.max_width)
            .max(1)
    }

    /// Container width that yields a full-size surface.
    pub fn default_container_width(&self) -> u32 {
        self.max_width + CONTAINER_PADDING
    }
}

/// Counts surfaces as they are built and torn down.
#[derive(Debug, Default)]
pub struct SurfaceStats {
    created: AtomicUsize,
    disposed: AtomicUsize,
}

impl SurfaceStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// The fixed, non-interactive image behind every annotation.
#[derive(Debug, Clone)]
pub struct BackgroundLayer {
    pub image: RgbaImage,
    pub scale: f64,
}

impl BackgroundLayer {
    /// Scale `image` uniformly so it fits inside `width` x `height`.
    pub fn fit(image: RgbaImage, width: u32, height: u32) -> Self {
        let scale = fit_scale(width, height, image.width(), image.height());
        Self { image, scale }
    }

    pub fn scaled_size(&self) -> (f64, f64) {
        (
            f64::from(self.image.width()) * self.scale,
            f64::from(self.image.height()) * self.scale,
        )
    }
}

/// `min(surface_w / image_w, surface_h / image_h)`, treating a zero image side as 1.
pub fn fit_scale(surface_width: u32, surface_height: u32, image_width: u32, image_height: u32) -> f64 {
    let image_width = f64::from(image_width.max(1));
    let image_height = f64::from(image_height.max(1));
    (f64::from(surface_width) / image_width).min(f64::from(surface_height) / image_height)
}

/// One scene: a background layer plus annotation objects in z-order.
///
/// The background is held apart from `objects`, so removing objects can
/// never remove it. Dropping the surface disposes it.
#[derive(Debug)]
pub struct Surface {
    id: u64,
    width: u32,
    height: u32,
    background_color: Color,
    background: Option<BackgroundLayer>,
    objects: Vec<AnnotationObject>,
    active: Option<usize>,
    stats: Arc<SurfaceStats>,
}

impl Surface {
    pub fn new(width: u32, height: u32, background_color: Color, stats: Arc<SurfaceStats>) -> Self {
        stats.created.fetch_add(1, Ordering::SeqCst);
        let id = NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Surface {} created ({}x{})", id, width, height);
        Self {
            id,
            width,
            height,
            background_color,
            background: None,
            objects: Vec::new(),
            active: None,
            stats,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn background_color(&self) -> Color {
        self.background_color
    }

    pub fn background(&self) -> Option<&BackgroundLayer> {
        self.background.as_ref()
    }

    pub fn set_background(&mut self, layer: BackgroundLayer) {
        self.background = Some(layer);
    }

    pub fn objects(&self) -> &[AnnotationObject] {
        &self.objects
    }

    pub fn object_mut(&mut self, index: usize) -> Option<&mut AnnotationObject> {
        self.objects.get_mut(index)
    }

    /// Append an object on top of the scene and return its index.
    pub fn add(&mut self, object: AnnotationObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<AnnotationObject> {
        if index >= self.objects.len() {
            return None;
        }
        self.active = match self.active {
            Some(a) if a == index => None,
            Some(a) if a > index => Some(a - 1),
            other => other,
        };
        Some(self.objects.remove(index))
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        if index < self.objects.len() {
            self.active = Some(index);
            true
        } else {
            false
        }
    }

    pub fn discard_active(&mut self) {
        self.active = None;
    }

    /// Remove every annotation object; the background stays. Returns how many went.
    pub fn clear_objects(&mut self) -> usize {
        self.active = None;
        let removed = self.objects.len();
        self.objects.clear();
        removed
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.stats.disposed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Surface {} disposed", self.id);
    }
}
