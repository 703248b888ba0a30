use ab_glyph::{FontArc, PxScale};
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, Blend};
use imageproc::rect::Rect;
use std::io::Cursor;
use std::path::Path;

use super::model::{AnnotationObject, Color, MAX_FONT_SIZE};
use super::surface::Surface;
use crate::AppError;

/// Pixel multiplier used for both download and save.
pub const EXPORT_MULTIPLIER: u32 = 2;

/// Line spacing of multi-line text, relative to the font size.
const LINE_HEIGHT: f64 = 1.16;

/// How far left of the canvas a line may start and still be drawn.
const MAX_TEXT_OVERHANG: f64 = 100_000.0;

/// DejaVu Sans, used when no font file is configured.
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// Decode fetched bytes into the background bitmap.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, AppError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| AppError::ResourceLoad(format!("Failed to load image: {}", e)))
}

pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, AppError> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| AppError::ResourceLoad(format!("Failed to read font {}: {}", path.display(), e)))?;
    FontArc::try_from_vec(data)
        .map_err(|e| AppError::ResourceLoad(format!("Invalid font {}: {}", path.display(), e)))
}

pub fn bundled_font() -> Result<FontArc, AppError> {
    FontArc::try_from_slice(BUNDLED_FONT)
        .map_err(|e| AppError::ResourceLoad(format!("Invalid bundled font: {}", e)))
}

/// Flatten background colour, background image and objects (in z-order)
/// into one bitmap `multiplier` times the surface size.
pub fn render(surface: &Surface, multiplier: u32, font: Option<&FontArc>) -> RgbaImage {
    let m = multiplier.max(1);
    let mut out = RgbaImage::from_pixel(
        surface.width() * m,
        surface.height() * m,
        surface.background_color().to_rgba(),
    );

    if let Some(layer) = surface.background() {
        let (w, h) = layer.scaled_size();
        let w = (w * f64::from(m)).round().max(1.0) as u32;
        let h = (h * f64::from(m)).round().max(1.0) as u32;
        let scaled = imageops::resize(&layer.image, w, h, imageops::FilterType::Triangle);
        imageops::overlay(&mut out, &scaled, 0, 0);
    }

    let m = f64::from(m);
    let mut canvas = Blend(out);
    for object in surface.objects() {
        match object {
            AnnotationObject::Rectangle { left, top, width, height, fill, stroke, stroke_width } => {
                // The stroke is centred on the outline, so the outer box is
                // width + stroke_width wide, anchored at (left, top).
                let sw = stroke_width * m;
                let outer_x = left * m;
                let outer_y = top * m;
                let outer_w = width * m + sw;
                let outer_h = height * m + sw;

                fill_box(&mut canvas, outer_x + sw / 2.0, outer_y + sw / 2.0, width * m, height * m, *fill);
                if sw > 0.0 {
                    stroke_box(&mut canvas, outer_x, outer_y, outer_w, outer_h, sw, *stroke);
                }
            }
            AnnotationObject::Text { left, top, content, font_size, font_family, fill } => {
                let Some(font) = font else {
                    tracing::warn!("No font configured, skipping text object ({})", font_family);
                    continue;
                };
                let size = font_size * m;
                if !(size > 0.0 && size <= MAX_FONT_SIZE * m) {
                    continue;
                }
                let (cw, ch) = canvas.0.dimensions();
                for (line_no, line) in content.lines().enumerate() {
                    let x = (left * m).round();
                    let y = (top * m + line_no as f64 * size * LINE_HEIGHT).round();
                    let reach = (size * 2.0 * line.chars().count() as f64).min(MAX_TEXT_OVERHANG);
                    // Lines that cannot touch the canvas are skipped, which keeps
                    // the glyph offsets well inside i32.
                    if !(x < f64::from(cw) && y < f64::from(ch) && x + reach > 0.0 && y + size > 0.0) {
                        continue;
                    }
                    draw_text_mut(
                        &mut canvas.0,
                        fill.to_rgba(),
                        x as i32,
                        y as i32,
                        PxScale::from(size as f32),
                        font,
                        line,
                    );
                }
            }
        }
    }
    canvas.0
}

/// Fill the part of a box that lies on the canvas.
fn fill_box(canvas: &mut Blend<RgbaImage>, x: f64, y: f64, w: f64, h: f64, color: Color) {
    if color.a == 0 {
        return;
    }
    let (right, bottom) = (x + w, y + h);
    if [x, y, right, bottom].iter().any(|v| v.is_nan()) {
        return;
    }
    let (cw, ch) = canvas.0.dimensions();
    let x0 = x.round().max(0.0);
    let y0 = y.round().max(0.0);
    let x1 = right.round().min(f64::from(cw));
    let y1 = bottom.round().min(f64::from(ch));
    if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
        return;
    }
    let rect = Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32);
    draw_filled_rect_mut(canvas, rect, color.to_rgba());
}

/// Four non-overlapping bands, so translucent strokes are blended once per pixel.
fn stroke_box(canvas: &mut Blend<RgbaImage>, x: f64, y: f64, w: f64, h: f64, sw: f64, color: Color) {
    let sw = sw.min(w / 2.0).min(h / 2.0);
    fill_box(canvas, x, y, w, sw, color);
    fill_box(canvas, x, y + h - sw, w, sw, color);
    fill_box(canvas, x, y + sw, sw, h - 2.0 * sw, color);
    fill_box(canvas, x + w - sw, y + sw, sw, h - 2.0 * sw, color);
}

fn encode_png(image: RgbaImage) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| AppError::Export(format!("PNG encoding failed: {}", e)))?;
    Ok(bytes)
}

/// The surface as PNG bytes at `multiplier`x.
pub fn export_png(surface: &Surface, multiplier: u32, font: Option<&FontArc>) -> Result<Vec<u8>, AppError> {
    encode_png(render(surface, multiplier, font))
}
