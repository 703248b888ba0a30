pub mod model;
pub mod raster;
pub mod surface;

pub use model::{AnnotationObject, Color, ObjectPatch, SessionState, Tool};
pub use raster::{bundled_font, decode_image, export_png, load_font, render, EXPORT_MULTIPLIER};
pub use surface::{fit_scale, BackgroundLayer, Surface, SurfaceConfig, SurfaceStats};
