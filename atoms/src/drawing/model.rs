use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::AppError;

/// RGBA colour, written the way the canvas client writes it:
/// `#RRGGBB`, `#RGB`, `rgb(r, g, b)` or `rgba(r, g, b, a)` with `a` in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, self.a])
    }
}

fn parse_channel(raw: &str) -> Result<u8, AppError> {
    raw.trim()
        .parse::<u8>()
        .map_err(|_| AppError::validation(format!("Invalid colour channel: {}", raw.trim())))
}

impl FromStr for Color {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            let expanded: String = match hex.len() {
                3 => hex.chars().flat_map(|c| [c, c]).collect(),
                6 => hex.to_string(),
                _ => return Err(AppError::validation(format!("Invalid colour: {}", s))),
            };
            let value = u32::from_str_radix(&expanded, 16)
                .map_err(|_| AppError::validation(format!("Invalid colour: {}", s)))?;
            return Ok(Color::rgb((value >> 16) as u8, (value >> 8) as u8, value as u8));
        }

        let (body, has_alpha) = if let Some(rest) = s.strip_prefix("rgba(") {
            (rest, true)
        } else if let Some(rest) = s.strip_prefix("rgb(") {
            (rest, false)
        } else {
            return Err(AppError::validation(format!("Invalid colour: {}", s)));
        };
        let body = body
            .strip_suffix(')')
            .ok_or_else(|| AppError::validation(format!("Invalid colour: {}", s)))?;
        let parts: Vec<&str> = body.split(',').collect();

        match (parts.as_slice(), has_alpha) {
            ([r, g, b], false) => Ok(Color::rgb(parse_channel(r)?, parse_channel(g)?, parse_channel(b)?)),
            ([r, g, b, a], true) => {
                let alpha: f64 = a
                    .trim()
                    .parse()
                    .map_err(|_| AppError::validation(format!("Invalid alpha: {}", a.trim())))?;
                if !(0.0..=1.0).contains(&alpha) {
                    return Err(AppError::validation(format!("Invalid alpha: {}", a.trim())));
                }
                Ok(Color::rgba(
                    parse_channel(r)?,
                    parse_channel(g)?,
                    parse_channel(b)?,
                    (alpha * 255.0).round() as u8,
                ))
            }
            _ => Err(AppError::validation(format!("Invalid colour: {}", s))),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            let alpha = (f64::from(self.a) / 255.0 * 1000.0).round() / 1000.0;
            write!(f, "rgba({}, {}, {}, {})", self.r, self.g, self.b, alpha)
        }
    }
}

/// Default styling for objects created by a tool click.
pub const DEFAULT_LEFT: f64 = 100.0;
pub const DEFAULT_TOP: f64 = 100.0;
pub const DEFAULT_RECT_WIDTH: f64 = 150.0;
pub const DEFAULT_RECT_HEIGHT: f64 = 100.0;
pub const DEFAULT_RECT_FILL: Color = Color::rgba(79, 70, 229, 77);
pub const DEFAULT_STROKE: Color = Color::rgb(0x4F, 0x46, 0xE5);
pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;
pub const DEFAULT_TEXT: &str = "Double-click to edit";
pub const DEFAULT_FONT_SIZE: f64 = 20.0;
pub const DEFAULT_FONT_FAMILY: &str = "Arial";
/// Largest font size a text object may carry.
pub const MAX_FONT_SIZE: f64 = 1000.0;

/// A shape or text element living in one surface's scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnnotationObject {
    #[serde(rename = "rectangle")]
    Rectangle {
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        fill: Color,
        stroke: Color,
        stroke_width: f64,
    },
    #[serde(rename = "text")]
    Text {
        left: f64,
        top: f64,
        content: String,
        font_size: f64,
        font_family: String,
        fill: Color,
    },
}

impl AnnotationObject {
    pub fn default_rectangle() -> Self {
        AnnotationObject::Rectangle {
            left: DEFAULT_LEFT,
            top: DEFAULT_TOP,
            width: DEFAULT_RECT_WIDTH,
            height: DEFAULT_RECT_HEIGHT,
            fill: DEFAULT_RECT_FILL,
            stroke: DEFAULT_STROKE,
            stroke_width: DEFAULT_STROKE_WIDTH,
        }
    }

    pub fn default_text() -> Self {
        AnnotationObject::Text {
            left: DEFAULT_LEFT,
            top: DEFAULT_TOP,
            content: DEFAULT_TEXT.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            fill: DEFAULT_STROKE,
        }
    }

    pub fn is_rectangle(&self) -> bool {
        matches!(self, AnnotationObject::Rectangle { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, AnnotationObject::Text { .. })
    }

    /// Apply a move/resize/edit gesture. Fields that make no sense for the
    /// variant are rejected rather than dropped, and an edit that would leave
    /// the object invalid changes nothing.
    pub fn apply(&mut self, patch: &ObjectPatch) -> Result<(), AppError> {
        let mut next = self.clone();
        match &mut next {
            AnnotationObject::Rectangle { left, top, width, height, fill, stroke, stroke_width } => {
                if patch.content.is_some() || patch.font_size.is_some() {
                    return Err(AppError::validation("Rectangles have no text"));
                }
                set(width, patch.width);
                set(height, patch.height);
                set(stroke_width, patch.stroke_width);
                set(stroke, patch.stroke);
                set(fill, patch.fill);
                set(left, patch.left);
                set(top, patch.top);
            }
            AnnotationObject::Text { left, top, content, font_size, fill, .. } => {
                if patch.width.is_some() || patch.height.is_some() || patch.stroke.is_some() || patch.stroke_width.is_some() {
                    return Err(AppError::validation("Text objects are sized by their font"));
                }
                set(font_size, patch.font_size);
                set(content, patch.content.clone());
                set(fill, patch.fill);
                set(left, patch.left);
                set(top, patch.top);
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Geometry checks every object must pass, however it reached the surface.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            AnnotationObject::Rectangle { left, top, width, height, stroke_width, .. } => {
                finite("left", *left)?;
                finite("top", *top)?;
                non_negative("width", *width)?;
                non_negative("height", *height)?;
                non_negative("stroke_width", *stroke_width)?;
            }
            AnnotationObject::Text { left, top, font_size, .. } => {
                finite("left", *left)?;
                finite("top", *top)?;
                if !(*font_size > 0.0 && *font_size <= MAX_FONT_SIZE) {
                    return Err(AppError::validation(format!(
                        "font_size must be greater than 0 and at most {}",
                        MAX_FONT_SIZE
                    )));
                }
            }
        }
        Ok(())
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn finite(field: &str, value: f64) -> Result<(), AppError> {
    if !value.is_finite() {
        return Err(AppError::validation(format!("{} must be a finite number", field)));
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> Result<(), AppError> {
    if value < 0.0 || !value.is_finite() {
        return Err(AppError::validation(format!("{} must be a non-negative number", field)));
    }
    Ok(())
}

/// Direct-manipulation edit to one object (move, resize, retype).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ObjectPatch {
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub stroke_width: Option<f64>,
    pub fill: Option<Color>,
    pub stroke: Option<Color>,
    pub content: Option<String>,
    pub font_size: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Select,
    Rectangle,
    Text,
}

impl Tool {
    /// The object a click on this tool drops onto the surface, if any.
    pub fn default_object(self) -> Option<AnnotationObject> {
        match self {
            Tool::Select => None,
            Tool::Rectangle => Some(AnnotationObject::default_rectangle()),
            Tool::Text => Some(AnnotationObject::default_text()),
        }
    }
}

/// Lifecycle of one annotation session's surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Saving,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Saving => "saving",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
