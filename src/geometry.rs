//! Coordinate math shared by every view.
//!
//! Three spaces are involved: page space (the OCR layer's units, top-left
//! origin), normalized space (`[0, 1]` on both axes for points inside the
//! page) and display space (pixels of the paint surface, after rotation).
//! Overlay painting and pointer hit-testing both go through this module so
//! the clickable area always equals the painted area.

use serde::{Deserialize, Serialize};

use crate::document_model::{BBox, PageSize};

/// Leading edges receive this fraction of the trailing padding by default.
pub const DEFAULT_LEADING_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Size of a paint surface as it appears on screen (already rotated).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

impl DisplaySize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Clockwise page rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270];

    /// Accepts any multiple of 90, including negative angles.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::R0),
            90 => Some(Rotation::R90),
            180 => Some(Rotation::R180),
            270 => Some(Rotation::R270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::R90 | Rotation::R270)
    }
}

/// Extra clickable margin around a display box. Trailing (right/bottom)
/// edges get the full amount, leading (left/top) edges a fraction of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Padding {
    pub leading: f64,
    pub trailing: f64,
}

impl Padding {
    pub fn asymmetric(padding_px: f64) -> Self {
        Self::with_ratio(padding_px, DEFAULT_LEADING_RATIO)
    }

    pub fn with_ratio(padding_px: f64, leading_ratio: f64) -> Self {
        let padding_px = padding_px.max(0.0);
        Self {
            leading: padding_px * leading_ratio.max(0.0),
            trailing: padding_px,
        }
    }

    pub fn none() -> Self {
        Self {
            leading: 0.0,
            trailing: 0.0,
        }
    }
}

/// Page space → normalized space.
///
/// A zero (or otherwise unusable) page dimension does not fail: that axis is
/// clamped to 0. Boxes outside the page are not clipped.
pub fn normalize(bbox: &BBox, page_size: &PageSize) -> BBox {
    let scale = |value: f64, extent: f64| {
        if extent.is_finite() && extent > 0.0 {
            value / extent
        } else {
            0.0
        }
    };
    BBox::new(
        scale(bbox.x1, page_size.width),
        scale(bbox.y1, page_size.height),
        scale(bbox.x2, page_size.width),
        scale(bbox.y2, page_size.height),
    )
}

/// Normalized space → page space.
pub fn denormalize(norm: &BBox, page_size: &PageSize) -> BBox {
    BBox::new(
        norm.x1 * page_size.width,
        norm.y1 * page_size.height,
        norm.x2 * page_size.width,
        norm.y2 * page_size.height,
    )
}

/// Mirror a box vertically inside its page. Used once at load time for
/// sources whose origin is the bottom-left corner.
pub fn flip_y(bbox: &BBox, page_height: f64) -> BBox {
    BBox::new(bbox.x1, page_height - bbox.y2, bbox.x2, page_height - bbox.y1)
}

/// Size of the unrotated page drawing inside a rotated display surface.
fn unrotated_extent(display: &DisplaySize, rotation: Rotation) -> (f64, f64) {
    if rotation.swaps_axes() {
        (display.height, display.width)
    } else {
        (display.width, display.height)
    }
}

/// Normalized point → display point.
pub fn point_to_display(nx: f64, ny: f64, display: &DisplaySize, rotation: Rotation) -> Point {
    let (w, h) = unrotated_extent(display, rotation);
    let (ux, uy) = (nx * w, ny * h);
    match rotation {
        Rotation::R0 => Point::new(ux, uy),
        Rotation::R90 => Point::new(h - uy, ux),
        Rotation::R180 => Point::new(w - ux, h - uy),
        Rotation::R270 => Point::new(uy, w - ux),
    }
}

/// Display point → normalized point. Exact inverse of [`point_to_display`]
/// for a non-empty display.
pub fn point_from_display(point: Point, display: &DisplaySize, rotation: Rotation) -> Point {
    let (w, h) = unrotated_extent(display, rotation);
    let (ux, uy) = match rotation {
        Rotation::R0 => (point.x, point.y),
        Rotation::R90 => (point.y, h - point.x),
        Rotation::R180 => (w - point.x, h - point.y),
        Rotation::R270 => (w - point.y, point.x),
    };
    let ratio = |value: f64, extent: f64| if extent > 0.0 { value / extent } else { 0.0 };
    Point::new(ratio(ux, w), ratio(uy, h))
}

/// Normalized box → display box.
pub fn to_display(norm: &BBox, display: &DisplaySize, rotation: Rotation) -> BBox {
    let a = point_to_display(norm.x1, norm.y1, display, rotation);
    let b = point_to_display(norm.x2, norm.y2, display, rotation);
    BBox::new(a.x, a.y, b.x, b.y)
}

/// Display box → normalized box.
pub fn from_display(display_bbox: &BBox, display: &DisplaySize, rotation: Rotation) -> BBox {
    let a = point_from_display(Point::new(display_bbox.x1, display_bbox.y1), display, rotation);
    let b = point_from_display(Point::new(display_bbox.x2, display_bbox.y2), display, rotation);
    BBox::new(a.x, a.y, b.x, b.y)
}

/// Page box straight to display space.
pub fn page_to_display(
    bbox: &BBox,
    page_size: &PageSize,
    display: &DisplaySize,
    rotation: Rotation,
) -> BBox {
    to_display(&normalize(bbox, page_size), display, rotation)
}

/// The box that is both painted and clickable.
pub fn padded(display_bbox: &BBox, padding: Padding) -> BBox {
    BBox {
        x1: display_bbox.x1 - padding.leading,
        y1: display_bbox.y1 - padding.leading,
        x2: display_bbox.x2 + padding.trailing,
        y2: display_bbox.y2 + padding.trailing,
    }
}

/// Hit-test with the default asymmetric padding.
pub fn hit_test(point: Point, display_bbox: &BBox, padding_px: f64) -> bool {
    hit_test_with(point, display_bbox, Padding::asymmetric(padding_px))
}

pub fn hit_test_with(point: Point, display_bbox: &BBox, padding: Padding) -> bool {
    padded(display_bbox, padding).contains(point.x, point.y)
}

/// Client (CSS pixel) coordinates → canvas pixel coordinates.
///
/// The canvas backing store can differ from its CSS box (device pixel ratio,
/// responsive layout), so the offset inside the element is rescaled.
pub fn client_to_canvas(
    client: Point,
    element_origin: Point,
    css_size: &DisplaySize,
    canvas_size: &DisplaySize,
) -> Point {
    let local_x = client.x - element_origin.x;
    let local_y = client.y - element_origin.y;
    let sx = if css_size.width > 0.0 { canvas_size.width / css_size.width } else { 1.0 };
    let sy = if css_size.height > 0.0 { canvas_size.height / css_size.height } else { 1.0 };
    Point::new(local_x * sx, local_y * sy)
}
