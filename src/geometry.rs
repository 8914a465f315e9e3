use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Side length of the normalized annotation grid the backend speaks in.
pub const GRID_SIZE: f64 = 1024.0;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("Canvas has no area ({width}x{height})")]
    EmptyCanvas { width: u32, height: u32 },

    #[error("Pointer position is not finite")]
    NonFinitePointer,

    #[error("Vertex {index} is not finite")]
    NonFiniteVertex { index: usize },

    #[error("Vertex {index} is malformed: {reason}")]
    MalformedVertex { index: usize, reason: &'static str },

    #[error("Polyline is not an array")]
    NotAnArray,
}

/// A point in normalized grid space, stored as `[row, col]` on the wire.
///
/// Whole coordinates are written as integers, which is what the backend
/// stores; fractional ones stay floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[WireCoordinate; 2]")]
pub struct GridPoint {
    pub row: f64,
    pub col: f64,
}

impl GridPoint {
    pub const fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    fn is_finite(&self) -> bool {
        self.row.is_finite() && self.col.is_finite()
    }
}

impl From<[f64; 2]> for GridPoint {
    fn from([row, col]: [f64; 2]) -> Self {
        Self { row, col }
    }
}

impl From<GridPoint> for [f64; 2] {
    fn from(point: GridPoint) -> Self {
        [point.row, point.col]
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
enum WireCoordinate {
    Whole(i64),
    Fraction(f64),
}

impl From<f64> for WireCoordinate {
    fn from(value: f64) -> Self {
        // 2^53: beyond this an f64 no longer holds every integer.
        if value.fract() == 0.0 && value.abs() <= 9_007_199_254_740_992.0 {
            WireCoordinate::Whole(value as i64)
        } else {
            WireCoordinate::Fraction(value)
        }
    }
}

impl From<GridPoint> for [WireCoordinate; 2] {
    fn from(point: GridPoint) -> Self {
        [point.row.into(), point.col.into()]
    }
}

/// A point in canvas pixels, as captured from a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

impl ScreenPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Snap a raw pointer position to whole pixels.
    pub fn from_pointer(x: f64, y: f64) -> Result<Self, GeometryError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(GeometryError::NonFinitePointer);
        }
        Ok(Self {
            x: round_half_up(x) as i32,
            y: round_half_up(y) as i32,
        })
    }
}

/// Live size of an overlay canvas in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Canvas pixels per grid unit, `(width / 1024, height / 1024)`.
    fn scales(&self) -> (f64, f64) {
        (
            f64::from(self.width) / GRID_SIZE,
            f64::from(self.height) / GRID_SIZE,
        )
    }
}

/// Round to the nearest integer with halves going towards positive infinity.
#[inline]
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Map a canvas position into the normalized grid.
///
/// The axes are crossed: the canvas y coordinate becomes the row through the
/// width-derived scale, and x becomes the column through the height-derived
/// scale. Backend contours are stored in this convention, so it must not be
/// "corrected" here.
pub fn to_normalized(x: f64, y: f64, canvas: CanvasSize) -> Result<GridPoint, GeometryError> {
    if canvas.is_empty() {
        return Err(GeometryError::EmptyCanvas {
            width: canvas.width,
            height: canvas.height,
        });
    }
    if !x.is_finite() || !y.is_finite() {
        return Err(GeometryError::NonFinitePointer);
    }
    let (scale_x, scale_y) = canvas.scales();
    Ok(GridPoint {
        row: round_half_up(y / scale_x),
        col: round_half_up(x / scale_y),
    })
}

/// Inverse of [`to_normalized`], returning `(x, y)` in canvas pixels.
pub fn to_canvas(point: GridPoint, canvas: CanvasSize) -> (f64, f64) {
    let (scale_x, scale_y) = canvas.scales();
    (point.col * scale_y, point.row * scale_x)
}

/// Check that every vertex can be projected.
pub fn ensure_finite(polyline: &[GridPoint]) -> Result<(), GeometryError> {
    match polyline.iter().position(|point| !point.is_finite()) {
        Some(index) => Err(GeometryError::NonFiniteVertex { index }),
        None => Ok(()),
    }
}

/// Parse a `[[row, col], ...]` JSON array.
///
/// Anything other than pairs of numbers is rejected with the offending index
/// instead of being skipped.
pub fn polyline_from_value(value: &Value) -> Result<Vec<GridPoint>, GeometryError> {
    let vertices = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(vertices) => vertices,
        _ => return Err(GeometryError::NotAnArray),
    };

    vertices
        .iter()
        .enumerate()
        .map(|(index, vertex)| {
            let pair = vertex.as_array().ok_or(GeometryError::MalformedVertex {
                index,
                reason: "expected a [row, col] pair",
            })?;
            if pair.len() != 2 {
                return Err(GeometryError::MalformedVertex {
                    index,
                    reason: "expected exactly two coordinates",
                });
            }
            let coordinate = |v: &Value| {
                v.as_f64().ok_or(GeometryError::MalformedVertex {
                    index,
                    reason: "coordinate is not a number",
                })
            };
            Ok(GridPoint::new(coordinate(&pair[0])?, coordinate(&pair[1])?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn axes_are_crossed() {
        let canvas = CanvasSize::new(512, 2048);
        // scale_x = 0.5, scale_y = 2.0
        let point = to_normalized(100.0, 40.0, canvas).unwrap();
        assert_eq!(point, GridPoint::new(80.0, 50.0));
        assert_eq!(to_canvas(point, canvas), (100.0, 40.0));
    }

    #[test]
    fn round_trip_stays_within_one_unit() {
        for &(w, h) in &[(1024, 1024), (800, 600), (1920, 1080), (333, 777)] {
            let canvas = CanvasSize::new(w, h);
            for x in (0..w).step_by(37) {
                for y in (0..h).step_by(41) {
                    let grid = to_normalized(f64::from(x), f64::from(y), canvas).unwrap();
                    let (cx, cy) = to_canvas(grid, canvas);
                    assert!((cx - f64::from(x)).abs() <= 1.0, "x {x} -> {cx} on {w}x{h}");
                    assert!((cy - f64::from(y)).abs() <= 1.0, "y {y} -> {cy} on {w}x{h}");
                }
            }
        }
    }

    #[test]
    fn halves_round_up() {
        assert_eq!(round_half_up(12.5), 13.0);
        assert_eq!(round_half_up(-12.5), -12.0);
        assert_eq!(round_half_up(12.49), 12.0);
    }

    #[test]
    fn empty_canvas_is_rejected() {
        assert_eq!(
            to_normalized(1.0, 1.0, CanvasSize::new(0, 10)),
            Err(GeometryError::EmptyCanvas { width: 0, height: 10 })
        );
    }

    #[test]
    fn polyline_parsing_fails_loudly() {
        let good = json!([[1, 2], [3.5, 4]]);
        assert_eq!(
            polyline_from_value(&good).unwrap(),
            vec![GridPoint::new(1.0, 2.0), GridPoint::new(3.5, 4.0)]
        );
        assert_eq!(polyline_from_value(&Value::Null).unwrap(), vec![]);

        let bad = json!([[1, 2], [3, "x"]]);
        assert!(matches!(
            polyline_from_value(&bad),
            Err(GeometryError::MalformedVertex { index: 1, .. })
        ));
        let short = json!([[1]]);
        assert!(matches!(
            polyline_from_value(&short),
            Err(GeometryError::MalformedVertex { index: 0, .. })
        ));
    }

    #[test]
    fn grid_point_serializes_as_pair() {
        let text = serde_json::to_string(&GridPoint::new(3.0, 4.0)).unwrap();
        assert_eq!(text, "[3,4]");
        let text = serde_json::to_string(&GridPoint::new(-2.0, 4.5)).unwrap();
        assert_eq!(text, "[-2,4.5]");
        let back: GridPoint = serde_json::from_str("[3,4.5]").unwrap();
        assert_eq!(back, GridPoint::new(3.0, 4.5));
    }

    #[test]
    fn non_finite_pointer_is_not_snapped() {
        assert_eq!(
            ScreenPoint::from_pointer(10.4, 20.6),
            Ok(ScreenPoint::new(10, 21))
        );
        assert_eq!(
            ScreenPoint::from_pointer(f64::NAN, 3.0),
            Err(GeometryError::NonFinitePointer)
        );
        assert_eq!(
            ScreenPoint::from_pointer(3.0, f64::INFINITY),
            Err(GeometryError::NonFinitePointer)
        );
    }
}
