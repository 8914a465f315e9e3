use crate::geometry::{CanvasSize, GeometryError, GridPoint, to_canvas};

/// Default pick radius around a vertex, in canvas pixels.
pub const DEFAULT_THRESHOLD_PX: f64 = 10.0;

/// Index of the polyline vertex closest to the pointer, if it lies within
/// `threshold_px` canvas pixels.
///
/// Vertices are projected with [`to_canvas`] against the live canvas size.
/// The scan keeps the first vertex on exact ties, so identical input always
/// yields the same index.
///
/// # Errors
///
/// Returns [`GeometryError`] if the pointer or any vertex is not finite.
pub fn find_nearest(
    pointer_x: f64,
    pointer_y: f64,
    polyline: &[GridPoint],
    canvas: CanvasSize,
    threshold_px: f64,
) -> Result<Option<usize>, GeometryError> {
    if !pointer_x.is_finite() || !pointer_y.is_finite() {
        return Err(GeometryError::NonFinitePointer);
    }

    let mut closest: Option<(usize, f64)> = None;
    for (index, vertex) in polyline.iter().enumerate() {
        let (x, y) = to_canvas(*vertex, canvas);
        let distance = (x - pointer_x).hypot(y - pointer_y);
        if !distance.is_finite() {
            return Err(GeometryError::NonFiniteVertex { index });
        }
        if closest.is_none_or(|(_, best)| distance < best) {
            closest = Some((index, distance));
        }
    }

    Ok(closest
        .filter(|&(_, distance)| distance <= threshold_px)
        .map(|(index, _)| index))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANVAS: CanvasSize = CanvasSize::new(1024, 1024);

    fn line() -> Vec<GridPoint> {
        vec![
            GridPoint::new(10.0, 10.0),
            GridPoint::new(20.0, 20.0),
            GridPoint::new(30.0, 30.0),
        ]
    }

    #[test]
    fn empty_polyline_has_no_match() {
        assert_eq!(find_nearest(5.0, 5.0, &[], CANVAS, 10.0), Ok(None));
    }

    #[test]
    fn picks_minimum_within_threshold() {
        // canvas (x, y) = (col, row) on a 1024 canvas
        assert_eq!(find_nearest(21.0, 19.0, &line(), CANVAS, 10.0), Ok(Some(1)));
        assert_eq!(find_nearest(31.0, 30.0, &line(), CANVAS, 10.0), Ok(Some(2)));
    }

    #[test]
    fn everything_beyond_threshold_is_no_match() {
        assert_eq!(find_nearest(300.0, 300.0, &line(), CANVAS, 10.0), Ok(None));
        // exactly on the threshold still matches
        assert_eq!(find_nearest(40.0, 30.0, &line(), CANVAS, 10.0), Ok(Some(2)));
    }

    #[test]
    fn threshold_is_measured_in_canvas_pixels() {
        // On a 2048 canvas grid point (20, 20) sits at canvas (40, 40).
        let canvas = CanvasSize::new(2048, 2048);
        assert_eq!(find_nearest(21.0, 19.0, &line(), canvas, 10.0), Ok(Some(0)));
        assert_eq!(find_nearest(45.0, 45.0, &line(), canvas, 10.0), Ok(Some(1)));
    }

    #[test]
    fn first_vertex_wins_ties() {
        let duplicated = vec![GridPoint::new(5.0, 5.0), GridPoint::new(5.0, 5.0)];
        for _ in 0..3 {
            assert_eq!(find_nearest(5.0, 5.0, &duplicated, CANVAS, 10.0), Ok(Some(0)));
        }
    }

    #[test]
    fn non_finite_vertex_fails_loudly() {
        let broken = vec![GridPoint::new(5.0, 5.0), GridPoint::new(f64::NAN, 1.0)];
        assert_eq!(
            find_nearest(5.0, 5.0, &broken, CANVAS, 10.0),
            Err(GeometryError::NonFiniteVertex { index: 1 })
        );
    }
}
