use crate::enums::ViewMode;
use crate::geometry::ScreenPoint;

/// Start and end point.
pub const MAX_LANDMARKS: usize = 2;

/// Append `click` unless both landmarks are already placed or the pair is
/// being edited.
pub fn add_point(mode: ViewMode, points: &mut Vec<ScreenPoint>, click: ScreenPoint) -> bool {
    if mode == ViewMode::Editing || points.len() >= MAX_LANDMARKS {
        return false;
    }
    points.push(click);
    true
}

/// Undo the most recent landmark.
pub fn remove_last(mode: ViewMode, points: &mut Vec<ScreenPoint>) -> bool {
    if mode == ViewMode::Editing {
        return false;
    }
    points.pop().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_click_is_ignored() {
        let mut points = Vec::new();
        assert!(add_point(ViewMode::Picking, &mut points, ScreenPoint::new(1, 1)));
        assert!(add_point(ViewMode::Picking, &mut points, ScreenPoint::new(2, 2)));
        assert!(!add_point(ViewMode::Picking, &mut points, ScreenPoint::new(3, 3)));
        assert_eq!(points, vec![ScreenPoint::new(1, 1), ScreenPoint::new(2, 2)]);
    }

    #[test]
    fn undo_stops_at_empty() {
        let mut points = vec![ScreenPoint::new(1, 1)];
        assert!(remove_last(ViewMode::Picking, &mut points));
        assert!(!remove_last(ViewMode::Picking, &mut points));
        assert!(points.is_empty());
    }

    #[test]
    fn editing_mode_freezes_landmarks() {
        let mut points = vec![ScreenPoint::new(4, 4)];
        for _ in 0..5 {
            assert!(!add_point(ViewMode::Editing, &mut points, ScreenPoint::new(9, 9)));
            assert!(!remove_last(ViewMode::Editing, &mut points));
        }
        assert_eq!(points, vec![ScreenPoint::new(4, 4)]);
    }
}
