use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::enums::ViewMode;
use crate::geometry::{CanvasSize, GeometryError, GridPoint, round_half_up, to_normalized};
use crate::locator::{DEFAULT_THRESHOLD_PX, find_nearest};

/// How far a drag ripples into neighbouring vertices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Number of vertices on each side of the dragged one that get blended.
    pub neighbor_radius: usize,
    /// Blend weight for the direct neighbours; the n-th neighbour uses `weight / n`.
    pub weight: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            neighbor_radius: 1,
            weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(usize),
}

/// Linear interpolation from `from` towards `to`, each axis rounded.
pub fn blend(from: GridPoint, to: GridPoint, alpha: f64) -> GridPoint {
    GridPoint::new(
        round_half_up(from.row + alpha * (to.row - from.row)),
        round_half_up(from.col + alpha * (to.col - from.col)),
    )
}

/// Move `contour[index]` to `target` and pull its neighbours along.
///
/// Vertices further than `neighbor_radius` from `index` are left untouched.
/// Out-of-range indices are ignored.
pub fn drag_vertex(
    contour: &mut [GridPoint],
    index: usize,
    target: GridPoint,
    smoothing: SmoothingConfig,
) {
    let radius = smoothing.neighbor_radius.min(contour.len());
    let Some(slot) = contour.get_mut(index) else {
        return;
    };
    *slot = target;

    for n in 1..=radius {
        let alpha = smoothing.weight / n as f64;
        if let Some(left) = index.checked_sub(n) {
            contour[left] = blend(contour[left], target, alpha);
        }
        if let Some(right) = contour.get_mut(index + n) {
            *right = blend(*right, target, alpha);
        }
    }
}

/// Drag state machine for a single viewport.
#[derive(Debug, Clone, Default)]
pub struct ContourEditor {
    state: DragState,
    highlighted: Option<usize>,
    smoothing: SmoothingConfig,
    threshold_px: f64,
}

impl ContourEditor {
    pub fn new(smoothing: SmoothingConfig, threshold_px: f64) -> Self {
        Self {
            state: DragState::Idle,
            highlighted: None,
            smoothing,
            threshold_px,
        }
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn highlighted(&self) -> Option<usize> {
        self.highlighted
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    /// Start dragging the vertex under the pointer, if there is one.
    ///
    /// Returns the grabbed index.
    pub fn pointer_down(
        &mut self,
        mode: ViewMode,
        x: f64,
        y: f64,
        contour: &[GridPoint],
        canvas: CanvasSize,
    ) -> Result<Option<usize>, GeometryError> {
        if mode != ViewMode::Editing || self.is_dragging() {
            return Ok(None);
        }
        let hit = find_nearest(x, y, contour, canvas, self.threshold())?;
        if let Some(index) = hit {
            debug!(index, "grabbed contour vertex");
            self.state = DragState::Dragging(index);
            self.highlighted = Some(index);
        }
        Ok(hit)
    }

    /// Move the grabbed vertex to the pointer. Returns whether the contour changed.
    pub fn pointer_move(
        &mut self,
        mode: ViewMode,
        x: f64,
        y: f64,
        contour: &mut [GridPoint],
        canvas: CanvasSize,
    ) -> Result<bool, GeometryError> {
        let DragState::Dragging(index) = self.state else {
            return Ok(false);
        };
        if mode != ViewMode::Editing || index >= contour.len() {
            return Ok(false);
        }
        let target = to_normalized(x, y, canvas)?;
        drag_vertex(contour, index, target, self.smoothing);
        Ok(true)
    }

    /// Finish the drag. The contour already holds the final positions.
    pub fn pointer_up(&mut self, mode: ViewMode) {
        if mode != ViewMode::Editing {
            return;
        }
        self.reset();
    }

    /// Drop any drag and highlight regardless of mode.
    pub fn reset(&mut self) {
        if let DragState::Dragging(index) = self.state {
            debug!(index, "released contour vertex");
        }
        self.state = DragState::Idle;
        self.highlighted = None;
    }

    fn threshold(&self) -> f64 {
        if self.threshold_px > 0.0 {
            self.threshold_px
        } else {
            DEFAULT_THRESHOLD_PX
        }
    }
}
