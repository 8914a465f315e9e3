use serde::{Deserialize, Serialize};

/// Interaction mode shared by both viewports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewMode {
    /// Landmarks can be placed; overlays are hidden.
    #[default]
    Picking,
    /// An inference record is loaded and its contours can be dragged.
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewerId {
    First,
    Second,
}

impl ViewerId {
    pub const ALL: [ViewerId; 2] = [ViewerId::First, ViewerId::Second];

    pub fn index(self) -> usize {
        match self {
            ViewerId::First => 0,
            ViewerId::Second => 1,
        }
    }
}

/// What happens to contour and path overlays when the frame changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePolicy {
    #[default]
    KeepOverlays,
    ClearOverlays,
}
