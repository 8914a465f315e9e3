//! Per-viewport sessions and the pair-wide mode state machine.
//!
//! All UI input goes through [`Workspace::handle`], which takes the current
//! state and an event and leaves the next state behind, together with an
//! [`Effect`] for the shell (typically "load this frame").

use thiserror::Error;
use tracing::{debug, info};

use crate::client::{InferenceParams, InferenceRecord, RemoteId};
use crate::config::ViewerConfig;
use crate::editor::ContourEditor;
use crate::enums::{FramePolicy, ViewMode, ViewerId};
use crate::frames::{FrameRejected, FrameStack, FrameTicket, wheel_delta};
use crate::geometry::{CanvasSize, GeometryError, GridPoint, ScreenPoint, to_normalized};
use crate::landmarks;
use crate::loader::{FrameImage, ImageRef};
use crate::overlay::{OverlayCanvas, OverlayRenderer, OverlayStyle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Inference record needs two params and two results, got {params} and {results}")]
    IncompleteRecord { params: usize, results: usize },

    #[error("Viewer {0:?} has no file selected")]
    NoFile(ViewerId),

    #[error("Viewer {viewer:?} has {count} of 2 landmarks")]
    MissingLandmarks { viewer: ViewerId, count: usize },

    #[error("Landmarks are frozen while an inference is being edited")]
    Editing,

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameRejected),
}

/// Raw input for one viewport, in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewerEvent {
    /// Primary button pressed.
    PointerDown { x: f64, y: f64 },
    PointerMove { x: f64, y: f64 },
    PointerUp,
    Wheel { delta_y: f64 },
    /// Secondary button, the context menu request.
    ContextMenu,
    /// The container changed size.
    Resize { width: u32, height: u32 },
}

/// What the shell has to do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// The overlay canvas was redrawn and can be presented.
    Redrawn,
    /// Fetch this frame, then report back through [`Workspace::frame_loaded`]
    /// or [`Workspace::frame_failed`].
    LoadFrame(FrameTicket),
}

/// Image, frame and annotation state of one viewer.
#[derive(Debug, Clone, Default)]
pub struct ViewportSession {
    file_id: Option<RemoteId>,
    image: Option<ImageRef>,
    frames: FrameStack,
    frame: Option<FrameImage>,
    canvas: OverlayCanvas,
    contour: Vec<GridPoint>,
    path: Vec<GridPoint>,
    landmarks: Vec<ScreenPoint>,
    editor: ContourEditor,
}

impl ViewportSession {
    fn new(editor: ContourEditor) -> Self {
        Self {
            editor,
            ..Self::default()
        }
    }

    pub fn file_id(&self) -> Option<&RemoteId> {
        self.file_id.as_ref()
    }

    pub fn image(&self) -> Option<&ImageRef> {
        self.image.as_ref()
    }

    pub fn current_frame(&self) -> usize {
        self.frames.current()
    }

    pub fn total_frames(&self) -> usize {
        self.frames.total()
    }

    /// Last frame whose pixels were applied.
    pub fn frame(&self) -> Option<&FrameImage> {
        self.frame.as_ref()
    }

    /// Size of the displayed image, `(0, 0)` until a frame is loaded.
    pub fn image_size(&self) -> (u32, u32) {
        self.frame
            .as_ref()
            .map_or((0, 0), |frame| (frame.width(), frame.height()))
    }

    pub fn canvas(&self) -> &OverlayCanvas {
        &self.canvas
    }

    pub fn contour(&self) -> &[GridPoint] {
        &self.contour
    }

    pub fn path(&self) -> &[GridPoint] {
        &self.path
    }

    pub fn landmarks(&self) -> &[ScreenPoint] {
        &self.landmarks
    }

    pub fn highlighted(&self) -> Option<usize> {
        self.editor.highlighted()
    }

    pub fn is_dragging(&self) -> bool {
        self.editor.is_dragging()
    }

    fn clear_annotations(&mut self) {
        self.contour.clear();
        self.path.clear();
        self.landmarks.clear();
        self.editor.reset();
    }

    fn show(&mut self, ticket: FrameTicket, image: FrameImage) -> bool {
        if !self.frames.complete(ticket) {
            return false;
        }
        self.frame = Some(image);
        true
    }
}

/// The two viewers plus the mode they share.
pub struct Workspace {
    viewers: [ViewportSession; 2],
    mode: ViewMode,
    selected_inference: Option<RemoteId>,
    frame_policy: FramePolicy,
    renderer: OverlayRenderer,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(&ViewerConfig::default())
    }
}

impl Workspace {
    pub fn new(config: &ViewerConfig) -> Self {
        let editor = ContourEditor::new(config.smoothing, config.hit_threshold_px);
        let style = OverlayStyle {
            highlight_radius: config.highlight_radius_px,
            ..OverlayStyle::default()
        };
        Self {
            viewers: [
                ViewportSession::new(editor.clone()),
                ViewportSession::new(editor),
            ],
            mode: ViewMode::Picking,
            selected_inference: None,
            frame_policy: config.frame_policy,
            renderer: OverlayRenderer::new(style),
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn selected_inference(&self) -> Option<&RemoteId> {
        self.selected_inference.as_ref()
    }

    pub fn viewer(&self, id: ViewerId) -> &ViewportSession {
        &self.viewers[id.index()]
    }

    fn viewer_mut(&mut self, id: ViewerId) -> &mut ViewportSession {
        &mut self.viewers[id.index()]
    }

    /// Apply one input event to `id`.
    pub fn handle(&mut self, id: ViewerId, event: ViewerEvent) -> Result<Effect, GeometryError> {
        let pointer = matches!(
            event,
            ViewerEvent::PointerDown { .. } | ViewerEvent::PointerMove { .. } | ViewerEvent::ContextMenu
        );
        // Unsized or torn-down canvases have nothing to map pointer input onto.
        if pointer && !self.viewer(id).canvas.accepts_input() {
            return Ok(Effect::None);
        }
        match event {
            ViewerEvent::PointerDown { x, y } => match self.mode {
                ViewMode::Picking => {
                    let click = ScreenPoint::from_pointer(x, y)?;
                    let viewer = self.viewer_mut(id);
                    if !landmarks::add_point(ViewMode::Picking, &mut viewer.landmarks, click) {
                        return Ok(Effect::None);
                    }
                    self.redraw(id)?;
                    Ok(Effect::Redrawn)
                }
                ViewMode::Editing => {
                    if self.viewers.iter().any(ViewportSession::is_dragging) {
                        return Ok(Effect::None);
                    }
                    let mode = self.mode;
                    let viewer = self.viewer_mut(id);
                    let size = viewer.canvas.size();
                    let hit = viewer
                        .editor
                        .pointer_down(mode, x, y, &viewer.contour, size)?;
                    if hit.is_none() {
                        return Ok(Effect::None);
                    }
                    self.redraw(id)?;
                    Ok(Effect::Redrawn)
                }
            },
            ViewerEvent::PointerMove { x, y } => {
                let mode = self.mode;
                let viewer = self.viewer_mut(id);
                let size = viewer.canvas.size();
                if !viewer
                    .editor
                    .pointer_move(mode, x, y, &mut viewer.contour, size)?
                {
                    return Ok(Effect::None);
                }
                self.redraw(id)?;
                Ok(Effect::Redrawn)
            }
            ViewerEvent::PointerUp => {
                if self.mode != ViewMode::Editing {
                    return Ok(Effect::None);
                }
                for viewer in &mut self.viewers {
                    viewer.editor.pointer_up(ViewMode::Editing);
                }
                self.redraw_all()?;
                Ok(Effect::Redrawn)
            }
            ViewerEvent::ContextMenu => {
                if !landmarks::remove_last(self.mode, &mut self.viewer_mut(id).landmarks) {
                    return Ok(Effect::None);
                }
                self.redraw(id)?;
                Ok(Effect::Redrawn)
            }
            ViewerEvent::Wheel { delta_y } => {
                let Some(delta) = wheel_delta(delta_y) else {
                    return Ok(Effect::None);
                };
                // Annotations stay until the new frame is actually on screen.
                match self.viewer_mut(id).frames.step(delta) {
                    Ok(ticket) => Ok(Effect::LoadFrame(ticket)),
                    Err(_) => Ok(Effect::None),
                }
            }
            ViewerEvent::Resize { width, height } => {
                self.viewer_mut(id)
                    .canvas
                    .resize(CanvasSize::new(width, height));
                self.redraw(id)?;
                Ok(Effect::Redrawn)
            }
        }
    }

    /// Apply a finished frame load. Stale loads are dropped.
    ///
    /// Landmarks belong to the frame they were placed on and are cleared
    /// here, together with the overlays when the policy asks for it.
    pub fn frame_loaded(
        &mut self,
        id: ViewerId,
        ticket: FrameTicket,
        image: FrameImage,
    ) -> Result<bool, GeometryError> {
        let policy = self.frame_policy;
        let viewer = self.viewer_mut(id);
        if !viewer.show(ticket, image) {
            return Ok(false);
        }
        viewer.landmarks.clear();
        if policy == FramePolicy::ClearOverlays {
            viewer.contour.clear();
            viewer.path.clear();
            viewer.editor.reset();
        }
        self.redraw(id)?;
        Ok(true)
    }

    pub fn frame_failed(&mut self, id: ViewerId, ticket: FrameTicket) {
        self.viewer_mut(id).frames.fail(ticket);
    }

    /// The user picked a file in one viewer's selector.
    ///
    /// Leaves editing mode and starts the viewer over on frame 0 of the new
    /// image.
    pub fn select_file(
        &mut self,
        id: ViewerId,
        file_id: RemoteId,
        image: ImageRef,
        first_frame: FrameImage,
    ) -> Result<(), GeometryError> {
        info!(viewer = ?id, %file_id, frames = image.frames, "file selected");
        let viewer = self.viewer_mut(id);
        viewer.clear_annotations();
        viewer.frames.reset(image.frames);
        viewer.file_id = Some(file_id);
        viewer.image = Some(image);
        viewer.frame = None;
        if let Ok(ticket) = viewer.frames.jump(first_frame.frame) {
            viewer.show(ticket, first_frame);
        }
        self.enter(ViewMode::Picking);
        self.selected_inference = None;
        self.redraw_all()
    }

    /// The user cleared one viewer's selection.
    pub fn clear_file(&mut self, id: ViewerId) -> Result<(), GeometryError> {
        let viewer = self.viewer_mut(id);
        viewer.clear_annotations();
        viewer.frames.reset(1);
        viewer.file_id = None;
        viewer.image = None;
        viewer.frame = None;
        self.redraw(id)
    }

    /// Load an inference record into both viewers and switch to editing.
    ///
    /// Everything is validated before the first viewer is touched, so a bad
    /// record leaves the workspace as it was.
    pub fn hydrate(
        &mut self,
        record: &InferenceRecord,
        loaded: [(ImageRef, FrameImage); 2],
    ) -> Result<(), SessionError> {
        if record.params.len() < 2 || record.results.len() < 2 {
            return Err(SessionError::IncompleteRecord {
                params: record.params.len(),
                results: record.results.len(),
            });
        }

        let mut staged = Vec::with_capacity(2);
        for ((params, output), (image, frame)) in
            record.params.iter().zip(&record.results).zip(loaded)
        {
            if params.frame_number >= image.frames {
                return Err(FrameRejected::OutOfRange {
                    requested: params.frame_number as i64,
                    total: image.frames,
                }
                .into());
            }
            staged.push((params, output.path()?, output.contour()?, image, frame));
        }

        for (id, (params, path, contour, image, frame)) in ViewerId::ALL.into_iter().zip(staged) {
            let viewer = self.viewer_mut(id);
            viewer.clear_annotations();
            viewer.frames.reset(image.frames);
            let ticket = viewer.frames.jump(params.frame_number)?;
            viewer.file_id = Some(params.dicom_file_id.clone());
            viewer.image = Some(image);
            viewer.frame = None;
            viewer.show(ticket, frame);
            viewer.path = path;
            viewer.contour = contour;
        }

        info!(inference = %record.id, "inference record loaded");
        self.selected_inference = Some(record.id.clone());
        self.enter(ViewMode::Editing);
        self.redraw_all()?;
        Ok(())
    }

    /// Build the run payload from both viewers' landmarks.
    ///
    /// Landmarks are captured in canvas pixels and sent in grid space.
    pub fn run_instances(&self) -> Result<Vec<InferenceParams>, SessionError> {
        if self.mode == ViewMode::Editing {
            return Err(SessionError::Editing);
        }
        ViewerId::ALL
            .into_iter()
            .map(|id| {
                let viewer = self.viewer(id);
                let file_id = viewer.file_id.clone().ok_or(SessionError::NoFile(id))?;
                let &[start, end] = viewer.landmarks.as_slice() else {
                    return Err(SessionError::MissingLandmarks {
                        viewer: id,
                        count: viewer.landmarks.len(),
                    });
                };
                let size = viewer.canvas.size();
                Ok(InferenceParams {
                    dicom_file_id: file_id,
                    frame_number: viewer.frames.displayed().unwrap_or(viewer.frames.current()),
                    start_point: Some(to_normalized(
                        f64::from(start.x),
                        f64::from(start.y),
                        size,
                    )?),
                    end_point: Some(to_normalized(f64::from(end.x), f64::from(end.y), size)?),
                })
            })
            .collect()
    }

    /// Tear down a viewer's canvas; later redraws become no-ops.
    pub fn close(&mut self, id: ViewerId) {
        let viewer = self.viewer_mut(id);
        viewer.editor.reset();
        viewer.canvas.detach();
    }

    /// Draw whatever the current mode shows for `id`.
    pub fn redraw(&mut self, id: ViewerId) -> Result<(), GeometryError> {
        let mode = self.mode;
        let renderer = &self.renderer;
        let viewer = &mut self.viewers[id.index()];
        match mode {
            ViewMode::Picking => {
                renderer.render_landmarks(&mut viewer.canvas, &viewer.landmarks);
                Ok(())
            }
            ViewMode::Editing => {
                let (width, height) = viewer.image_size();
                renderer.render(
                    &mut viewer.canvas,
                    &viewer.path,
                    &viewer.contour,
                    width,
                    height,
                    viewer.editor.highlighted(),
                )
            }
        }
    }

    fn redraw_all(&mut self) -> Result<(), GeometryError> {
        for id in ViewerId::ALL {
            self.redraw(id)?;
        }
        Ok(())
    }

    fn enter(&mut self, mode: ViewMode) {
        if self.mode != mode {
            debug!(from = ?self.mode, to = ?mode, "view mode changed");
        }
        self.mode = mode;
        for viewer in &mut self.viewers {
            viewer.editor.reset();
            if mode == ViewMode::Editing {
                viewer.landmarks.clear();
            }
        }
    }
}
