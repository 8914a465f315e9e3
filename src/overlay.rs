use image::{Rgba, RgbaImage, imageops};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};
use tracing::debug;

use crate::geometry::{CanvasSize, GeometryError, GridPoint, ScreenPoint, ensure_finite, to_canvas};
use crate::loader::FrameImage;

/// Colors and sizes used when drawing overlays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub path_color: [u8; 4],
    pub contour_color: [u8; 4],
    pub highlight_color: [u8; 4],
    pub start_color: [u8; 4],
    pub end_color: [u8; 4],
    pub line_width: f32,
    pub highlight_radius: f32,
    pub landmark_radius: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            path_color: [255, 255, 0, 255],
            contour_color: [0, 128, 0, 255],
            highlight_color: [0, 255, 0, 204],
            start_color: [255, 0, 0, 255],
            end_color: [0, 0, 255, 255],
            line_width: 1.0,
            highlight_radius: 4.0,
            landmark_radius: 4.0,
        }
    }
}

/// Transparent drawing surface stacked above a viewport.
///
/// The backing pixmap follows the live container size. Once detached (the
/// viewer went away) every draw call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct OverlayCanvas {
    size: CanvasSize,
    pixmap: Option<Pixmap>,
    detached: bool,
}

impl OverlayCanvas {
    pub fn new(size: CanvasSize) -> Self {
        Self {
            size,
            pixmap: Pixmap::new(size.width, size.height),
            detached: false,
        }
    }

    pub fn size(&self) -> CanvasSize {
        self.size
    }

    pub fn is_live(&self) -> bool {
        !self.detached && self.pixmap.is_some()
    }

    pub fn pixmap(&self) -> Option<&Pixmap> {
        self.pixmap.as_ref()
    }

    /// Match the container size. The contents are dropped, so a redraw has to
    /// follow.
    pub fn resize(&mut self, size: CanvasSize) {
        if self.detached || size == self.size {
            return;
        }
        debug!(width = size.width, height = size.height, "overlay resized");
        self.size = size;
        self.pixmap = Pixmap::new(size.width, size.height);
    }

    /// Whether pointer input can be mapped onto this canvas.
    pub fn accepts_input(&self) -> bool {
        self.is_live() && !self.size.is_empty()
    }

    pub fn detach(&mut self) {
        self.detached = true;
        self.pixmap = None;
        self.size = CanvasSize::default();
    }

    pub fn clear(&mut self) {
        if let Some(pixmap) = self.live_pixmap() {
            pixmap.fill(Color::TRANSPARENT);
        }
    }

    fn live_pixmap(&mut self) -> Option<&mut Pixmap> {
        if self.detached {
            return None;
        }
        self.pixmap.as_mut()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Redraw path, contour and the highlighted contour vertex.
    ///
    /// The canvas is always cleared first. Nothing else is drawn until the
    /// image size is known, since the overlay would be scaled against a frame
    /// that is not on screen yet.
    pub fn render(
        &self,
        canvas: &mut OverlayCanvas,
        path: &[GridPoint],
        contour: &[GridPoint],
        image_width: u32,
        image_height: u32,
        highlight: Option<usize>,
    ) -> Result<(), GeometryError> {
        canvas.clear();
        if image_width == 0 || image_height == 0 {
            return Ok(());
        }
        ensure_finite(path)?;
        ensure_finite(contour)?;

        let size = canvas.size();
        let Some(pixmap) = canvas.live_pixmap() else {
            return Ok(());
        };

        stroke_polyline(pixmap, path, size, self.style.path_color, self.style.line_width);
        stroke_polyline(
            pixmap,
            contour,
            size,
            self.style.contour_color,
            self.style.line_width,
        );

        if let Some(vertex) = highlight.and_then(|index| contour.get(index)) {
            let (x, y) = to_canvas(*vertex, size);
            fill_disc(
                pixmap,
                x as f32,
                y as f32,
                self.style.highlight_radius,
                self.style.highlight_color,
            );
        }
        Ok(())
    }

    /// Redraw the start and end markers of picking mode.
    pub fn render_landmarks(&self, canvas: &mut OverlayCanvas, points: &[ScreenPoint]) {
        canvas.clear();
        let Some(pixmap) = canvas.live_pixmap() else {
            return;
        };
        for (index, point) in points.iter().enumerate() {
            let color = if index == 0 {
                self.style.start_color
            } else {
                self.style.end_color
            };
            fill_disc(
                pixmap,
                point.x as f32,
                point.y as f32,
                self.style.landmark_radius,
                color,
            );
        }
    }
}

fn paint_for(color: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = true;
    paint
}

// Open polyline: the last vertex is not joined back to the first.
fn stroke_polyline(
    pixmap: &mut Pixmap,
    points: &[GridPoint],
    size: CanvasSize,
    color: [u8; 4],
    width: f32,
) {
    if points.len() < 2 {
        return;
    }
    let mut builder = PathBuilder::new();
    for (index, point) in points.iter().enumerate() {
        let (x, y) = to_canvas(*point, size);
        if index == 0 {
            builder.move_to(x as f32, y as f32);
        } else {
            builder.line_to(x as f32, y as f32);
        }
    }
    let Some(path) = builder.finish() else {
        return;
    };
    let stroke = Stroke {
        width,
        ..Default::default()
    };
    pixmap.stroke_path(&path, &paint_for(color), &stroke, Transform::identity(), None);
}

fn fill_disc(pixmap: &mut Pixmap, x: f32, y: f32, radius: f32, color: [u8; 4]) {
    if let Some(circle) = PathBuilder::from_circle(x, y, radius) {
        pixmap.fill_path(
            &circle,
            &paint_for(color),
            FillRule::Winding,
            Transform::identity(),
            None,
        );
    }
}

/// Blend the overlay over a decoded frame stretched to the canvas size.
pub fn compose(frame: &FrameImage, canvas: &OverlayCanvas) -> Option<RgbaImage> {
    let size = canvas.size();
    if size.is_empty() {
        return None;
    }
    let base = imageops::resize(
        &frame.pixels,
        size.width,
        size.height,
        imageops::FilterType::Triangle,
    );
    let mut output = RgbaImage::from_fn(size.width, size.height, |x, y| {
        let value = base.get_pixel(x, y).0[0];
        Rgba([value, value, value, 255])
    });

    if let Some(pixmap) = canvas.pixmap() {
        let layer: Vec<u8> = pixmap
            .pixels()
            .iter()
            .flat_map(|pixel| {
                let color = pixel.demultiply();
                [color.red(), color.green(), color.blue(), color.alpha()]
            })
            .collect();
        let layer = RgbaImage::from_raw(pixmap.width(), pixmap.height(), layer)?;
        imageops::overlay(&mut output, &layer, 0, 0);
    }
    Some(output)
}
