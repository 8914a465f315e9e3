//! # DICOM-annotator library
//!
//! This crate holds the interaction core of a two-viewer DICOM annotation
//! front-end: landmark picking on multi-frame images, submitting the
//! landmarks to an inference service and editing the returned vessel
//! contours on a transparent overlay.
//!
//! Contours and paths live in a fixed 1024x1024 grid that is shared with the
//! backend, independent of the rendered resolution. Pointer input arrives in
//! canvas pixels and is mapped into that grid by [`geometry`]. The mapping
//! keeps the backend's crossed row/column convention:
//!  - canvas y becomes the row, scaled by the canvas *width*
//!  - canvas x becomes the column, scaled by the canvas *height*
//!
//! The two viewers share one mode:
//!  - Picking: left click adds a start/end landmark (at most two), right click
//!    removes the last one
//!  - Editing: an inference record is loaded, the nearest contour vertex
//!    within 10 pixels can be dragged and its neighbours follow with a
//!    decaying blend
//!
//! DICOM decoding is done through the dicom-rs stack behind the
//! [`loader::ImageLoader`] trait, so the state machine can be driven by any
//! frame source.
//!
//! # Examples
//!
//! ## Editing a loaded contour
//!
//! ```no_run
//! # use dicom_annotator::{
//! #     config::ViewerConfig, controller::ViewerController, enums::ViewerId,
//! #     loader::DicomImageLoader, session::ViewerEvent,
//! # };
//! # async fn run(record: dicom_annotator::client::InferenceRecord) {
//! let config = ViewerConfig::default();
//! let mut viewer = ViewerController::new(DicomImageLoader::new(&config.cache_dir), &config);
//! viewer
//!     .handle(ViewerId::First, ViewerEvent::Resize { width: 800, height: 800 })
//!     .await
//!     .expect("should have resized the overlay");
//! viewer
//!     .open_inference(&record)
//!     .await
//!     .expect("should have loaded both images");
//! viewer
//!     .handle(ViewerId::First, ViewerEvent::PointerDown { x: 120.0, y: 310.0 })
//!     .await
//!     .expect("should have grabbed a vertex");
//! # }
//! ```

pub mod client;
pub mod config;
pub mod controller;
pub mod editor;
pub mod enums;
pub mod frames;
pub mod geometry;
pub mod landmarks;
pub mod loader;
pub mod locator;
pub mod overlay;
pub mod polling;
pub mod session;
