use crate::geometry::CanvasSize;

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use image::GrayImage;
use ndarray::{ArrayView2, s};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No DICOM file for {0}")]
    MissingFile(String),

    #[error("Frame {frame} is outside 0..{frames}")]
    FrameOutOfRange { frame: usize, frames: usize },

    #[error("Image {0} was never opened")]
    NotOpened(String),

    #[error("Decoded frame has an unexpected layout")]
    UnexpectedLayout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("Decoder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// An opened multi-frame image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub file_id: String,
    pub frames: usize,
}

/// A decoded frame, 8-bit grayscale.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub frame: usize,
    pub pixels: GrayImage,
}

impl FrameImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn size(&self) -> CanvasSize {
        CanvasSize::new(self.width(), self.height())
    }
}

/// Source of decoded frames.
///
/// The viewer core never looks inside the DICOM data; it only opens an image
/// to learn its frame count and asks for single frames.
pub trait ImageLoader {
    fn open(&self, file_id: &str) -> impl Future<Output = Result<ImageRef, LoadError>> + Send;

    fn load_frame(
        &self,
        image: &ImageRef,
        frame: usize,
    ) -> impl Future<Output = Result<FrameImage, LoadError>> + Send;
}

type DicomFile = FileDicomObject<InMemDicomObject>;

/// Reads `<file_id>.dcm` files from a directory and keeps opened objects
/// around so frame scrubbing does not re-parse the file.
pub struct DicomImageLoader {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<DicomFile>>>,
}

impl DicomImageLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{file_id}.dcm"))
    }

    /// Drop a cached object, e.g. after the file was downloaded again.
    pub fn evict(&self, file_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(file_id);
        }
    }

    fn cached(&self, file_id: &str) -> Option<Arc<DicomFile>> {
        self.cache.lock().ok()?.get(file_id).cloned()
    }

    fn remember(&self, file_id: &str, object: Arc<DicomFile>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(file_id.to_owned(), object);
        }
    }

    fn frame_count(dicom_object: &DicomFile) -> usize {
        dicom_object
            .element(tags::NUMBER_OF_FRAMES)
            .ok()
            .and_then(|element| element.to_int::<u32>().ok())
            .map(|frames| frames.max(1) as usize)
            .unwrap_or(1)
    }

    fn decode_frame(dicom_object: &DicomFile, frame: usize) -> Result<GrayImage, LoadError> {
        let pixel_data = dicom_object.decode_pixel_data_frame(frame as u32)?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        let array = pixel_data.to_ndarray_with_options::<u16>(&options)?;
        let slice = array.slice(s![0, .., .., 0]);
        Self::slice_to_image(&slice).ok_or(LoadError::UnexpectedLayout)
    }

    #[inline]
    fn normalize_to_u8(value: u16) -> u8 {
        ((value as f32 / 65535.0) * 255.0).clamp(0.0, 255.0) as u8
    }

    fn slice_to_image(slice: &ArrayView2<'_, u16>) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice
            .into_par_iter()
            .map(|&v| Self::normalize_to_u8(v))
            .collect();
        GrayImage::from_raw(width as u32, height as u32, pixel_data)
    }
}

impl ImageLoader for DicomImageLoader {
    async fn open(&self, file_id: &str) -> Result<ImageRef, LoadError> {
        let object = match self.cached(file_id) {
            Some(object) => object,
            None => {
                let path = self.path_for(file_id);
                if !path.is_file() {
                    return Err(LoadError::MissingFile(file_id.to_owned()));
                }
                let object = tokio::task::spawn_blocking(move || open_file(path)).await??;
                let object = Arc::new(object);
                self.remember(file_id, Arc::clone(&object));
                object
            }
        };
        let frames = Self::frame_count(&object);
        info!(file_id, frames, "opened DICOM image");
        Ok(ImageRef {
            file_id: file_id.to_owned(),
            frames,
        })
    }

    async fn load_frame(&self, image: &ImageRef, frame: usize) -> Result<FrameImage, LoadError> {
        if frame >= image.frames {
            return Err(LoadError::FrameOutOfRange {
                frame,
                frames: image.frames,
            });
        }
        let object = self
            .cached(&image.file_id)
            .ok_or_else(|| LoadError::NotOpened(image.file_id.clone()))?;
        let pixels =
            tokio::task::spawn_blocking(move || Self::decode_frame(&object, frame)).await??;
        debug!(
            file_id = %image.file_id,
            frame,
            width = pixels.width(),
            height = pixels.height(),
            "decoded frame"
        );
        Ok(FrameImage { frame, pixels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn slice_is_scaled_to_8_bit() {
        let data = Array2::from_shape_vec((2, 3), vec![0u16, 65535, 32768, 0, 0, 65535]).unwrap();
        let image = DicomImageLoader::slice_to_image(&data.view()).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
        assert_eq!(image.get_pixel(1, 0).0[0], 255);
        assert_eq!(image.get_pixel(2, 0).0[0], 127);
        assert_eq!(image.get_pixel(2, 1).0[0], 255);
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let loader = DicomImageLoader::new(std::env::temp_dir().join("no-such-dicom-dir"));
        let err = loader.open("absent").await.unwrap_err();
        assert!(matches!(err, LoadError::MissingFile(id) if id == "absent"));
    }

    #[tokio::test]
    async fn frame_bounds_are_checked_before_decoding() {
        let loader = DicomImageLoader::new(std::env::temp_dir());
        let image = ImageRef {
            file_id: "unopened".into(),
            frames: 3,
        };
        assert!(matches!(
            loader.load_frame(&image, 3).await,
            Err(LoadError::FrameOutOfRange { frame: 3, frames: 3 })
        ));
        assert!(matches!(
            loader.load_frame(&image, 1).await,
            Err(LoadError::NotOpened(_))
        ));
    }
}
