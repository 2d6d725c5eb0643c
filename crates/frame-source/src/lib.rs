//! Frame acquisition for the streaming pipeline.
//!
//! A [`FrameSource`] is a finite, non-restartable sequence of decoded frames.
//! Sources are resolved per request through the [`SourceRegistry`], which maps
//! a type tag from the URI to a factory.

pub use filesystem::FilesystemSource;

mod filesystem;

use std::collections::HashMap;
use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to enumerate frames under {dir:?}")]
    Enumerate {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no frame source registered for type {0:?}")]
    UnknownType(String),
}

/// Supported pixel layouts for decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Packed BGR, 3 bytes per pixel.
    Bgr8,
}

/// One decoded frame in packed BGR layout.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl Frame {
    /// Wrap a decoded RGB image, swizzling into the BGR layout the detector
    /// preprocessing expects.
    pub fn from_rgb8(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = image.into_raw();
        for pixel in data.chunks_exact_mut(3) {
            pixel.swap(0, 2);
        }
        Self {
            data,
            width,
            height,
            format: FrameFormat::Bgr8,
        }
    }

    /// Copy of the frame in RGB order, for encoders that expect it.
    pub fn to_rgb8(&self) -> RgbImage {
        let mut data = self.data.clone();
        for pixel in data.chunks_exact_mut(3) {
            pixel.swap(0, 2);
        }
        RgbImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Resized copy at `(width, height)` with triangle filtering.
    ///
    /// Resampling is per-channel, so the buffer stays in BGR order.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let Some(buffer) =
            ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
        else {
            // Construction keeps data.len() == width * height * 3; a mismatch
            // only means the frame is already unusable.
            return self.clone();
        };
        let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
        Frame {
            data: resized.into_raw(),
            width,
            height,
            format: self.format,
        }
    }
}

/// Sequential reader over a finite frame sequence.
pub trait FrameSource: Send {
    /// True once the cursor has passed the last frame.
    fn is_finished(&self) -> bool;

    /// Decode and return the next frame, advancing the cursor. `None` marks
    /// a missing frame (unreadable or empty); the caller skips it and
    /// continues.
    fn read_next(&mut self) -> Option<Frame>;
}

/// Source construction inputs extracted from the request URI.
pub struct SourceRequest<'a> {
    /// Path segments after the source-type tag.
    pub segments: &'a [String],
    /// Query parameters, in request order.
    pub options: &'a [(String, String)],
}

type SourceFactory =
    Box<dyn Fn(&SourceRequest<'_>) -> Result<Box<dyn FrameSource>, SourceError> + Send + Sync>;

/// Maps source-type tags to factories.
pub struct SourceRegistry {
    routes: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// Registry with the default `filesystem` route rooted at `base_dir`.
    ///
    /// The filesystem factory appends the request's path segments to the
    /// base directory and honors an optional `ext` parameter (default `jpg`).
    pub fn with_defaults(base_dir: PathBuf) -> Self {
        let mut registry = Self {
            routes: HashMap::new(),
        };
        registry.register("filesystem", move |request: &SourceRequest| {
            let mut dir = base_dir.clone();
            for segment in request.segments {
                dir.push(segment);
            }
            let extension = request
                .options
                .iter()
                .find(|(key, _)| key == "ext")
                .map(|(_, value)| format!(".{value}"))
                .unwrap_or_else(|| ".jpg".to_string());
            let source = FilesystemSource::new(dir, &extension)?;
            Ok(Box::new(source) as Box<dyn FrameSource>)
        });
        registry
    }

    pub fn register(
        &mut self,
        tag: &str,
        factory: impl Fn(&SourceRequest<'_>) -> Result<Box<dyn FrameSource>, SourceError>
            + Send
            + Sync
            + 'static,
    ) {
        self.routes.insert(tag.to_string(), Box::new(factory));
    }

    /// Build a source for `tag`, or [`SourceError::UnknownType`] when no
    /// factory is registered.
    pub fn create(
        &self,
        tag: &str,
        request: &SourceRequest<'_>,
    ) -> Result<Box<dyn FrameSource>, SourceError> {
        match self.routes.get(tag) {
            Some(factory) => factory(request),
            None => Err(SourceError::UnknownType(tag.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_bgr_round_trip() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([10, 20, 30]));
        image.put_pixel(1, 0, Rgb([40, 50, 60]));

        let frame = Frame::from_rgb8(image.clone());
        assert_eq!(&frame.data[..3], &[30, 20, 10]);
        assert_eq!(frame.to_rgb8(), image);
    }

    #[test]
    fn resize_changes_dimensions_and_keeps_layout() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 100, 50]));
        let frame = Frame::from_rgb8(image);
        let resized = frame.resized(2, 2);
        assert_eq!((resized.width, resized.height), (2, 2));
        assert_eq!(resized.data.len(), 2 * 2 * 3);
        // Uniform image: every resampled pixel keeps the same BGR triple.
        assert_eq!(&resized.data[..3], &[50, 100, 200]);
    }

    #[test]
    fn unknown_source_type_is_reported() {
        let registry = SourceRegistry::with_defaults(PathBuf::from("."));
        let request = SourceRequest {
            segments: &[],
            options: &[],
        };
        assert!(matches!(
            registry.create("rtsp", &request),
            Err(SourceError::UnknownType(_))
        ));
    }
}
