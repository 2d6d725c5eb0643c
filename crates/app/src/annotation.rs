//! Detection overlays and JPEG encoding on the original frame.

use anyhow::{anyhow, Result};
use frame_source::Frame;
use image::codecs::jpeg::JpegEncoder;
use infer_core::Detection;

pub const JPEG_QUALITY: u8 = 95;

/// Rectangle color in the frame's BGR layout (red).
const BOX_COLOR: [u8; 3] = [0, 0, 255];

/// Outline every detection on the frame.
///
/// Normalized corners scale by the frame dimensions; drawing happens on the
/// original frame, never the resized inference copy.
pub fn annotate(frame: &mut Frame, detections: &[Detection]) {
    let width = frame.width as f32;
    let height = frame.height as f32;
    for detection in detections {
        let [x0, y0, x1, y1] = detection.bbox;
        draw_rectangle(
            frame,
            (x0 * width) as i32,
            (y0 * height) as i32,
            (x1 * width) as i32,
            (y1 * height) as i32,
        );
    }
}

/// Encode the frame as JPEG at the streaming quality.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let rgb = frame.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_rectangle(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32) {
    let width = frame.width as i32;
    let height = frame.height as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        put_pixel(frame, x, top);
        put_pixel(frame, x, bottom);
    }
    for y in top..=bottom {
        put_pixel(frame, left, y);
        put_pixel(frame, right, y);
    }
}

fn put_pixel(frame: &mut Frame, x: i32, y: i32) {
    let offset = (y as usize * frame.width as usize + x as usize) * 3;
    if let Some(pixel) = frame.data.get_mut(offset..offset + 3) {
        pixel.copy_from_slice(&BOX_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_source::Frame;
    use image::{Rgb, RgbImage};

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb8(RgbImage::from_pixel(width, height, Rgb([128, 128, 128])))
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * frame.width as usize + x as usize) * 3;
        [
            frame.data[offset],
            frame.data[offset + 1],
            frame.data[offset + 2],
        ]
    }

    #[test]
    fn rectangle_corners_scale_to_frame_pixels() {
        let mut frame = gray_frame(640, 480);
        annotate(
            &mut frame,
            &[Detection {
                score: 0.95,
                bbox: [0.1, 0.2, 0.3, 0.4],
            }],
        );

        // (0.1, 0.2)-(0.3, 0.4) on 640x480 lands on (64, 96)-(192, 192).
        assert_eq!(pixel(&frame, 64, 96), BOX_COLOR);
        assert_eq!(pixel(&frame, 192, 192), BOX_COLOR);
        assert_eq!(pixel(&frame, 128, 96), BOX_COLOR);
        assert_eq!(pixel(&frame, 64, 144), BOX_COLOR);
    }

    #[test]
    fn pixels_outside_the_outline_are_preserved() {
        let mut frame = gray_frame(640, 480);
        annotate(
            &mut frame,
            &[Detection {
                score: 0.95,
                bbox: [0.1, 0.2, 0.3, 0.4],
            }],
        );

        assert_eq!(pixel(&frame, 0, 0), [128, 128, 128]);
        // Interior of the box stays untouched as well.
        assert_eq!(pixel(&frame, 128, 144), [128, 128, 128]);
    }

    #[test]
    fn out_of_range_boxes_clamp_to_the_frame() {
        let mut frame = gray_frame(16, 16);
        annotate(
            &mut frame,
            &[Detection {
                score: 0.99,
                bbox: [-0.5, -0.5, 1.5, 1.5],
            }],
        );
        assert_eq!(pixel(&frame, 0, 0), BOX_COLOR);
        assert_eq!(pixel(&frame, 15, 15), BOX_COLOR);
    }

    #[test]
    fn empty_detections_leave_the_frame_unmodified() {
        let mut frame = gray_frame(8, 8);
        let before = frame.data.clone();
        annotate(&mut frame, &[]);
        assert_eq!(frame.data, before);
    }

    #[test]
    fn encoded_jpeg_decodes_to_the_same_dimensions() {
        let frame = gray_frame(32, 24);
        let jpeg = encode_jpeg(&frame).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 24));
        // Lossy round trip: a uniform frame stays close to its shade.
        let sample = decoded.get_pixel(16, 12);
        assert!((i16::from(sample[0]) - 128).abs() < 8);
    }
}
