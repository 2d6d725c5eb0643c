use std::sync::Arc;

use crate::buffer::{read_f32, write_f32, BufferManager};
use crate::detection::{nms, threshold_pass, Detection, IOU_THRESHOLD};
use crate::engine::{EngineError, InferenceEngine};

/// Per-session execution context.
///
/// Owns one buffer set; the engine itself is shared and immutable. A context
/// is exclusively owned by a single connection and never crosses sessions.
pub struct InferenceContext {
    engine: Arc<InferenceEngine>,
    buffers: BufferManager,
}

impl InferenceContext {
    pub(crate) fn new(engine: Arc<InferenceEngine>, buffers: BufferManager) -> Self {
        Self { engine, buffers }
    }

    /// Width the input frames must be resized to before [`Self::infer`].
    pub fn input_width(&self) -> u32 {
        self.engine.input_width()
    }

    /// Height the input frames must be resized to before [`Self::infer`].
    pub fn input_height(&self) -> u32 {
        self.engine.input_height()
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// Run the detector over a batch of packed BGR images already resized to
    /// the engine input size, appending surviving detections to `detections`.
    ///
    /// A failure at any stage fails the whole frame; the output may then be
    /// partially written and should be discarded by the caller.
    pub fn infer(
        &mut self,
        batch: &[&[u8]],
        detections: &mut Vec<Detection>,
    ) -> Result<(), EngineError> {
        self.preprocess(batch)?;
        self.buffers.copy_input_to_device();
        self.engine.execute(&mut self.buffers)?;
        self.buffers.copy_output_to_host();
        self.postprocess(detections);
        Ok(())
    }

    /// Normalize the batch into the host input buffer.
    fn preprocess(&mut self, batch: &[&[u8]]) -> Result<(), EngineError> {
        let dims = self.engine.input_dims();
        let batch_capacity = dims[0].max(0) as usize;
        let channels = dims[1].max(0) as usize;
        let height = dims[2].max(0) as usize;
        let width = dims[3].max(0) as usize;

        if batch.is_empty() || batch.len() > batch_capacity {
            return Err(EngineError::Input(format!(
                "batch of {} images, engine accepts 1..={batch_capacity}",
                batch.len()
            )));
        }

        let params = self.engine.params();
        let mut values = vec![0.0f32; batch.len() * channels * height * width];
        write_planar_input(
            &mut values,
            batch,
            channels,
            height,
            width,
            &params.preprocessing_means,
            params.preprocessing_norm,
        )?;

        let input_name = params
            .input_tensor_names
            .first()
            .ok_or_else(|| EngineError::Input("no input tensor configured".into()))?
            .clone();
        let host = self
            .buffers
            .host_buffer_mut(&input_name)
            .ok_or_else(|| EngineError::Input(format!("no binding named {input_name:?}")))?;
        write_f32(&mut host[..values.len() * 4], &values);
        Ok(())
    }

    /// Threshold the score tensor and suppress overlapping boxes.
    ///
    /// Never fails; missing buffers simply yield no detections.
    fn postprocess(&self, detections: &mut Vec<Detection>) {
        let params = self.engine.params();
        let Some(scores_name) = params.output_tensor_names.first() else {
            return;
        };
        let Some(boxes_name) = params.output_tensor_names.get(1) else {
            return;
        };
        let scores = self.buffers.host_buffer(scores_name).map(read_f32).unwrap_or_default();
        let boxes = self.buffers.host_buffer(boxes_name).map(read_f32).unwrap_or_default();

        let candidates = threshold_pass(
            &scores,
            &boxes,
            self.engine.prior_count(),
            self.engine.class_count(),
            params.detection_class,
            params.detection_threshold,
        );
        nms(candidates, IOU_THRESHOLD, detections);
    }
}

/// Write the batch into `dst` in planar CHW order, batch-major.
///
/// Each image is packed BGR (`height * width * channels` bytes); the value at
/// `image * C*H*W + c * H*W + y * W + x` becomes
/// `(pixel(y, x)[c] - means[c]) / norm`.
pub(crate) fn write_planar_input(
    dst: &mut [f32],
    batch: &[&[u8]],
    channels: usize,
    height: usize,
    width: usize,
    means: &[f32; 3],
    norm: f32,
) -> Result<(), EngineError> {
    let vol_chl = height * width;
    let vol_img = channels * vol_chl;

    for (i, image) in batch.iter().enumerate() {
        if image.len() != vol_img {
            return Err(EngineError::Input(format!(
                "image {i} holds {} bytes, expected {vol_img} for {width}x{height}x{channels}",
                image.len()
            )));
        }
        for c in 0..channels {
            let mean = means.get(c).copied().unwrap_or_default();
            for j in 0..vol_chl {
                dst[i * vol_img + c * vol_chl + j] =
                    (f32::from(image[j * channels + c]) - mean) / norm;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_layout_and_normalization() {
        // 2x2 BGR image with distinct channel values per pixel.
        let image: Vec<u8> = vec![
            10, 20, 30, // (0,0)
            40, 50, 60, // (0,1)
            70, 80, 90, // (1,0)
            100, 110, 120, // (1,1)
        ];
        let mut dst = vec![0.0f32; 12];
        write_planar_input(&mut dst, &[&image], 3, 2, 2, &[127.0, 127.0, 127.0], 128.0).unwrap();

        // Channel 0 (blue) plane comes first, in row-major pixel order.
        assert_eq!(dst[0], (10.0 - 127.0) / 128.0);
        assert_eq!(dst[1], (40.0 - 127.0) / 128.0);
        assert_eq!(dst[2], (70.0 - 127.0) / 128.0);
        assert_eq!(dst[3], (100.0 - 127.0) / 128.0);
        // Channel 1 (green) plane.
        assert_eq!(dst[4], (20.0 - 127.0) / 128.0);
        // Channel 2 (red) plane, last pixel.
        assert_eq!(dst[11], (120.0 - 127.0) / 128.0);
    }

    #[test]
    fn normalization_boundary_values() {
        let image: Vec<u8> = vec![255, 0, 127];
        let mut dst = vec![0.0f32; 3];
        write_planar_input(&mut dst, &[&image], 3, 1, 1, &[127.0, 127.0, 127.0], 128.0).unwrap();
        assert_eq!(dst[0], 1.0);
        assert_eq!(dst[1], -0.9921875);
        assert_eq!(dst[2], 0.0);
    }

    #[test]
    fn wrong_image_size_is_rejected() {
        let image: Vec<u8> = vec![0; 5];
        let mut dst = vec![0.0f32; 12];
        let result =
            write_planar_input(&mut dst, &[&image], 3, 2, 2, &[127.0, 127.0, 127.0], 128.0);
        assert!(result.is_err());
    }
}
