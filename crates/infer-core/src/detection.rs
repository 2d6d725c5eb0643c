use std::cmp::Ordering;

/// IoU above which two boxes are considered the same face.
pub const IOU_THRESHOLD: f32 = 0.5;

/// Single detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Confidence score in `[0, 1]`.
    pub score: f32,
    /// Bounding box stored as `[x0, y0, x1, y1]`, normalized to the original
    /// frame. Boxes with non-positive area are invalid.
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]) * (self.bbox[3] - self.bbox[1])
    }
}

/// IoU (intersection over union) of two boxes.
///
/// Each intersection extent clamps at zero so that disjoint boxes never
/// produce a positive area out of two negative extents.
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix0 = a.bbox[0].max(b.bbox[0]);
    let iy0 = a.bbox[1].max(b.bbox[1]);
    let ix1 = a.bbox[2].min(b.bbox[2]);
    let iy1 = a.bbox[3].min(b.bbox[3]);

    let intersection = (ix1 - ix0).max(0.0) * (iy1 - iy0).max(0.0);
    if intersection <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - intersection;
    intersection / union
}

/// Collect every prior whose target-class score exceeds `threshold`.
///
/// `scores` is `[prior_count, class_count]` row-major, `boxes` is
/// `[prior_count, 4]` row-major with the same corner layout as [`Detection`].
pub fn threshold_pass(
    scores: &[f32],
    boxes: &[f32],
    prior_count: usize,
    class_count: usize,
    class_index: usize,
    threshold: f32,
) -> Vec<Detection> {
    let mut candidates = Vec::new();
    for i in 0..prior_count {
        let Some(&score) = scores.get(i * class_count + class_index) else {
            break;
        };
        if score <= threshold {
            continue;
        }
        let offset = i * 4;
        if boxes.len() < offset + 4 {
            break;
        }
        candidates.push(Detection {
            score,
            bbox: [
                boxes[offset],
                boxes[offset + 1],
                boxes[offset + 2],
                boxes[offset + 3],
            ],
        });
    }
    candidates
}

/// Greedy non-maximum suppression, appending survivors to `out`.
///
/// The candidate with the highest score is kept and every weaker candidate
/// whose IoU with an already-kept box exceeds `iou_threshold` is discarded.
/// The sort is stable, so equal scores resolve by insertion order.
pub fn nms(mut candidates: Vec<Detection>, iou_threshold: f32, out: &mut Vec<Detection>) {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let start = out.len();
    for candidate in candidates {
        let suppressed = out[start..]
            .iter()
            .any(|kept| iou(kept, &candidate) > iou_threshold);
        if !suppressed {
            out.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(score: f32, bbox: [f32; 4]) -> Detection {
        Detection { score, bbox }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = detection(0.9, [0.1, 0.1, 0.5, 0.5]);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = detection(0.9, [0.0, 0.0, 0.2, 0.2]);
        let b = detection(0.8, [0.8, 0.8, 1.0, 1.0]);
        // Both extents are negative; without clamping their product would be
        // a spurious positive area.
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn threshold_pass_rejects_everything_below_threshold() {
        // Two classes, three priors, every face score at or below 0.9.
        let scores = [0.1, 0.89, 0.2, 0.9, 0.3, 0.5];
        let boxes = [0.0; 12];
        let detections = threshold_pass(&scores, &boxes, 3, 2, 1, 0.9);
        assert!(detections.is_empty());
    }

    #[test]
    fn threshold_pass_keeps_single_strong_detection() {
        let mut scores = vec![0.0f32; 10 * 2];
        scores[1] = 0.95;
        let mut boxes = vec![0.0f32; 10 * 4];
        boxes[..4].copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);

        let detections = threshold_pass(&scores, &boxes, 10, 2, 1, 0.9);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].score, 0.95);
        assert_eq!(detections[0].bbox, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn nms_collapses_heavily_overlapping_boxes() {
        let candidates = vec![
            detection(0.94, [0.0, 0.0, 0.9, 0.9]),
            detection(0.95, [0.0, 0.0, 1.0, 1.0]),
        ];
        // Intersection 0.81, union 1.0, IoU 0.81 > 0.5.
        let mut kept = Vec::new();
        nms(candidates, IOU_THRESHOLD, &mut kept);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.95);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let candidates = vec![
            detection(0.95, [0.0, 0.0, 0.4, 0.4]),
            detection(0.94, [0.6, 0.6, 1.0, 1.0]),
        ];
        let mut kept = Vec::new();
        nms(candidates, IOU_THRESHOLD, &mut kept);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn nms_is_idempotent() {
        let candidates = vec![
            detection(0.95, [0.0, 0.0, 0.4, 0.4]),
            detection(0.92, [0.5, 0.5, 0.8, 0.8]),
        ];
        let mut first = Vec::new();
        nms(candidates, IOU_THRESHOLD, &mut first);
        let mut second = Vec::new();
        nms(first.clone(), IOU_THRESHOLD, &mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn nms_resolves_score_ties_by_insertion_order() {
        let candidates = vec![
            detection(0.9, [0.0, 0.0, 0.5, 0.5]),
            detection(0.9, [0.01, 0.01, 0.5, 0.5]),
        ];
        let mut kept = Vec::new();
        nms(candidates, IOU_THRESHOLD, &mut kept);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox, [0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn nms_appends_after_existing_results() {
        let mut out = vec![detection(0.99, [0.0, 0.0, 1.0, 1.0])];
        nms(
            vec![detection(0.9, [0.0, 0.0, 1.0, 1.0])],
            IOU_THRESHOLD,
            &mut out,
        );
        // Earlier frames' detections do not suppress the new candidate set.
        assert_eq!(out.len(), 2);
    }
}
