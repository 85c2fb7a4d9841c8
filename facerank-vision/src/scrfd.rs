//! SCRFD detector post-processing
//!
//! SCRFD (InsightFace `det_10g`) is anchor-based with two anchors per grid
//! location. For each stride (8, 16, 32) it outputs:
//! - score: [1, H*W*2, 1] - face probability (already sigmoid-activated)
//! - bbox: [1, H*W*2, 4] - distances (left, top, right, bottom) in stride units
//! - kps: [1, H*W*2, 10] - landmark offsets (5 points x 2 coords) in stride units
//!
//! Output order: score_8, score_16, score_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32
//!
//! Decoding relative to the anchor center (cx, cy) = (x * stride, y * stride):
//! x1 = cx - l * stride, y1 = cy - t * stride
//! x2 = cx + r * stride, y2 = cy + b * stride
//! kps_x = cx + dx * stride, kps_y = cy + dy * stride

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];
pub const NUM_ANCHORS: usize = 2;
const KPS: usize = 5;

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x1, y1, x2, y2 in detector input pixels
    pub score: f32,
    pub landmarks: [[f32; 2]; KPS],
}

/// Per-stride tensors, indexed like `STRIDES`
#[derive(Debug)]
pub struct ScrfdOutputs {
    pub scores: Vec<Array2<f32>>,
    pub bboxes: Vec<Array2<f32>>,
    pub kps: Vec<Array2<f32>>,
}

/// Anchor centers for one stride, `NUM_ANCHORS` consecutive rows per grid cell
pub fn anchor_centers(input_size: usize, stride: usize) -> Array2<f32> {
    let feature_size = input_size / stride;
    let n = feature_size * feature_size * NUM_ANCHORS;
    Array2::from_shape_fn((n, 2), |(row, coord)| {
        let cell = row / NUM_ANCHORS;
        let grid = if coord == 0 {
            cell % feature_size
        } else {
            cell / feature_size
        };
        (grid * stride) as f32
    })
}

fn expected_rows(input_size: usize, stride: usize) -> usize {
    let feature_size = input_size / stride;
    feature_size * feature_size * NUM_ANCHORS
}

/// Check one output's shape: accepts both `[N, C]` and batched `[1, N, C]`
fn to_rows(
    kind: &str,
    index: usize,
    output: Option<&(&[i64], &[f32])>,
    rows: usize,
    cols: usize,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = output else {
        anyhow::bail!("Missing {} output at index {}", kind, index);
    };

    let ok = match shape.len() {
        2 => shape[0] as usize == rows && shape[1] as usize == cols,
        3 => shape[0] == 1 && shape[1] as usize == rows && shape[2] as usize == cols,
        _ => false,
    };
    if !ok {
        anyhow::bail!(
            "Unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
            kind,
            index,
            shape,
            rows,
            cols
        );
    }

    Ok(Array2::from_shape_vec((rows, cols), data.to_vec())?)
}

/// Parse the nine raw SCRFD outputs into per-stride tensors
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<ScrfdOutputs> {
    let fmc = STRIDES.len();
    if outputs.len() != fmc * 3 {
        anyhow::bail!(
            "Unsupported SCRFD variant: expected {} outputs, got {}",
            fmc * 3,
            outputs.len()
        );
    }

    let mut parsed = ScrfdOutputs {
        scores: Vec::with_capacity(fmc),
        bboxes: Vec::with_capacity(fmc),
        kps: Vec::with_capacity(fmc),
    };

    for (idx, &stride) in STRIDES.iter().enumerate() {
        let rows = expected_rows(input_size, stride);
        parsed
            .scores
            .push(to_rows("score", idx, outputs.get(idx), rows, 1)?);
        parsed
            .bboxes
            .push(to_rows("bbox", idx + fmc, outputs.get(idx + fmc), rows, 4)?);
        parsed
            .kps
            .push(to_rows("kps", idx + 2 * fmc, outputs.get(idx + 2 * fmc), rows, 2 * KPS)?);
    }

    Ok(parsed)
}

/// Decode every anchor whose score passes `score_threshold`
pub fn decode_detections(
    outputs: &ScrfdOutputs,
    score_threshold: f32,
    input_size: usize,
) -> Vec<RawDetection> {
    let mut detections = Vec::new();

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let scores = &outputs.scores[scale_idx];
        let bboxes = &outputs.bboxes[scale_idx];
        let kps = &outputs.kps[scale_idx];
        let centers = anchor_centers(input_size, stride);
        let s = stride as f32;

        for idx in 0..centers.nrows() {
            let score = scores[[idx, 0]];
            if score < score_threshold {
                continue;
            }

            let cx = centers[[idx, 0]];
            let cy = centers[[idx, 1]];

            let bbox = [
                cx - bboxes[[idx, 0]] * s,
                cy - bboxes[[idx, 1]] * s,
                cx + bboxes[[idx, 2]] * s,
                cy + bboxes[[idx, 3]] * s,
            ];

            let mut landmarks = [[0.0f32; 2]; KPS];
            for (k, point) in landmarks.iter_mut().enumerate() {
                point[0] = cx + kps[[idx, k * 2]] * s;
                point[1] = cy + kps[[idx, k * 2 + 1]] * s;
            }

            detections.push(RawDetection {
                bbox,
                score,
                landmarks,
            });
        }
    }

    detections
}
