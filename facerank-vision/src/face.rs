use crate::scrfd::{self, RawDetection};
use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// Five facial keypoints: left eye, right eye, nose, left mouth, right mouth
pub type Landmarks = [[f32; 2]; 5];

/// Detection result from SCRFD, in source image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: Landmarks,
}

/// Detect faces in an image using the SCRFD detector
///
/// Results are ordered by descending score.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    det_size: u32,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (orig_width, orig_height) = img.dimensions();
    if orig_width == 0 || orig_height == 0 {
        anyhow::bail!("image is empty");
    }

    let (new_width, new_height, scale) = letterbox_geometry(orig_width, orig_height, det_size);
    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);
    let mut canvas = image::DynamicImage::new_rgb8(det_size, det_size);
    image::imageops::overlay(&mut canvas, &resized, 0, 0);
    let img_rgb = canvas.to_rgb8();

    // SCRFD expects [1, 3, H, W] RGB normalized as (px - 127.5) / 128
    let side = det_size as usize;
    let pixel_count = side * side;
    let mut input_data = vec![0.0f32; 3 * pixel_count];
    let (r_channel, rest) = input_data.split_at_mut(pixel_count);
    let (g_channel, b_channel) = rest.split_at_mut(pixel_count);

    let pixels = img_rgb.as_raw();
    for i in 0..pixel_count {
        let idx = i * 3;
        r_channel[i] = (pixels[idx] as f32 - 127.5) / 128.0;
        g_channel[i] = (pixels[idx + 1] as f32 - 127.5) / 128.0;
        b_channel[i] = (pixels[idx + 2] as f32 - 127.5) / 128.0;
    }

    let input_array = Array4::from_shape_vec((1, 3, side, side), input_data)?;
    let input_tensor = Value::from_array(input_array)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let parsed = scrfd::parse_outputs(&output_refs, side)?;
    let raw_detections = scrfd::decode_detections(&parsed, score_threshold, side);
    log::debug!(
        "scrfd: {} candidate(s) above {:.2}",
        raw_detections.len(),
        score_threshold
    );

    let detections: Vec<Detection> = raw_detections
        .into_iter()
        .map(|d| rescale(d, scale))
        .collect();

    Ok(nms(&detections, nms_threshold))
}

/// Size of the image inside the square detector canvas, and the factor from
/// source pixels to canvas pixels
///
/// The long side fills `det_size`, the image sits in the top-left corner.
pub fn letterbox_geometry(width: u32, height: u32, det_size: u32) -> (u32, u32, f32) {
    let (new_width, new_height) = if height > width {
        let w = (det_size as u64 * width as u64 / height as u64) as u32;
        (w.max(1), det_size)
    } else {
        let h = (det_size as u64 * height as u64 / width as u64) as u32;
        (det_size, h.max(1))
    };
    (new_width, new_height, new_height as f32 / height as f32)
}

/// Map a detector-space detection back to source pixels, bbox as x, y, w, h
pub fn rescale(raw: RawDetection, scale: f32) -> Detection {
    let [x1, y1, x2, y2] = raw.bbox.map(|v| v / scale);
    Detection {
        bbox: [x1, y1, x2 - x1, y2 - y1],
        score: raw.score,
        landmarks: raw.landmarks.map(|[x, y]| [x / scale, y / scale]),
    }
}

/// Apply non-maximum suppression to remove overlapping detections
///
/// Survivors come out in descending score order; equal scores keep their
/// input order.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return vec![];
    }

    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(sorted[i].clone());

        for j in (i + 1)..sorted.len() {
            if suppressed[j] {
                continue;
            }
            let iou = compute_iou(&sorted[i].bbox, &sorted[j].bbox);
            if iou > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// IoU with inclusive pixel extents, so touching boxes overlap by one pixel
fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    let inter = (x2 - x1 + 1.0).max(0.0) * (y2 - y1 + 1.0).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }

    let area_a = (a[2] + 1.0) * (a[3] + 1.0);
    let area_b = (b[2] + 1.0) * (b[3] + 1.0);
    inter / (area_a + area_b - inter)
}

/// Highest-scoring detection; the first one wins a tie
pub fn select_best(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best, d| match best {
        Some(b) if b.score >= d.score => Some(b),
        _ => Some(d),
    })
}
