use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// Classifier input tensor [1, 3, size, size], RGB, normalized to [-1, 1]
pub fn to_tensor(crop: &RgbImage, input_size: u32) -> Result<Array4<f32>> {
    let resized;
    let face = if crop.dimensions() == (input_size, input_size) {
        crop
    } else {
        resized = image::imageops::resize(
            crop,
            input_size,
            input_size,
            image::imageops::FilterType::Triangle,
        );
        &resized
    };

    let side = input_size as usize;
    let pixel_count = side * side;
    let mut input_data = vec![0.0f32; 3 * pixel_count];
    let (r_channel, rest) = input_data.split_at_mut(pixel_count);
    let (g_channel, b_channel) = rest.split_at_mut(pixel_count);

    // (px / 255 - 0.5) / 0.5
    let pixels = face.as_raw();
    for i in 0..pixel_count {
        let idx = i * 3;
        r_channel[i] = pixels[idx] as f32 / 127.5 - 1.0;
        g_channel[i] = pixels[idx + 1] as f32 / 127.5 - 1.0;
        b_channel[i] = pixels[idx + 2] as f32 / 127.5 - 1.0;
    }

    Ok(Array4::from_shape_vec((1, 3, side, side), input_data)?)
}

/// Run the classifier on an aligned crop and return the raw class logits
pub fn logits(session: &mut Session, crop: &RgbImage, input_size: u32) -> Result<Vec<f32>> {
    let input_tensor = Value::from_array(to_tensor(crop, input_size)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .context("extracting classifier logits")?;

    // Expecting shape [1, num_classes]
    let num_classes = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if data.len() < num_classes {
        anyhow::bail!("classifier output shape {:?} does not match its data", shape);
    }

    Ok(data[0..num_classes].to_vec())
}

/// Normalized exponential over raw logits
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// The `k` most probable classes as `(index, probability)`, highest first.
///
/// Equal probabilities keep the lower index first. Returns fewer than `k`
/// entries when there are fewer classes.
pub fn top_k(probabilities: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}
