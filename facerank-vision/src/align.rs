//! Landmark-based face alignment
//!
//! Fits a similarity transform (rotation, uniform scale, translation) from the
//! five detected landmarks onto the ArcFace reference layout, then resamples the
//! source image through it into a square crop.

use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::face::Landmarks;

/// Side length of the frame the reference template is defined in
pub const REFERENCE_SIZE: u32 = 112;

const REFERENCE_CENTER: f32 = 56.0;

/// ArcFace reference landmarks for a 112x112 crop:
/// left eye, right eye, nose, left mouth corner, right mouth corner
pub const ARCFACE_TEMPLATE: Landmarks = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

// Squared spread below which the landmarks are treated as a single point
const MIN_SPREAD: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("degenerate landmarks: {0}")]
    DegenerateLandmarks(&'static str),
    #[error("singular alignment transform (scale {0})")]
    SingularTransform(f64),
}

/// Reference template moved into the requested output frame.
///
/// `crop_scale` shrinks (< 1.0) or expands (> 1.0) the template around the
/// frame center before it is rescaled from 112 to `image_size`.
pub fn canonical_template(image_size: u32, crop_scale: f32) -> Landmarks {
    let mut dst = ARCFACE_TEMPLATE;

    if crop_scale != 1.0 {
        for p in dst.iter_mut() {
            p[0] = (p[0] - REFERENCE_CENTER) * crop_scale + REFERENCE_CENTER;
            p[1] = (p[1] - REFERENCE_CENTER) * crop_scale + REFERENCE_CENTER;
        }
    }

    if image_size != REFERENCE_SIZE {
        let ratio = image_size as f32 / REFERENCE_SIZE as f32;
        for p in dst.iter_mut() {
            p[0] *= ratio;
            p[1] *= ratio;
        }
    }

    dst
}

/// 2x3 affine matrix, `x' = m[0][0] * x + m[0][1] * y + m[0][2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub m: [[f64; 3]; 2],
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.m;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    pub fn determinant(&self) -> f64 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }

    /// Uniform scale factor; exact for similarity transforms
    pub fn scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    /// Rotation angle in radians; exact for similarity transforms
    pub fn rotation(&self) -> f64 {
        self.m[1][0].atan2(self.m[0][0])
    }

    pub fn inverse(&self) -> Result<Affine, AlignError> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < f64::EPSILON {
            return Err(AlignError::SingularTransform(det.abs().sqrt()));
        }

        let [[a, b, tx], [c, d, ty]] = self.m;
        let ia = d / det;
        let ib = -b / det;
        let ic = -c / det;
        let id = a / det;

        Ok(Affine {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }
}

/// Least-squares similarity transform between two 5-point sets
pub struct SimilarityTransform;

impl SimilarityTransform {
    /// Best-fit transform mapping `src` onto `dst` over all five pairs.
    ///
    /// With centered coordinates the 2D Umeyama solution reduces to
    /// `a = Σ(s·d) / Σ|s|²`, `b = Σ(s×d) / Σ|s|²` for the matrix
    /// `[[a, -b], [b, a]]`, translation taken from the means.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Result<Affine, AlignError> {
        if src.iter().chain(dst.iter()).flatten().any(|v| !v.is_finite()) {
            return Err(AlignError::DegenerateLandmarks("non-finite coordinate"));
        }

        let n = src.len() as f64;
        let mean = |pts: &Landmarks| {
            let (sx, sy) = pts
                .iter()
                .fold((0.0f64, 0.0f64), |(ax, ay), p| (ax + p[0] as f64, ay + p[1] as f64));
            (sx / n, sy / n)
        };
        let (src_mx, src_my) = mean(src);
        let (dst_mx, dst_my) = mean(dst);

        let mut spread = 0.0f64;
        let mut dot = 0.0f64;
        let mut cross = 0.0f64;
        for (s, d) in src.iter().zip(dst.iter()) {
            let sx = s[0] as f64 - src_mx;
            let sy = s[1] as f64 - src_my;
            let dx = d[0] as f64 - dst_mx;
            let dy = d[1] as f64 - dst_my;

            spread += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }

        if spread < MIN_SPREAD {
            return Err(AlignError::DegenerateLandmarks("landmarks have no spatial spread"));
        }

        let a = dot / spread;
        let b = cross / spread;
        let scale = (a * a + b * b).sqrt();
        if !scale.is_finite() || scale < 1e-9 {
            return Err(AlignError::SingularTransform(scale));
        }

        let tx = dst_mx - (a * src_mx - b * src_my);
        let ty = dst_my - (b * src_mx + a * src_my);

        Ok(Affine {
            m: [[a, -b, tx], [b, a, ty]],
        })
    }
}

/// Resample `img` through `transform` into a `size` x `size` canvas.
///
/// Each output pixel is mapped back through the inverse transform and
/// bilinearly interpolated. Neighbours outside the source contribute black.
pub fn warp_affine(img: &RgbImage, transform: &Affine, size: u32) -> Result<RgbImage, AlignError> {
    let inverse = transform.inverse()?;
    let (img_w, img_h) = img.dimensions();
    let (w, h) = (img_w as i64, img_h as i64);
    let mut output = RgbImage::new(size, size);

    let texel = |x: i64, y: i64| -> [f64; 3] {
        if x < 0 || y < 0 || x >= w || y >= h {
            return [0.0; 3];
        }
        let p = img.get_pixel(x as u32, y as u32);
        [p[0] as f64, p[1] as f64, p[2] as f64]
    };

    for out_y in 0..size {
        for out_x in 0..size {
            let (in_x, in_y) = inverse.apply(out_x as f64, out_y as f64);

            // Entirely outside, even the interpolation footprint
            if in_x <= -1.0 || in_y <= -1.0 || in_x >= img_w as f64 || in_y >= img_h as f64 {
                continue;
            }

            let x0 = in_x.floor();
            let y0 = in_y.floor();
            let fx = in_x - x0;
            let fy = in_y - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let p00 = texel(x0, y0);
            let p10 = texel(x0 + 1, y0);
            let p01 = texel(x0, y0 + 1);
            let p11 = texel(x0 + 1, y0 + 1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut rgb = [0u8; 3];
            for (c, v) in rgb.iter_mut().enumerate() {
                let value = p00[c] * w00 + p10[c] * w10 + p01[c] * w01 + p11[c] * w11;
                *v = value.round().clamp(0.0, 255.0) as u8;
            }

            output.put_pixel(out_x, out_y, Rgb(rgb));
        }
    }

    Ok(output)
}

/// Align a face onto the canonical template and crop it to `image_size`
pub fn norm_crop(
    img: &RgbImage,
    landmarks: &Landmarks,
    image_size: u32,
    crop_scale: f32,
) -> Result<RgbImage, AlignError> {
    let dst = canonical_template(image_size, crop_scale);
    let transform = SimilarityTransform::estimate(landmarks, &dst)?;
    log::debug!(
        "alignment transform: scale={:.4} rotation={:.4}rad",
        transform.scale(),
        transform.rotation()
    );
    warp_affine(img, &transform, image_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotate_scale_translate(pts: &Landmarks, angle: f32, scale: f32, t: (f32, f32)) -> Landmarks {
        let (sin, cos) = angle.sin_cos();
        pts.map(|[x, y]| {
            [
                scale * (cos * x - sin * y) + t.0,
                scale * (sin * x + cos * y) + t.1,
            ]
        })
    }

    #[test]
    fn test_template_unchanged_at_reference() {
        assert_eq!(canonical_template(112, 1.0), ARCFACE_TEMPLATE);
    }

    #[test]
    fn test_template_scaling() {
        let t = canonical_template(224, 1.0);
        for (p, r) in t.iter().zip(ARCFACE_TEMPLATE.iter()) {
            assert!((p[0] - r[0] * 2.0).abs() < 1e-4);
            assert!((p[1] - r[1] * 2.0).abs() < 1e-4);
        }

        // crop_scale pulls points toward (56, 56) before the resize
        let t = canonical_template(112, 0.5);
        let nose = ARCFACE_TEMPLATE[2];
        assert!((t[2][0] - ((nose[0] - 56.0) * 0.5 + 56.0)).abs() < 1e-4);
        assert!((t[2][1] - ((nose[1] - 56.0) * 0.5 + 56.0)).abs() < 1e-4);
    }

    #[test]
    fn test_estimate_identity() {
        let dst = canonical_template(224, 1.0);
        let m = SimilarityTransform::estimate(&dst, &dst).unwrap();
        let expected = Affine::IDENTITY;
        for r in 0..2 {
            for c in 0..3 {
                assert!((m.m[r][c] - expected.m[r][c]).abs() < 1e-4, "{:?}", m);
            }
        }
    }

    #[test]
    fn test_estimate_recovers_similarity() {
        let dst = ARCFACE_TEMPLATE;
        // Landmarks as a detector would see them: rotated 20°, half size, shifted
        let src = rotate_scale_translate(&dst, 20f32.to_radians(), 0.5, (300.0, 150.0));

        let m = SimilarityTransform::estimate(&src, &dst).unwrap();
        assert!((m.scale() - 2.0).abs() < 1e-3);
        assert!((m.rotation() + 20f64.to_radians()).abs() < 1e-3);

        for (s, d) in src.iter().zip(dst.iter()) {
            let (x, y) = m.apply(s[0] as f64, s[1] as f64);
            assert!((x - d[0] as f64).abs() < 1e-2);
            assert!((y - d[1] as f64).abs() < 1e-2);
        }
    }

    #[test]
    fn test_estimate_is_least_squares() {
        // Perturbing one point must not make the fit worse than the unperturbed transform
        let dst = ARCFACE_TEMPLATE;
        let mut src = dst;
        src[2][0] += 4.0;

        let fitted = SimilarityTransform::estimate(&src, &dst).unwrap();
        let residual = |m: &Affine| -> f64 {
            src.iter()
                .zip(dst.iter())
                .map(|(s, d)| {
                    let (x, y) = m.apply(s[0] as f64, s[1] as f64);
                    (x - d[0] as f64).powi(2) + (y - d[1] as f64).powi(2)
                })
                .sum()
        };
        assert!(residual(&fitted) < residual(&Affine::IDENTITY));
    }

    #[test]
    fn test_collinear_landmarks_are_solvable() {
        let src: Landmarks = [[0.0, 0.0], [10.0, 0.0], [20.0, 0.0], [30.0, 0.0], [40.0, 0.0]];
        let m = SimilarityTransform::estimate(&src, &ARCFACE_TEMPLATE).unwrap();
        assert!(m.scale() > 0.0);
    }

    #[test]
    fn test_degenerate_landmarks_rejected() {
        let src: Landmarks = [[50.0, 50.0]; 5];
        let err = SimilarityTransform::estimate(&src, &ARCFACE_TEMPLATE).unwrap_err();
        assert!(matches!(err, AlignError::DegenerateLandmarks(_)));

        let mut src = ARCFACE_TEMPLATE;
        src[0][0] = f32::NAN;
        let err = SimilarityTransform::estimate(&src, &ARCFACE_TEMPLATE).unwrap_err();
        assert!(matches!(err, AlignError::DegenerateLandmarks(_)));

        // Collapsing the template to a point leaves nothing to map onto
        let err = norm_crop(&RgbImage::new(10, 10), &ARCFACE_TEMPLATE, 112, 0.0).unwrap_err();
        assert!(matches!(err, AlignError::SingularTransform(_)));
    }

    #[test]
    fn test_inverse_round_trip() {
        let src = rotate_scale_translate(&ARCFACE_TEMPLATE, 0.3, 1.7, (12.0, -4.0));
        let m = SimilarityTransform::estimate(&src, &ARCFACE_TEMPLATE).unwrap();
        let inv = m.inverse().unwrap();
        let (x, y) = m.apply(17.0, 42.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 17.0).abs() < 1e-9);
        assert!((by - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_warp_identity_copies_pixels() {
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 7]));
        let out = warp_affine(&img, &Affine::IDENTITY, 8).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_warp_border_is_black() {
        let img = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let shift = Affine {
            m: [[1.0, 0.0, 10.0], [0.0, 1.0, 10.0]],
        };
        let out = warp_affine(&img, &shift, 16).unwrap();
        assert_eq!(out.dimensions(), (16, 16));
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(11, 11), Rgb([200, 200, 200]));
    }

    #[test]
    fn test_warp_half_pixel_interpolates() {
        let img = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([0, 0, 0]) } else { Rgb([100, 100, 100]) });
        let shift = Affine {
            m: [[1.0, 0.0, -0.5], [0.0, 1.0, 0.0]],
        };
        let out = warp_affine(&img, &shift, 1).unwrap();
        assert_eq!(*out.get_pixel(0, 0), Rgb([50, 50, 50]));
    }
}
