use std::path::PathBuf;

use anyhow::Context;
use image::DynamicImage;
use ort::session::Session;
use thiserror::Error;

use crate::align::{self, AlignError};
use crate::classify;
use crate::face::{self, Detection};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub detector_model: PathBuf,
    pub classifier_model: PathBuf,
    /// Square detector input side
    pub det_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Side of the aligned crop
    pub image_size: u32,
    /// Template margin factor, < 1.0 keeps more context around the face
    pub crop_scale: f32,
    pub classifier_input_size: u32,
}

/// Where a request failed, so each stage maps to its own response and log line
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No face detected")]
    NoFace,
    #[error("face detection failed: {0:#}")]
    Detection(anyhow::Error),
    #[error("face alignment failed: {0}")]
    Alignment(#[from] AlignError),
    #[error("classification failed: {0:#}")]
    Classification(anyhow::Error),
}

/// The face that was classified and the class probabilities
#[derive(Debug, Clone)]
pub struct Outcome {
    pub detection: Detection,
    pub probabilities: Vec<f32>,
}

/// Anything that turns a decoded image into class probabilities
pub trait FaceClassifier: Send {
    fn classify(&mut self, img: &DynamicImage) -> Result<Outcome, PipelineError>;
}

/// Full pipeline: detect faces → align → classify
pub struct Pipeline {
    pub detector: Session,
    pub classifier: Session,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> anyhow::Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(&options.detector_model)?,
            classifier: crate::model::classifier_session(&options.classifier_model)?,
            options,
        })
    }

    /// Process an image: classify the highest-scoring face
    pub fn process_image(&mut self, img: &DynamicImage) -> Result<Outcome, PipelineError> {
        let opts = &self.options;

        let detections = face::detect_faces(
            &mut self.detector,
            img,
            opts.det_size,
            opts.score_threshold,
            opts.nms_threshold,
        )
        .context("detecting faces")
        .map_err(PipelineError::Detection)?;

        let best = face::select_best(&detections).ok_or(PipelineError::NoFace)?;
        log::debug!(
            "{} face(s) detected, using score {:.3} at {:?}",
            detections.len(),
            best.score,
            best.bbox
        );

        let crop = align::norm_crop(
            &img.to_rgb8(),
            &best.landmarks,
            opts.image_size,
            opts.crop_scale,
        )?;

        let logits = classify::logits(&mut self.classifier, &crop, opts.classifier_input_size)
            .context("running classifier")
            .map_err(PipelineError::Classification)?;

        Ok(Outcome {
            detection: best.clone(),
            probabilities: classify::softmax(&logits),
        })
    }
}

impl FaceClassifier for Pipeline {
    fn classify(&mut self, img: &DynamicImage) -> Result<Outcome, PipelineError> {
        self.process_image(img)
    }
}
