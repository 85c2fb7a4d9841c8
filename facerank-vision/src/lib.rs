pub mod align;
pub mod classify;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod scrfd;

// Re-export commonly used types
pub use align::{AlignError, Affine};
pub use face::{Detection, Landmarks};
pub use pipeline::{FaceClassifier, Outcome, Pipeline, PipelineError, PipelineOptions};
