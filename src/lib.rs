pub mod catalog;
pub mod config;
pub mod error;
pub mod prediction;
pub mod routes;

// Re-export vision types for convenience
pub use facerank_vision::{align, classify, face, pipeline, Detection, FaceClassifier, Pipeline};
