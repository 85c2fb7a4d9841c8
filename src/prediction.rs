use facerank_vision::classify;
use serde::Serialize;
use thiserror::Error;

use crate::catalog::ClassCatalog;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub rank: usize,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub confidence_percent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub message: &'static str,
    pub predictions: Vec<Prediction>,
}

impl PredictResponse {
    pub fn success(predictions: Vec<Prediction>) -> Self {
        Self {
            message: "Success",
            predictions,
        }
    }
}

/// The classifier and the class names file disagree on the number of classes
#[derive(Debug, Error)]
#[error("classifier produced {outputs} scores but the catalog has {classes} classes")]
pub struct CatalogMismatch {
    pub outputs: usize,
    pub classes: usize,
}

fn round_to(value: f32, decimals: usize) -> f64 {
    let value = value as f64;
    format!("{:.*}", decimals, value).parse().unwrap_or(value)
}

/// Turn a probability distribution into the top `k` named predictions
pub fn rank(
    catalog: &ClassCatalog,
    probabilities: &[f32],
    k: usize,
) -> Result<Vec<Prediction>, CatalogMismatch> {
    let mismatch = || CatalogMismatch {
        outputs: probabilities.len(),
        classes: catalog.names().len(),
    };
    if probabilities.len() != catalog.names().len() {
        return Err(mismatch());
    }

    classify::top_k(probabilities, k)
        .into_iter()
        .enumerate()
        .map(|(i, (index, p))| {
            let class_name = catalog.name(index).ok_or_else(mismatch)?;
            Ok(Prediction {
                rank: i + 1,
                class_name: class_name.to_string(),
                confidence: round_to(p, 4),
                confidence_percent: format!("{:.2}%", (p * 100.0) as f64),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(n: usize) -> ClassCatalog {
        ClassCatalog::from_names((0..n).map(|i| format!("person_{}", i)).collect()).unwrap()
    }

    #[test]
    fn test_top_five_sorted_and_ranked() {
        let probs = [0.02, 0.3, 0.05, 0.25, 0.1, 0.08, 0.2];
        let predictions = rank(&catalog(7), &probs, 5).unwrap();

        assert_eq!(predictions.len(), 5);
        let ranks: Vec<usize> = predictions.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        let names: Vec<&str> = predictions.iter().map(|p| p.class_name.as_str()).collect();
        assert_eq!(names, vec!["person_1", "person_3", "person_6", "person_4", "person_5"]);
        assert!(predictions
            .windows(2)
            .all(|w| w[0].confidence > w[1].confidence));
    }

    #[test]
    fn test_confidence_formatting() {
        let probs = [0.123_456, 0.876_544];
        let predictions = rank(&catalog(2), &probs, 5).unwrap();

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].confidence, 0.8765);
        assert_eq!(predictions[0].confidence_percent, "87.65%");
        assert_eq!(predictions[1].confidence, 0.1235);
        assert_eq!(predictions[1].confidence_percent, "12.35%");

        for p in &predictions {
            assert_eq!(p.confidence_percent, format!("{:.2}%", p.confidence * 100.0));
        }
    }

    #[test]
    fn test_catalog_mismatch() {
        let err = rank(&catalog(3), &[0.5, 0.5], 5).unwrap_err();
        assert_eq!(err.outputs, 2);
        assert_eq!(err.classes, 3);
    }

    #[test]
    fn test_json_shape() {
        let predictions = rank(&catalog(1), &[1.0], 5).unwrap();
        let json = serde_json::to_value(PredictResponse::success(predictions)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "Success",
                "predictions": [{
                    "rank": 1,
                    "class": "person_0",
                    "confidence": 1.0,
                    "confidence_percent": "100.00%"
                }]
            })
        );
    }
}
