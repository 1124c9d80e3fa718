//! The prediction pipeline: preprocess, forward pass, ranking.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::classes;
use crate::error::{PipelineError, PredictError};
use crate::model::DiseaseModel;
use crate::preprocess::{self, Normalization};
use crate::types::{ClassScore, DiseaseInfo, ImagePrediction, MODEL_NOT_LOADED};

/// How many entries the general and disease-only rankings keep in the
/// response. The healthy-only ranking is returned in full.
const TOP_K: usize = 5;

/// Ranked predictions for one image.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub class: String,
    pub confidence: f32,
    /// All classes, sorted by descending confidence. Ties keep class order.
    pub ranking: Vec<ClassScore>,
}

impl Prediction {
    /// Sentinel prediction used when the service runs without a model.
    pub fn model_not_loaded() -> Self {
        Self {
            class: MODEL_NOT_LOADED.to_string(),
            confidence: 0.0,
            ranking: Vec::new(),
        }
    }

    /// Build a prediction from the softmax output. The top class is the
    /// first maximum, so ties break toward the lowest class index.
    pub fn from_probabilities(probs: &[f32]) -> Self {
        let ranking = rank(probs);
        let (class, confidence) = ranking
            .first()
            .map(|top| (top.class.clone(), top.confidence))
            .unwrap_or_else(|| (MODEL_NOT_LOADED.to_string(), 0.0));
        Self {
            class,
            confidence,
            ranking,
        }
    }

    /// Shape this prediction into the per-image response entry, tagged with
    /// the index the image had in the request.
    pub fn into_response_entry(self, image_index: usize) -> ImagePrediction {
        let is_healthy = classes::is_healthy(&self.class);
        let disease_info = if is_healthy {
            None
        } else {
            classes::split_label(&self.class)
                .map(|(plant, condition)| DiseaseInfo { plant, condition })
        };

        let all_predictions = self.ranking.iter().take(TOP_K).cloned().collect();
        let disease_predictions = self
            .ranking
            .iter()
            .filter(|score| !score.is_healthy)
            .take(TOP_K)
            .cloned()
            .collect();
        let healthy_predictions = self
            .ranking
            .iter()
            .filter(|score| score.is_healthy)
            .cloned()
            .collect();

        ImagePrediction {
            image_index,
            predicted_class: self.class,
            confidence: self.confidence,
            is_healthy,
            disease_info,
            all_predictions,
            disease_predictions,
            healthy_predictions,
            error: None,
        }
    }
}

/// Pair probabilities with the taxonomy and sort by descending confidence.
///
/// `sort_by` is stable, so equal confidences keep the model's class order
/// and the first element is the first-max argmax. A class-count mismatch
/// between checkpoint and taxonomy truncates to the shorter of the two.
pub fn rank(probs: &[f32]) -> Vec<ClassScore> {
    let mut scores: Vec<ClassScore> = probs
        .iter()
        .enumerate()
        .filter_map(|(index, &confidence)| {
            classes::class_name(index).map(|label| ClassScore::new(label, confidence))
        })
        .collect();
    scores.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    scores
}

#[async_trait]
pub trait Predictor: Send + Sync {
    fn model_loaded(&self) -> bool;

    /// Predict the disease class for the image at `path`.
    async fn predict_path(&self, path: &Path) -> Result<Prediction, PredictError>;
}

/// [`Predictor`] backed by the candle classifier. The CPU-bound pipeline
/// runs on the blocking pool so async workers stay responsive.
pub struct LeafPredictor {
    model: Option<Arc<DiseaseModel>>,
    normalization: Normalization,
}

impl LeafPredictor {
    pub fn new(model: Option<Arc<DiseaseModel>>, normalization: Normalization) -> Self {
        Self {
            model,
            normalization,
        }
    }
}

#[async_trait]
impl Predictor for LeafPredictor {
    fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    async fn predict_path(&self, path: &Path) -> Result<Prediction, PredictError> {
        let Some(model) = self.model.clone() else {
            return Ok(Prediction::model_not_loaded());
        };

        let path = path.to_path_buf();
        let normalization = self.normalization;
        let probs = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, PipelineError> {
            let input = preprocess::preprocess_file(&path, normalization, model.device())?;
            model.predict_probs(&input).map_err(PipelineError::from)
        })
        .await??;

        Ok(Prediction::from_probabilities(&probs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_sorts_descending() {
        let mut probs = vec![0.05; classes::NUM_CLASSES];
        probs[2] = 0.4;
        probs[7] = 0.15;

        let ranking = rank(&probs);
        assert_eq!(ranking.len(), classes::NUM_CLASSES);
        assert_eq!(ranking[0].class, "Tomato___Late_blight");
        assert_eq!(ranking[1].class, "Tomato___Tomato_Yellow_Leaf_Curl_Virus");
        for pair in ranking.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn test_rank_ties_keep_class_order() {
        let probs = vec![0.1; classes::NUM_CLASSES];
        let ranking = rank(&probs);
        let labels: Vec<_> = ranking.iter().map(|s| s.class.as_str()).collect();
        assert_eq!(labels, classes::DISEASE_CLASSES.to_vec());
    }

    #[test]
    fn test_first_max_argmax() {
        let mut probs = vec![0.0; classes::NUM_CLASSES];
        probs[3] = 0.5;
        probs[6] = 0.5;

        let prediction = Prediction::from_probabilities(&probs);
        assert_eq!(prediction.class, classes::DISEASE_CLASSES[3]);
        assert_eq!(prediction.confidence, 0.5);
    }

    #[test]
    fn test_rank_truncates_on_class_count_mismatch() {
        let probs = vec![0.5, 0.3, 0.2];
        let ranking = rank(&probs);
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[0].class, classes::DISEASE_CLASSES[0]);
    }

    #[test]
    fn test_sentinel_prediction() {
        let prediction = Prediction::model_not_loaded();
        assert_eq!(prediction.class, MODEL_NOT_LOADED);
        assert_eq!(prediction.confidence, 0.0);
        assert!(prediction.ranking.is_empty());
    }

    #[test]
    fn test_response_entry_truncations() {
        // Uniform-ish distribution with a clear winner on a disease class.
        let mut probs = vec![0.08; classes::NUM_CLASSES];
        probs[1] = 0.28;

        let entry = Prediction::from_probabilities(&probs).into_response_entry(4);
        assert_eq!(entry.image_index, 4);
        assert_eq!(entry.predicted_class, "Tomato___Early_blight");
        assert!(!entry.is_healthy);

        let info = entry.disease_info.as_ref().unwrap();
        assert_eq!(info.plant, "Tomato");
        assert_eq!(info.condition, "Early blight");

        assert_eq!(entry.all_predictions.len(), 5);
        assert_eq!(entry.all_predictions[0].class, entry.predicted_class);
        assert_eq!(entry.disease_predictions.len(), 5);
        assert!(entry.disease_predictions.iter().all(|s| !s.is_healthy));
        assert_eq!(entry.healthy_predictions.len(), 1);
        assert_eq!(entry.healthy_predictions[0].class, "Tomato___healthy");
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_response_entry_for_healthy_prediction() {
        let mut probs = vec![0.05; classes::NUM_CLASSES];
        probs[classes::NUM_CLASSES - 1] = 0.55;

        let entry = Prediction::from_probabilities(&probs).into_response_entry(0);
        assert_eq!(entry.predicted_class, "Tomato___healthy");
        assert!(entry.is_healthy);
        assert!(entry.disease_info.is_none());
    }

    #[tokio::test]
    async fn test_predictor_without_model() {
        let predictor = LeafPredictor::new(None, Normalization::Scale);
        assert!(!predictor.model_loaded());

        let prediction = predictor
            .predict_path(Path::new("whatever.jpg"))
            .await
            .unwrap();
        assert_eq!(prediction.class, MODEL_NOT_LOADED);
    }
}
