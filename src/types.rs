use serde::{Deserialize, Serialize};

use crate::classes;

/// Sentinel returned when no model is loaded.
pub const MODEL_NOT_LOADED: &str = "MODEL_NOT_LOADED";
/// Sentinel returned when an image path is missing or does not exist.
pub const IMAGE_NOT_FOUND: &str = "IMAGE_NOT_FOUND";
/// Sentinel returned when preprocessing or inference failed for an image.
pub const PREDICTION_ERROR: &str = "PREDICTION_ERROR";

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictResponse {
    pub success: bool,
    pub predictions: Vec<ImagePrediction>,
}

/// One ranked class with its confidence and parsed metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassScore {
    pub class: String,
    pub confidence: f32,
    pub is_healthy: bool,
    pub plant: String,
    pub condition: String,
}

impl ClassScore {
    pub fn new(label: &str, confidence: f32) -> Self {
        let (plant, condition) = classes::split_label(label)
            .unwrap_or_else(|| (label.to_string(), String::new()));
        Self {
            class: label.to_string(),
            confidence,
            is_healthy: classes::is_healthy(label),
            plant,
            condition,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseInfo {
    pub plant: String,
    pub condition: String,
}

/// Per-image entry of the predict response, tagged with the index the
/// image had in the request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrediction {
    pub image_index: usize,
    pub predicted_class: String,
    pub confidence: f32,
    pub is_healthy: bool,
    pub disease_info: Option<DiseaseInfo>,
    pub all_predictions: Vec<ClassScore>,
    pub disease_predictions: Vec<ClassScore>,
    pub healthy_predictions: Vec<ClassScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImagePrediction {
    fn placeholder(image_index: usize, class: &str, error: Option<String>) -> Self {
        Self {
            image_index,
            predicted_class: class.to_string(),
            confidence: 0.0,
            is_healthy: false,
            disease_info: None,
            all_predictions: Vec::new(),
            disease_predictions: Vec::new(),
            healthy_predictions: Vec::new(),
            error,
        }
    }

    /// Placeholder for a missing `path` field or a nonexistent file.
    pub fn not_found(image_index: usize) -> Self {
        Self::placeholder(image_index, IMAGE_NOT_FOUND, None)
    }

    /// Placeholder for a per-image pipeline failure, carrying the error text.
    pub fn failed(image_index: usize, error: &str) -> Self {
        Self::placeholder(image_index, PREDICTION_ERROR, Some(error.to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeResponse {
    pub success: bool,
    pub message: String,
    pub version: String,
    pub model_loaded: bool,
    pub classes: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub status: String,
    pub model_loaded: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassesResponse {
    pub success: bool,
    pub classes: Vec<&'static str>,
    pub disease_classes: Vec<&'static str>,
    pub healthy_classes: Vec<&'static str>,
    pub count: usize,
    pub disease_count: usize,
    pub healthy_count: usize,
}

impl ClassesResponse {
    pub fn current() -> Self {
        let classes: Vec<_> = classes::DISEASE_CLASSES.to_vec();
        let disease_classes: Vec<_> = classes::disease_labels().collect();
        let healthy_classes: Vec<_> = classes::healthy_labels().collect();
        Self {
            success: true,
            count: classes.len(),
            disease_count: disease_classes.len(),
            healthy_count: healthy_classes.len(),
            classes,
            disease_classes,
            healthy_classes,
        }
    }
}

/// Body for request-level failures (400/500).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            error: None,
        }
    }

    pub fn with_error(message: &str, error: String) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            error: Some(error),
        }
    }
}
