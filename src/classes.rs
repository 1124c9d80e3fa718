//! Class taxonomy for the tomato leaf disease classifier.
//!
//! The order of [`DISEASE_CLASSES`] is the model's output index order and
//! must not change independently of the deployed checkpoint.

/// Label delimiter between plant name and condition.
pub const LABEL_DELIMITER: &str = "___";

/// All class labels, in model output order.
pub const DISEASE_CLASSES: [&str; 10] = [
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
    "Tomato___Septoria_leaf_spot",
    "Tomato___Spider_mites Two-spotted_spider_mite",
    "Tomato___Target_Spot",
    "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    "Tomato___Tomato_mosaic_virus",
    "Tomato___healthy",
];

/// Labels representing the absence of disease.
pub const HEALTHY_CLASSES: [&str; 1] = ["Tomato___healthy"];

/// Number of classes the taxonomy describes.
pub const NUM_CLASSES: usize = DISEASE_CLASSES.len();

/// Get the class label for a given output index.
pub fn class_name(index: usize) -> Option<&'static str> {
    DISEASE_CLASSES.get(index).copied()
}

/// Whether a label belongs to the healthy set.
pub fn is_healthy(label: &str) -> bool {
    HEALTHY_CLASSES.contains(&label)
}

/// Split a `Plant___Condition` label into its plant name and a
/// human-readable condition (underscores expanded to spaces).
pub fn split_label(label: &str) -> Option<(String, String)> {
    label
        .split_once(LABEL_DELIMITER)
        .map(|(plant, condition)| (plant.to_string(), condition.replace('_', " ")))
}

/// Labels outside the healthy set, in model output order.
pub fn disease_labels() -> impl Iterator<Item = &'static str> {
    DISEASE_CLASSES.iter().copied().filter(|l| !is_healthy(l))
}

/// Labels inside the healthy set, in model output order.
pub fn healthy_labels() -> impl Iterator<Item = &'static str> {
    DISEASE_CLASSES.iter().copied().filter(|l| is_healthy(l))
}
