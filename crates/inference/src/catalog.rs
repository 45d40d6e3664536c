use serde::{Deserialize, Serialize};

/// Detection family a model belongs to. Selects the backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelCategory {
    ObjectDetection,
    Classification,
    FaceDetection,
}

impl ModelCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelCategory::ObjectDetection => "object-detection",
            ModelCategory::Classification => "classification",
            ModelCategory::FaceDetection => "face-detection",
        }
    }
}

/// Static metadata for a model the registry knows how to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub size_class: String,
    pub speed_class: String,
    pub accuracy_class: String,
    pub supported_class_count: u32,
    pub license: String,
    pub category: ModelCategory,
}

impl ModelDescriptor {
    /// Approximate weight size in bytes parsed from `size_class` (`"~50MB"`).
    pub fn approximate_size_bytes(&self) -> Option<u64> {
        let digits = self
            .size_class
            .trim()
            .trim_start_matches('~')
            .trim_end_matches(|c: char| c.is_ascii_alphabetic());
        let megabytes: f64 = digits.trim().parse().ok()?;
        Some((megabytes * 1024.0 * 1024.0) as u64)
    }
}

/// Read-only list of model descriptors.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn with_entries(entries: Vec<ModelDescriptor>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ModelDescriptor] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.entries.iter().find(|m| m.id == id)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_entries(vec![
            ModelDescriptor {
                id: "coco-ssd".to_string(),
                display_name: "COCO-SSD".to_string(),
                description: "SSD detector tuned for real-time object detection".to_string(),
                version: "2.2.3".to_string(),
                size_class: "~50MB".to_string(),
                speed_class: "fast".to_string(),
                accuracy_class: "85%".to_string(),
                supported_class_count: 80,
                license: "Apache 2.0".to_string(),
                category: ModelCategory::ObjectDetection,
            },
            ModelDescriptor {
                id: "mobilenet".to_string(),
                display_name: "MobileNet".to_string(),
                description: "Lightweight image classifier".to_string(),
                version: "2.0.0".to_string(),
                size_class: "~20MB".to_string(),
                speed_class: "very fast".to_string(),
                accuracy_class: "80%".to_string(),
                supported_class_count: 1000,
                license: "Apache 2.0".to_string(),
                category: ModelCategory::Classification,
            },
            ModelDescriptor {
                id: "blazeface".to_string(),
                display_name: "BlazeFace".to_string(),
                description: "Ultra-light face detector".to_string(),
                version: "1.0.0".to_string(),
                size_class: "~5MB".to_string(),
                speed_class: "ultra fast".to_string(),
                accuracy_class: "95%".to_string(),
                supported_class_count: 1,
                license: "Apache 2.0".to_string(),
                category: ModelCategory::FaceDetection,
            },
        ])
    }
}
