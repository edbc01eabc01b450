//! Class Table Module
//!
//! The ordered class-name table the classifier's output distribution is
//! indexed by. Loaded once at initialization and immutable afterwards;
//! the table order must match the order the model was trained with.
//!
//! Class names follow the `crop___disease` convention, e.g.
//! `tomato___early_blight` or `potato___healthy`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Separator between crop and disease in a class name
pub const CLASS_SEPARATOR: &str = "___";

/// Built-in default class table, matching the production model's output head.
pub const DEFAULT_CLASS_NAMES: [&str; 9] = [
    "tomato___healthy",
    "tomato___early_blight",
    "tomato___late_blight",
    "potato___healthy",
    "potato___early_blight",
    "potato___late_blight",
    "corn___healthy",
    "corn___common_rust",
    "corn___northern_leaf_blight",
];

/// Immutable, ordered class-name table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassTable {
    class_names: Vec<String>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self {
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClassTable {
    /// Build a table from an ordered list of class names.
    pub fn new(class_names: Vec<String>) -> Result<Self> {
        if class_names.is_empty() {
            return Err(CoreError::Config(
                "class table must contain at least one class".to_string(),
            ));
        }
        Ok(Self { class_names })
    }

    /// Load the table from a JSON file containing an ordered array of names.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let class_names: Vec<String> = serde_json::from_str(&json)?;
        Self::new(class_names)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.class_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_names.is_empty()
    }

    /// Class name for a label index
    pub fn class_name(&self, label: usize) -> Option<&str> {
        self.class_names.get(label).map(|s| s.as_str())
    }

    /// Label index for a class name
    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.class_names.iter().position(|n| n == name)
    }

    /// Whether the class represents a healthy plant (not diseased)
    pub fn is_healthy(&self, label: usize) -> bool {
        self.class_names
            .get(label)
            .map(|name| name.ends_with("healthy"))
            .unwrap_or(false)
    }

    /// Crop name portion of a class, e.g. "tomato" from "tomato___early_blight"
    pub fn crop_name(&self, label: usize) -> Option<&str> {
        self.class_names
            .get(label)
            .and_then(|name| name.split(CLASS_SEPARATOR).next())
    }

    /// Disease name portion of a class, e.g. "early_blight".
    /// Healthy classes return "healthy".
    pub fn disease_name(&self, label: usize) -> Option<&str> {
        self.class_names
            .get(label)
            .and_then(|name| name.split(CLASS_SEPARATOR).nth(1))
    }

    /// Iterate over class names in label order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.class_names.iter().map(|s| s.as_str())
    }
}
