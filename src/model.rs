use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use crate::error::{InputError, ModelError};

/// Column order the model was fitted on.
pub const FEATURE_COLUMNS: [&str; 7] = [
    "Tuition Fees Up-to-Date",
    "Is Debtor",
    "Gender (1=Male, 0=Female)",
    "Scholarship Holder",
    "Age at Enrollment",
    "Average Grade (2nd Sem)",
    "Approved Units (1st Sem)",
];

pub const DROPOUT_CLASS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    fn encode(self) -> f64 {
        match self {
            YesNo::Yes => 1.0,
            YesNo::No => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    fn encode(self) -> f64 {
        match self {
            Gender::Male => 1.0,
            Gender::Female => 0.0,
        }
    }
}

fn default_age() -> u32 {
    20
}

fn default_grade() -> f64 {
    12.0
}

fn default_units() -> u32 {
    5
}

/// Values submitted from the prediction form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionForm {
    pub tuition_up_to_date: YesNo,
    pub debtor: YesNo,
    pub gender: Gender,
    pub scholarship_holder: YesNo,
    #[serde(default = "default_age")]
    pub age: u32,
    #[serde(default = "default_grade")]
    pub grade: f64,
    #[serde(default = "default_units")]
    pub approved_units: u32,
}

impl PredictionForm {
    pub fn to_features(&self) -> Result<FeatureVector, InputError> {
        check_range("age", self.age as f64, 17.0, 70.0)?;
        check_range("grade", self.grade, 0.0, 20.0)?;
        check_range("approved_units", self.approved_units as f64, 0.0, 30.0)?;

        Ok(FeatureVector::new([
            self.tuition_up_to_date.encode(),
            self.debtor.encode(),
            self.gender.encode(),
            self.scholarship_holder.encode(),
            self.age as f64,
            self.grade,
            self.approved_units as f64,
        ]))
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), InputError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(InputError { field, min, max })
    }
}

/// One row of model input, ordered as [`FEATURE_COLUMNS`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Array1<f64>,
}

impl FeatureVector {
    pub fn new(values: [f64; 7]) -> Self {
        FeatureVector {
            values: Array1::from_vec(values.to_vec()),
        }
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn names(&self) -> &'static [&'static str] {
        &FEATURE_COLUMNS
    }
}

/// A fitted binary classifier.
pub trait Classifier: Send + Sync {
    /// Predicted class label.
    fn predict(&self, features: &FeatureVector) -> Result<u8, ModelError>;

    /// Probability per class label, indexed by label.
    fn predict_proba(&self, features: &FeatureVector) -> Result<Vec<f64>, ModelError>;
}

/// Logistic regression exported as JSON: one coefficient per feature column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    #[serde(default)]
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn check_features(&self, features: &FeatureVector) -> Result<(), ModelError> {
        let names_match = self.feature_names.is_empty()
            || self.feature_names.iter().map(String::as_str).eq(features.names().iter().copied());
        if names_match && self.coefficients.len() == features.values().len() {
            return Ok(());
        }
        Err(ModelError::FeatureMismatch {
            expected: if self.feature_names.is_empty() {
                vec![format!("{} features", self.coefficients.len())]
            } else {
                self.feature_names.clone()
            },
            actual: features.names().iter().map(|n| n.to_string()).collect(),
        })
    }

    fn dropout_probability(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        self.check_features(features)?;
        let weights = Array1::from_vec(self.coefficients.clone());
        let z = weights.dot(features.values()) + self.intercept;
        if !z.is_finite() {
            return Err(ModelError::Prediction("non-finite decision value".to_string()));
        }
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

impl Classifier for LogisticModel {
    fn predict(&self, features: &FeatureVector) -> Result<u8, ModelError> {
        let p = self.dropout_probability(features)?;
        Ok(if p >= 0.5 { DROPOUT_CLASS } else { 0 })
    }

    fn predict_proba(&self, features: &FeatureVector) -> Result<Vec<f64>, ModelError> {
        let p = self.dropout_probability(features)?;
        Ok(vec![1.0 - p, p])
    }
}

/// Loads the artifact once at startup. A missing or unreadable artifact only
/// disables prediction.
pub fn load_model(path: impl AsRef<Path>) -> Option<Arc<dyn Classifier>> {
    let path = path.as_ref();
    match LogisticModel::from_path(path) {
        Ok(model) => {
            tracing::info!(path = %path.display(), features = model.coefficients.len(), "model loaded");
            Some(Arc::new(model))
        }
        Err(ModelError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "model artifact not found; prediction disabled");
            None
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to load model; prediction disabled");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    DropoutRisk,
    LikelyToGraduate,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::DropoutRisk => "Dropout Risk",
            Outcome::LikelyToGraduate => "Likely to Graduate",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub outcome: Outcome,
    pub label: &'static str,
    pub class: u8,
    pub probability: f64,
    pub confidence: String,
}

/// Runs both model calls and labels the result. Confidence is the largest
/// class probability.
pub fn assess(model: &dyn Classifier, features: &FeatureVector) -> Result<Assessment, ModelError> {
    let class = model.predict(features)?;
    let probability = model
        .predict_proba(features)?
        .into_iter()
        .filter(|p| p.is_finite())
        .max_by(f64::total_cmp)
        .ok_or_else(|| ModelError::Prediction("model returned no probabilities".to_string()))?;

    let outcome = if class == DROPOUT_CLASS {
        Outcome::DropoutRisk
    } else {
        Outcome::LikelyToGraduate
    };

    Ok(Assessment {
        outcome,
        label: outcome.label(),
        class,
        probability,
        confidence: format!("{:.1}%", probability * 100.0),
    })
}
