//! Inspection types: DefectClass, ClassProbabilities, InspectionResult, HistoryRecord

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed label set produced by the classifier.
///
/// The discriminant is the model's output index, so a checkpoint's head
/// must have exactly [`DefectClass::COUNT`] outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectClass {
    Normal = 0,
    Defective = 1,
}

impl DefectClass {
    pub const COUNT: usize = 2;
    pub const ALL: [DefectClass; Self::COUNT] = [DefectClass::Normal, DefectClass::Defective];

    /// Model output index for this class.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Class for a model output index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DefectClass::Normal => "normal",
            DefectClass::Defective => "defective",
        }
    }

    pub const fn is_defective(self) -> bool {
        matches!(self, DefectClass::Defective)
    }
}

impl std::fmt::Display for DefectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability mass per class. Values are non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub normal: f64,
    pub defective: f64,
}

impl ClassProbabilities {
    /// Build from a softmax output ordered by class index.
    pub fn from_distribution(probs: [f64; DefectClass::COUNT]) -> Self {
        Self {
            normal: probs[DefectClass::Normal.index()],
            defective: probs[DefectClass::Defective.index()],
        }
    }

    pub const fn get(&self, class: DefectClass) -> f64 {
        match class {
            DefectClass::Normal => self.normal,
            DefectClass::Defective => self.defective,
        }
    }

    pub fn sum(&self) -> f64 {
        self.normal + self.defective
    }

    /// Class with the highest probability; ties go to the lower index.
    pub fn argmax(&self) -> DefectClass {
        if self.defective > self.normal {
            DefectClass::Defective
        } else {
            DefectClass::Normal
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DefectClass, f64)> + '_ {
        DefectClass::ALL.into_iter().map(|c| (c, self.get(c)))
    }
}

/// Per-pixel importance scores in [0, 1] at the model's input resolution.
///
/// The map is rescaled to [0, 1] at feature resolution and then upsampled,
/// so its peak can sit below 1 once neighbouring cells are interpolated.
/// It is not renormalised after upsampling.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationMap {
    pub width: u32,
    pub height: u32,
    /// Row-major scores.
    pub values: Vec<f32>,
    /// Minimum of the clipped map before rescaling.
    pub raw_min: f32,
    /// Maximum of the clipped map before rescaling.
    pub raw_max: f32,
}

impl ExplanationMap {
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
            raw_min: 0.0,
            raw_max: 0.0,
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// True when the map carries no importance at all (degenerate gradient).
    pub fn is_degenerate(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    pub fn max_value(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }
}

/// Outcome of one inspection. Built once by the orchestrator and never
/// mutated after it is handed out.
#[derive(Debug, Clone)]
pub struct InspectionResult {
    pub id: Uuid,
    pub predicted_class: DefectClass,
    /// Probability mass at `predicted_class`, in [0, 1].
    pub confidence: f64,
    pub class_probabilities: ClassProbabilities,
    /// When inference completed. Non-decreasing across the process.
    pub timestamp: DateTime<Utc>,
    pub explanation_map: ExplanationMap,
    /// Heat map blended over the original image, at the original resolution.
    pub overlay: RgbImage,
    /// Whether the history append succeeded. A failed append never fails
    /// the inspection itself.
    pub history_persisted: bool,
}

impl InspectionResult {
    /// The subset forwarded to the narrative-analysis collaborator.
    pub fn summary(&self) -> InspectionSummary {
        InspectionSummary {
            predicted_class: self.predicted_class,
            confidence: self.confidence,
            class_probabilities: self.class_probabilities,
        }
    }
}

/// `{predicted_class, confidence, class_probabilities}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InspectionSummary {
    pub predicted_class: DefectClass,
    pub confidence: f64,
    pub class_probabilities: ClassProbabilities,
}

/// Durable projection of an [`InspectionResult`]. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub predicted_class: DefectClass,
    pub confidence: f64,
    pub class_probabilities: ClassProbabilities,
}

impl From<&InspectionResult> for HistoryRecord {
    fn from(result: &InspectionResult) -> Self {
        Self {
            id: result.id,
            timestamp: result.timestamp,
            predicted_class: result.predicted_class,
            confidence: result.confidence,
            class_probabilities: result.class_probabilities,
        }
    }
}

/// Lifecycle of a single inspection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStage {
    Idle,
    Classifying,
    Explaining,
    Recorded,
    Analyzed,
    Reported,
}

impl std::fmt::Display for InspectionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InspectionStage::Idle => "idle",
            InspectionStage::Classifying => "classifying",
            InspectionStage::Explaining => "explaining",
            InspectionStage::Recorded => "recorded",
            InspectionStage::Analyzed => "analyzed",
            InspectionStage::Reported => "reported",
        };
        f.write_str(s)
    }
}
