//! Classifier
//!
//! Wraps the trained network behind an exclusive-acquisition guard:
//!
//! - [`Classifier::acquire`] hands out a [`ModelLease`]; only one lease
//!   exists at a time, and it is released on drop on every exit path.
//! - [`ModelLease::predict`] runs the forward pass and returns a
//!   [`Prediction`] plus the [`ForwardArtifacts`] of that one call.
//! - The artifacts are consumed by value by the explainability engine and
//!   are tagged with their inference and lease ids, so they cannot be
//!   replayed against another call.

pub mod checkpoint;
pub mod network;

pub use checkpoint::{ModelArchitecture, ModelCheckpoint};
pub use network::{ConvNet, FeatureMap, ForwardCache};

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::ImagingConfig;
use crate::imaging::Preprocessor;
use crate::types::{ClassProbabilities, DefectClass};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Image could not be decoded or brought to the model's input shape.
    #[error("input error: {0}")]
    Input(String),
    /// Weights could not be loaded; the classifier is not constructible.
    #[error("model load error ({path}): {reason}")]
    ModelLoad { path: PathBuf, reason: String },
}

/// Label, confidence and distribution for one inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub inference_id: u64,
    pub predicted_class: DefectClass,
    pub confidence: f64,
    pub class_probabilities: ClassProbabilities,
}

impl Prediction {
    /// Explain the predicted class.
    pub const fn target(&self) -> ExplainTarget {
        self.target_for(self.predicted_class)
    }

    /// Explain an arbitrary class of this inference.
    pub const fn target_for(&self, class: DefectClass) -> ExplainTarget {
        ExplainTarget {
            inference_id: self.inference_id,
            class,
        }
    }
}

/// Which inference call and which class score an explanation is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplainTarget {
    pub inference_id: u64,
    pub class: DefectClass,
}

/// Forward-pass state of exactly one inference call. Not `Clone`: it is
/// consumed once by the explainability engine.
#[derive(Debug)]
pub struct ForwardArtifacts {
    pub(crate) inference_id: u64,
    pub(crate) lease_id: u64,
    pub(crate) cache: ForwardCache,
}

impl ForwardArtifacts {
    pub const fn inference_id(&self) -> u64 {
        self.inference_id
    }

    pub const fn lease_id(&self) -> u64 {
        self.lease_id
    }
}

/// Image classifier over a single shared network instance.
pub struct Classifier {
    network: Mutex<ConvNet>,
    preprocessor: Preprocessor,
    model_name: String,
    next_inference: AtomicU64,
    next_lease: AtomicU64,
}

impl Classifier {
    /// Load weights from `path`. Fails fast; never falls back to an
    /// untrained network.
    pub fn load(path: &Path, imaging: &ImagingConfig) -> Result<Self, ClassifierError> {
        let checkpoint = ModelCheckpoint::load(path).map_err(|reason| ClassifierError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        })?;
        let classifier = Self::from_checkpoint(checkpoint, imaging).map_err(|e| match e {
            ClassifierError::ModelLoad { reason, .. } => ClassifierError::ModelLoad {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;

        info!(path = %path.display(), "Classifier weights loaded");
        Ok(classifier)
    }

    /// Build from an in-memory checkpoint.
    pub fn from_checkpoint(checkpoint: ModelCheckpoint, imaging: &ImagingConfig) -> Result<Self, ClassifierError> {
        let network = ConvNet::new(checkpoint).map_err(|reason| ClassifierError::ModelLoad {
            path: PathBuf::from("<memory>"),
            reason,
        })?;
        let (width, height) = network.input_size();
        let model_name = network.name().to_string();
        debug!(model = %model_name, width, height, "Classifier ready");

        Ok(Self {
            network: Mutex::new(network),
            preprocessor: Preprocessor::new(width, height, imaging.normalize_mean, imaging.normalize_std),
            model_name,
            next_inference: AtomicU64::new(1),
            next_lease: AtomicU64::new(1),
        })
    }

    /// Model input size (width, height).
    pub const fn input_size(&self) -> (u32, u32) {
        (self.preprocessor.width(), self.preprocessor.height())
    }

    /// Checkpoint name.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Take exclusive use of the network. Blocks while another lease is held.
    pub fn acquire(&self) -> ModelLease<'_> {
        let network = self.network.lock().unwrap_or_else(|poisoned| {
            // Inference never mutates weights, so the network is still sound.
            warn!("Model lock was poisoned by a panicking request, recovering");
            poisoned.into_inner()
        });
        let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        ModelLease {
            network,
            lease_id,
            classifier: self,
        }
    }

    /// Classify without keeping artifacts (no explanation).
    pub fn classify(&self, image: &RgbImage) -> Result<Prediction, ClassifierError> {
        let mut lease = self.acquire();
        let (prediction, _artifacts) = lease.predict(image)?;
        Ok(prediction)
    }
}

/// Exclusive hold on the network for one forward + backward pass.
pub struct ModelLease<'a> {
    network: MutexGuard<'a, ConvNet>,
    lease_id: u64,
    classifier: &'a Classifier,
}

impl ModelLease<'_> {
    pub const fn id(&self) -> u64 {
        self.lease_id
    }

    /// Model input size (width, height).
    pub const fn input_size(&self) -> (u32, u32) {
        self.classifier.input_size()
    }

    /// Preprocess `image` and run the forward pass.
    pub fn predict(&mut self, image: &RgbImage) -> Result<(Prediction, ForwardArtifacts), ClassifierError> {
        let tensor = self.classifier.preprocessor.tensor(image).ok_or_else(|| {
            ClassifierError::Input(format!(
                "image has invalid dimensions {}x{}",
                image.width(),
                image.height()
            ))
        })?;

        let cache = self.network.forward(&tensor);
        let probs = softmax_pair(&cache.logits)?;
        let class_probabilities = ClassProbabilities::from_distribution(probs);
        let predicted_class = class_probabilities.argmax();
        let confidence = class_probabilities.get(predicted_class);

        let inference_id = self.classifier.next_inference.fetch_add(1, Ordering::Relaxed);
        debug!(
            inference_id,
            lease_id = self.lease_id,
            class = %predicted_class,
            confidence,
            "Forward pass complete"
        );

        Ok((
            Prediction {
                inference_id,
                predicted_class,
                confidence,
                class_probabilities,
            },
            ForwardArtifacts {
                inference_id,
                lease_id: self.lease_id,
                cache,
            },
        ))
    }

    /// Backward pass from `class`'s score to the target layer.
    pub(crate) fn target_gradients(&self, artifacts: &ForwardArtifacts, class: DefectClass) -> FeatureMap {
        self.network.backward_to_features(&artifacts.cache, class.index())
    }
}

fn softmax_pair(logits: &[f32]) -> Result<[f64; DefectClass::COUNT], ClassifierError> {
    let probs = network::softmax(logits);
    if probs.len() != DefectClass::COUNT || probs.iter().any(|p| !p.is_finite()) {
        return Err(ClassifierError::Input(
            "model produced a non-finite class distribution".to_string(),
        ));
    }
    Ok([probs[0], probs[1]])
}
