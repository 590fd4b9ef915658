//! Classifier checkpoint: versioned JSON snapshot of the network weights.
//!
//! Provides:
//! - Disk persistence (atomic save, validated load)
//! - Deterministic seeded initialisation for tooling and tests

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::config::defaults::{CHECKPOINT_VERSION, MODEL_INPUT_SIZE};
use crate::types::DefectClass;

/// Complete trainable state of the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    /// Format version for forward compatibility.
    pub version: u32,
    pub metadata: CheckpointMetadata,
    /// Spatial size the network expects (pixels).
    pub input_width: u32,
    pub input_height: u32,
    /// Convolution blocks, input first. The last block is the
    /// explainability target layer.
    pub conv_layers: Vec<ConvLayer>,
    /// Classification head over globally pooled features.
    pub head: LinearLayer,
}

/// Provenance attached to a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

/// Same-padded convolution + bias + ReLU, optionally followed by 2x2 max-pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvLayer {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Odd square kernel side.
    pub kernel_size: usize,
    #[serde(default)]
    pub pool: bool,
    /// Layout `[out][in][ky][kx]`.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Fully connected layer, weights `[out][in]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearLayer {
    pub in_features: usize,
    pub out_features: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Shape description used to build a freshly initialised checkpoint.
#[derive(Debug, Clone)]
pub struct ModelArchitecture {
    pub input_width: u32,
    pub input_height: u32,
    /// Output channels per conv block.
    pub conv_channels: Vec<usize>,
    pub kernel_size: usize,
    /// Max-pool after every block except the last.
    pub pool_between_blocks: bool,
}

impl Default for ModelArchitecture {
    fn default() -> Self {
        Self {
            input_width: MODEL_INPUT_SIZE,
            input_height: MODEL_INPUT_SIZE,
            conv_channels: vec![16, 32, 64, 128],
            kernel_size: 3,
            pool_between_blocks: true,
        }
    }
}

impl ModelCheckpoint {
    /// Build a checkpoint with Xavier-style uniform weights from `seed`.
    ///
    /// The result is untrained; the classifier only ever loads weights
    /// from disk, so this is for tooling and tests.
    pub fn seeded(arch: &ModelArchitecture, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let k = arch.kernel_size;

        let mut conv_layers = Vec::with_capacity(arch.conv_channels.len());
        let mut in_channels = 3;
        for (i, &out_channels) in arch.conv_channels.iter().enumerate() {
            let fan_in = in_channels * k * k;
            let fan_out = out_channels * k * k;
            let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
            let weights = (0..out_channels * fan_in)
                .map(|_| rng.gen::<f32>() * 2.0 * bound - bound)
                .collect();
            let is_last = i + 1 == arch.conv_channels.len();
            conv_layers.push(ConvLayer {
                in_channels,
                out_channels,
                kernel_size: k,
                pool: arch.pool_between_blocks && !is_last,
                weights,
                bias: vec![0.01; out_channels],
            });
            in_channels = out_channels;
        }

        let classes = DefectClass::COUNT;
        let bound = (6.0 / (in_channels + classes) as f32).sqrt();
        let head = LinearLayer {
            in_features: in_channels,
            out_features: classes,
            weights: (0..classes * in_channels)
                .map(|_| rng.gen::<f32>() * 2.0 * bound - bound)
                .collect(),
            bias: vec![0.0; classes],
        };

        Self {
            version: CHECKPOINT_VERSION,
            metadata: CheckpointMetadata {
                name: format!("seeded-{}", seed),
                created_at: Utc::now(),
                description: "untrained, seeded initialisation".to_string(),
            },
            input_width: arch.input_width,
            input_height: arch.input_height,
            conv_layers,
            head,
        }
    }

    /// Read and validate a checkpoint from disk.
    pub fn load(path: &Path) -> Result<Self, String> {
        let bytes = std::fs::read(path).map_err(|e| format!("read failed: {}", e))?;
        let cp: Self = serde_json::from_slice(&bytes).map_err(|e| format!("invalid checkpoint JSON: {}", e))?;
        cp.validate()?;
        Ok(cp)
    }

    /// Save atomically (write temp file, then rename).
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp_path = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Spatial size of the target layer's activations for the declared input.
    pub fn feature_size(&self) -> (usize, usize) {
        let mut w = self.input_width as usize;
        let mut h = self.input_height as usize;
        for layer in &self.conv_layers {
            if layer.pool {
                w /= 2;
                h /= 2;
            }
        }
        (w, h)
    }

    /// Structural checks. Any failure means the weights are unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != CHECKPOINT_VERSION {
            return Err(format!(
                "unsupported checkpoint version {} (expected {})",
                self.version, CHECKPOINT_VERSION
            ));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err("input size must be non-zero".to_string());
        }
        if self.conv_layers.is_empty() {
            return Err("checkpoint has no convolution layers".to_string());
        }

        let mut expected_in = 3;
        for (i, layer) in self.conv_layers.iter().enumerate() {
            if layer.in_channels != expected_in {
                return Err(format!(
                    "conv[{}] expects {} input channels, previous layer produces {}",
                    i, layer.in_channels, expected_in
                ));
            }
            if layer.out_channels == 0 {
                return Err(format!("conv[{}] has zero output channels", i));
            }
            if layer.kernel_size == 0 || layer.kernel_size % 2 == 0 {
                return Err(format!("conv[{}] kernel size {} must be odd", i, layer.kernel_size));
            }
            let expected = layer.out_channels * layer.in_channels * layer.kernel_size * layer.kernel_size;
            if layer.weights.len() != expected {
                return Err(format!(
                    "conv[{}] has {} weights, expected {}",
                    i,
                    layer.weights.len(),
                    expected
                ));
            }
            if layer.bias.len() != layer.out_channels {
                return Err(format!(
                    "conv[{}] has {} biases, expected {}",
                    i,
                    layer.bias.len(),
                    layer.out_channels
                ));
            }
            if !layer.weights.iter().chain(&layer.bias).all(|v| v.is_finite()) {
                return Err(format!("conv[{}] contains non-finite values", i));
            }
            expected_in = layer.out_channels;
        }

        let head = &self.head;
        if head.in_features != expected_in {
            return Err(format!(
                "head expects {} features, last conv produces {}",
                head.in_features, expected_in
            ));
        }
        if head.out_features != DefectClass::COUNT {
            return Err(format!(
                "head has {} outputs, expected {} classes",
                head.out_features,
                DefectClass::COUNT
            ));
        }
        if head.weights.len() != head.in_features * head.out_features || head.bias.len() != head.out_features {
            return Err("head weight/bias dimensions do not match".to_string());
        }
        if !head.weights.iter().chain(&head.bias).all(|v| v.is_finite()) {
            return Err("head contains non-finite values".to_string());
        }

        let (fw, fh) = self.feature_size();
        if fw == 0 || fh == 0 {
            return Err(format!(
                "input {}x{} pools down to an empty feature map",
                self.input_width, self.input_height
            ));
        }

        Ok(())
    }
}
