//! Convolutional classifier network: forward pass with cached target-layer
//! activations, and the backward pass from a class logit down to those
//! activations.
//!
//! ```text
//! x ─► [conv k×k ─► ReLU ─► (maxpool 2×2)] × N ─► A (target layer)
//!   ─► GAP ─► p[k] = mean(A[k]) ─► logits = W·p + b ─► softmax
//!
//! dS_c/dp[k]      = W[c][k]
//! dS_c/dA[k,y,x]  = W[c][k] / (H·W)
//! ```

use rayon::prelude::*;

use super::checkpoint::{ConvLayer, LinearLayer, ModelCheckpoint};

/// Channel-major activation tensor `[c][y][x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl FeatureMap {
    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub const fn plane(&self) -> usize {
        self.height * self.width
    }

    /// Row-major slice of one channel.
    pub fn channel(&self, c: usize) -> &[f32] {
        let plane = self.plane();
        &self.data[c * plane..(c + 1) * plane]
    }
}

/// Intermediate values from one forward pass, needed for the backward pass.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    /// Target layer activations (output of the last conv block).
    pub activations: FeatureMap,
    /// Globally pooled activations, one per channel.
    pub pooled: Vec<f32>,
    /// Raw class scores before softmax.
    pub logits: Vec<f32>,
}

/// Inference-only view over a validated checkpoint.
#[derive(Debug, Clone)]
pub struct ConvNet {
    checkpoint: ModelCheckpoint,
}

impl ConvNet {
    pub fn new(checkpoint: ModelCheckpoint) -> Result<Self, String> {
        checkpoint.validate()?;
        Ok(Self { checkpoint })
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.checkpoint.input_width, self.checkpoint.input_height)
    }

    pub fn name(&self) -> &str {
        &self.checkpoint.metadata.name
    }

    /// Run the network on a CHW input of the checkpoint's input size.
    pub fn forward(&self, input: &[f32]) -> ForwardCache {
        let mut x = FeatureMap {
            channels: 3,
            height: self.checkpoint.input_height as usize,
            width: self.checkpoint.input_width as usize,
            data: input.to_vec(),
        };

        for layer in &self.checkpoint.conv_layers {
            x = conv2d_relu(&x, layer);
            if layer.pool {
                x = max_pool2(&x);
            }
        }

        let plane = x.plane() as f32;
        let pooled: Vec<f32> = (0..x.channels)
            .map(|c| x.channel(c).iter().sum::<f32>() / plane)
            .collect();
        let logits = linear(&pooled, &self.checkpoint.head);

        ForwardCache {
            activations: x,
            pooled,
            logits,
        }
    }

    /// Gradient of logit `class_index` with respect to the cached target
    /// layer activations.
    pub fn backward_to_features(&self, cache: &ForwardCache, class_index: usize) -> FeatureMap {
        let head = &self.checkpoint.head;

        // dS/dlogits: one-hot on the target class
        let mut d_logits = vec![0.0f32; head.out_features];
        if let Some(slot) = d_logits.get_mut(class_index) {
            *slot = 1.0;
        }

        // Through the linear head: dS/dp[k] = sum_o dS/dlogit[o] * W[o][k]
        let mut d_pooled = vec![0.0f32; head.in_features];
        for (o, &g) in d_logits.iter().enumerate() {
            if g == 0.0 {
                continue;
            }
            let row = &head.weights[o * head.in_features..(o + 1) * head.in_features];
            for (d, &w) in d_pooled.iter_mut().zip(row) {
                *d += g * w;
            }
        }

        // Through global average pooling: spread evenly over each channel
        let acts = &cache.activations;
        let plane = acts.plane();
        let mut grads = FeatureMap::zeros(acts.channels, acts.height, acts.width);
        for (c, chunk) in grads.data.chunks_mut(plane).enumerate() {
            let g = d_pooled.get(c).copied().unwrap_or(0.0) / plane as f32;
            chunk.fill(g);
        }
        grads
    }
}

/// Numerically stable softmax in f64.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&l| f64::from(l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn conv2d_relu(input: &FeatureMap, layer: &ConvLayer) -> FeatureMap {
    let (h, w) = (input.height, input.width);
    let k = layer.kernel_size;
    let pad = (k / 2) as isize;
    let plane = h * w;
    let mut out = FeatureMap::zeros(layer.out_channels, h, w);

    out.data.par_chunks_mut(plane).enumerate().for_each(|(o, out_plane)| {
        out_plane.fill(layer.bias[o]);
        for i in 0..layer.in_channels {
            let in_plane = input.channel(i);
            let kernel = &layer.weights[(o * layer.in_channels + i) * k * k..(o * layer.in_channels + i + 1) * k * k];
            for ky in 0..k {
                let dy = ky as isize - pad;
                for kx in 0..k {
                    let dx = kx as isize - pad;
                    let wv = kernel[ky * k + kx];
                    if wv == 0.0 {
                        continue;
                    }
                    for y in 0..h {
                        let sy = y as isize + dy;
                        if sy < 0 || sy >= h as isize {
                            continue;
                        }
                        let src_row = sy as usize * w;
                        let dst_row = y * w;
                        for x in 0..w {
                            let sx = x as isize + dx;
                            if sx < 0 || sx >= w as isize {
                                continue;
                            }
                            out_plane[dst_row + x] += wv * in_plane[src_row + sx as usize];
                        }
                    }
                }
            }
        }
        for v in out_plane.iter_mut() {
            *v = v.max(0.0);
        }
    });

    out
}

fn max_pool2(input: &FeatureMap) -> FeatureMap {
    let (oh, ow) = (input.height / 2, input.width / 2);
    let mut out = FeatureMap::zeros(input.channels, oh, ow);
    for c in 0..input.channels {
        let src = input.channel(c);
        for y in 0..oh {
            for x in 0..ow {
                let a = src[(2 * y) * input.width + 2 * x];
                let b = src[(2 * y) * input.width + 2 * x + 1];
                let d = src[(2 * y + 1) * input.width + 2 * x];
                let e = src[(2 * y + 1) * input.width + 2 * x + 1];
                out.data[c * oh * ow + y * ow + x] = a.max(b).max(d).max(e);
            }
        }
    }
    out
}

fn linear(input: &[f32], layer: &LinearLayer) -> Vec<f32> {
    (0..layer.out_features)
        .map(|o| {
            let row = &layer.weights[o * layer.in_features..(o + 1) * layer.in_features];
            layer.bias[o] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::checkpoint::{CheckpointMetadata, ModelArchitecture};
    use chrono::Utc;

    /// One 1x1 conv that copies the red channel, head = [[1], [-1]].
    fn identity_checkpoint() -> ModelCheckpoint {
        ModelCheckpoint {
            version: 1,
            metadata: CheckpointMetadata {
                name: "identity".to_string(),
                created_at: Utc::now(),
                description: String::new(),
            },
            input_width: 4,
            input_height: 2,
            conv_layers: vec![ConvLayer {
                in_channels: 3,
                out_channels: 1,
                kernel_size: 1,
                pool: false,
                weights: vec![1.0, 0.0, 0.0],
                bias: vec![0.0],
            }],
            head: LinearLayer {
                in_features: 1,
                out_features: 2,
                weights: vec![1.0, -1.0],
                bias: vec![0.0, 0.0],
            },
        }
    }

    #[test]
    fn test_forward_identity() {
        let net = ConvNet::new(identity_checkpoint()).unwrap();
        let mut input = vec![0.0; 3 * 8];
        input[..8].copy_from_slice(&[1.0, 2.0, 3.0, 4.0, -1.0, -2.0, 0.0, 1.0]);

        let cache = net.forward(&input);
        // ReLU clips the negatives
        assert_eq!(cache.activations.data, vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 1.0]);
        assert!((cache.pooled[0] - 11.0 / 8.0).abs() < 1e-6);
        assert!((cache.logits[0] - 11.0 / 8.0).abs() < 1e-6);
        assert!((cache.logits[1] + 11.0 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_backward_matches_head_weights() {
        let net = ConvNet::new(identity_checkpoint()).unwrap();
        let cache = net.forward(&vec![0.5; 24]);

        let g0 = net.backward_to_features(&cache, 0);
        let g1 = net.backward_to_features(&cache, 1);
        assert!(g0.data.iter().all(|&g| (g - 1.0 / 8.0).abs() < 1e-7));
        assert!(g1.data.iter().all(|&g| (g + 1.0 / 8.0).abs() < 1e-7));
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let arch = ModelArchitecture {
            input_width: 6,
            input_height: 6,
            conv_channels: vec![3, 4],
            kernel_size: 3,
            pool_between_blocks: true,
        };
        let net = ConvNet::new(ModelCheckpoint::seeded(&arch, 11)).unwrap();
        let input: Vec<f32> = (0..3 * 36).map(|i| ((i * 7) % 13) as f32 / 13.0 - 0.5).collect();
        let cache = net.forward(&input);
        let grads = net.backward_to_features(&cache, 1);

        // Perturb one pooled feature and re-evaluate the head
        let eps = 1e-3;
        let mut pooled = cache.pooled.clone();
        pooled[2] += eps;
        let bumped = linear(&pooled, &net.checkpoint.head);
        let numeric = (bumped[1] - cache.logits[1]) / eps;
        let analytic: f32 = grads.channel(2).iter().sum();
        assert!((numeric - analytic).abs() < 1e-2, "numeric {} vs analytic {}", numeric, analytic);
    }

    #[test]
    fn test_max_pool_odd_size_floors() {
        let fm = FeatureMap {
            channels: 1,
            height: 3,
            width: 3,
            data: vec![1.0, 5.0, 0.0, 2.0, 3.0, 0.0, 9.0, 9.0, 9.0],
        };
        let pooled = max_pool2(&fm);
        assert_eq!((pooled.height, pooled.width), (1, 1));
        assert_eq!(pooled.data, vec![5.0]);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1000.0, -1000.0]);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs.iter().all(|p| p.is_finite() && *p >= 0.0));
    }
}
