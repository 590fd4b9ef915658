//! Explainability Engine (gradient-weighted class activation mapping)
//!
//! For a target class c and target-layer activations A (K channels):
//!
//! 1. g = dS_c / dA                      (backward pass)
//! 2. alpha_k = mean_{y,x} g[k, y, x]    (channel importance)
//! 3. L = sum_k alpha_k * A[k]           (weighted activation sum)
//! 4. L = max(L, 0)                      (positive evidence only)
//! 5. L = (L - min) / (max - min)        (uniform maps -> all zero)
//! 6. upsample to the model input, then to the original image, colourise
//!    and alpha-blend over the original
//!
//! Deterministic for identical weights, target and input.

use image::RgbImage;
use tracing::debug;

use crate::config::defaults::DEGENERATE_RANGE_EPSILON;
use crate::imaging::{blend_heatmap, resize_bilinear};
use crate::model::{ExplainTarget, FeatureMap, ForwardArtifacts, ModelLease};
use crate::types::ExplanationMap;

#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    /// Artifacts do not belong to the inference call being explained.
    /// Always a programming error.
    #[error(
        "stale forward artifacts: artifacts are from inference {artifact_inference} (lease {artifact_lease}), \
         target is inference {target_inference} (lease {current_lease})"
    )]
    StaleArtifact {
        artifact_inference: u64,
        artifact_lease: u64,
        target_inference: u64,
        current_lease: u64,
    },
}

/// Explanation of one inference: the normalised importance map at model
/// input resolution and the colour overlay at the original resolution.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub map: ExplanationMap,
    pub overlay: RgbImage,
}

/// Grad-CAM engine. Stateless apart from the overlay blend weight.
#[derive(Debug, Clone)]
pub struct GradCam {
    overlay_alpha: f32,
}

impl GradCam {
    pub const fn new(overlay_alpha: f32) -> Self {
        Self { overlay_alpha }
    }

    /// Explain `target` using the artifacts of that same inference call.
    ///
    /// `lease` must be the lease the artifacts were produced under; the
    /// backward pass runs before the lease is released.
    pub fn explain(
        &self,
        lease: &ModelLease<'_>,
        artifacts: ForwardArtifacts,
        target: ExplainTarget,
        original: &RgbImage,
    ) -> Result<Explanation, ExplainError> {
        if artifacts.inference_id != target.inference_id || artifacts.lease_id != lease.id() {
            return Err(ExplainError::StaleArtifact {
                artifact_inference: artifacts.inference_id,
                artifact_lease: artifacts.lease_id,
                target_inference: target.inference_id,
                current_lease: lease.id(),
            });
        }

        let gradients = lease.target_gradients(&artifacts, target.class);
        let (raw, raw_min, raw_max) = class_activation_map(&artifacts.cache.activations, &gradients);
        let acts = &artifacts.cache.activations;

        let (input_w, input_h) = lease.input_size();
        let values = resize_bilinear(&raw, acts.width, acts.height, input_w as usize, input_h as usize)
            .into_iter()
            .map(|v| v.clamp(0.0, 1.0))
            .collect();
        let map = ExplanationMap {
            width: input_w,
            height: input_h,
            values,
            raw_min,
            raw_max,
        };

        let full = resize_bilinear(
            &map.values,
            input_w as usize,
            input_h as usize,
            original.width() as usize,
            original.height() as usize,
        );
        let overlay = blend_heatmap(original, &full, self.overlay_alpha);

        debug!(
            inference_id = target.inference_id,
            class = %target.class,
            raw_min,
            raw_max,
            degenerate = map.is_degenerate(),
            "Explanation computed"
        );

        Ok(Explanation { map, overlay })
    }
}

/// Steps 2-5 at feature resolution. Returns the rescaled map and the
/// clipped map's min/max.
pub fn class_activation_map(activations: &FeatureMap, gradients: &FeatureMap) -> (Vec<f32>, f32, f32) {
    let plane = activations.plane();
    let mut cam = vec![0.0f32; plane];

    for k in 0..activations.channels {
        let grad = gradients.channel(k);
        let alpha = grad.iter().sum::<f32>() / plane as f32;
        if alpha == 0.0 {
            continue;
        }
        for (c, &a) in cam.iter_mut().zip(activations.channel(k)) {
            *c += alpha * a;
        }
    }

    for v in &mut cam {
        *v = v.max(0.0);
    }

    let min = cam.iter().copied().fold(f32::INFINITY, f32::min);
    let max = cam.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if plane == 0 {
        return (cam, 0.0, 0.0);
    }

    let range = max - min;
    if !range.is_finite() || range <= DEGENERATE_RANGE_EPSILON {
        cam.fill(0.0);
    } else {
        for v in &mut cam {
            *v = (*v - min) / range;
        }
    }
    (cam, min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImagingConfig;
    use crate::model::{Classifier, ModelArchitecture, ModelCheckpoint};
    use image::Rgb;

    fn classifier(seed: u64) -> Classifier {
        let arch = ModelArchitecture {
            input_width: 16,
            input_height: 16,
            conv_channels: vec![4, 6],
            kernel_size: 3,
            pool_between_blocks: true,
        };
        Classifier::from_checkpoint(ModelCheckpoint::seeded(&arch, seed), &ImagingConfig::default()).unwrap()
    }

    fn image() -> RgbImage {
        RgbImage::from_fn(30, 20, |x, y| Rgb([(x * 8) as u8, (y * 12) as u8, ((x + y) * 5) as u8]))
    }

    #[test]
    fn test_cam_is_clipped_and_rescaled() {
        let acts = FeatureMap {
            channels: 2,
            height: 1,
            width: 3,
            data: vec![1.0, 2.0, 3.0, 3.0, 0.0, 0.0],
        };
        // alpha = [1, -1] -> L = [-2, 2, 3] -> clip [0, 2, 3] -> [0, 2/3, 1]
        let grads = FeatureMap {
            channels: 2,
            height: 1,
            width: 3,
            data: vec![1.0, 1.0, 1.0, -1.0, -1.0, -1.0],
        };
        let (cam, min, max) = class_activation_map(&acts, &grads);
        assert_eq!(min, 0.0);
        assert_eq!(max, 3.0);
        assert!((cam[0] - 0.0).abs() < 1e-6);
        assert!((cam[1] - 2.0 / 3.0).abs() < 1e-6);
        assert!((cam[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_gradient_gives_zero_map() {
        let acts = FeatureMap {
            channels: 1,
            height: 2,
            width: 2,
            data: vec![1.0, 2.0, 3.0, 4.0],
        };
        let grads = FeatureMap::zeros(1, 2, 2);
        let (cam, _, _) = class_activation_map(&acts, &grads);
        assert!(cam.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_explain_output_range_and_shape() {
        let classifier = classifier(5);
        let engine = GradCam::new(0.5);
        let img = image();

        let mut lease = classifier.acquire();
        let (prediction, artifacts) = lease.predict(&img).unwrap();
        let target = prediction.target();
        let gradients = lease.target_gradients(&artifacts, target.class);
        let (cam, raw_min, raw_max) = class_activation_map(&artifacts.cache.activations, &gradients);
        let explanation = engine.explain(&lease, artifacts, target, &img).unwrap();

        // Rescaled at feature resolution: the peak is exactly 1
        if raw_max - raw_min > DEGENERATE_RANGE_EPSILON {
            let peak = cam.iter().copied().fold(0.0f32, f32::max);
            assert!((peak - 1.0).abs() < 1e-6);
        }

        // Upsampling may average the peak down, never above 1
        let map = &explanation.map;
        assert_eq!((map.width, map.height), (16, 16));
        assert_eq!(map.values.len(), 256);
        assert!(map.values.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
        assert!(map.max_value() <= 1.0);
        assert_eq!((map.raw_min, map.raw_max), (raw_min, raw_max));
        assert_eq!(explanation.overlay.dimensions(), img.dimensions());
    }

    #[test]
    fn test_explain_is_deterministic() {
        let classifier = classifier(9);
        let engine = GradCam::new(0.5);
        let img = image();

        let run = || {
            let mut lease = classifier.acquire();
            let (prediction, artifacts) = lease.predict(&img).unwrap();
            engine.explain(&lease, artifacts, prediction.target(), &img).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.map, b.map);
        assert_eq!(a.overlay, b.overlay);
    }

    #[test]
    fn test_mismatched_artifacts_are_stale() {
        let classifier = classifier(5);
        let engine = GradCam::new(0.5);
        let img = image();

        let mut lease = classifier.acquire();
        let (first, first_artifacts) = lease.predict(&img).unwrap();
        let (second, _second_artifacts) = lease.predict(&img).unwrap();
        assert_ne!(first.inference_id, second.inference_id);

        let err = engine.explain(&lease, first_artifacts, second.target(), &img).unwrap_err();
        assert!(matches!(err, ExplainError::StaleArtifact { .. }));
    }

    #[test]
    fn test_artifacts_from_released_lease_are_stale() {
        let classifier = classifier(5);
        let engine = GradCam::new(0.5);
        let img = image();

        let (prediction, artifacts) = {
            let mut lease = classifier.acquire();
            lease.predict(&img).unwrap()
        };

        let lease = classifier.acquire();
        let err = engine.explain(&lease, artifacts, prediction.target(), &img).unwrap_err();
        assert!(matches!(err, ExplainError::StaleArtifact { .. }));
    }

    #[test]
    fn test_zero_head_gives_zero_map_without_nan() {
        let arch = ModelArchitecture {
            input_width: 8,
            input_height: 8,
            conv_channels: vec![3],
            kernel_size: 3,
            pool_between_blocks: false,
        };
        let mut cp = ModelCheckpoint::seeded(&arch, 2);
        cp.head.weights.iter_mut().for_each(|w| *w = 0.0);
        let classifier = Classifier::from_checkpoint(cp, &ImagingConfig::default()).unwrap();
        let engine = GradCam::new(0.5);
        let img = image();

        let mut lease = classifier.acquire();
        let (prediction, artifacts) = lease.predict(&img).unwrap();
        let explanation = engine.explain(&lease, artifacts, prediction.target(), &img).unwrap();
        assert!(explanation.map.is_degenerate());
        assert!(explanation.map.values.iter().all(|v| v.is_finite()));
    }
}
