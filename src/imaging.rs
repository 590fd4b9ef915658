//! Image utilities shared by the classifier, the explainer and the report
//! renderer: decoding, model-input preprocessing, scalar-field resampling,
//! colour mapping and PNG encoding.

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Luma, Rgb, RgbImage};
use std::io::Cursor;

/// Decode an encoded image (PNG/JPEG/BMP) and convert it to RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Encode an RGB image as PNG.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image.clone()).write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)?;
    Ok(out)
}

/// Resize + normalise an image into a CHW tensor for the model.
///
/// Deterministic and side-effect free: the same image always produces
/// the same tensor.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(width: u32, height: u32, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { width, height, mean, std }
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Returns `None` for an image with a zero dimension.
    pub fn tensor(&self, image: &RgbImage) -> Option<Vec<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }

        let resized = if image.dimensions() == (self.width, self.height) {
            image.clone()
        } else {
            image::imageops::resize(image, self.width, self.height, FilterType::Triangle)
        };

        let plane = (self.width * self.height) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let v = f32::from(pixel[c]) / 255.0;
                data[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        Some(data)
    }
}

/// Resample a row-major score field with a triangle (bilinear) filter.
/// Scores are clamped to [0, 1].
pub fn resize_bilinear(src: &[f32], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<f32> {
    let (Ok(sw), Ok(sh), Ok(dw), Ok(dh)) = (
        u32::try_from(src_w),
        u32::try_from(src_h),
        u32::try_from(dst_w),
        u32::try_from(dst_h),
    ) else {
        return vec![0.0; dst_w * dst_h];
    };
    let Some(field) = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(sw, sh, src.to_vec()) else {
        return vec![0.0; dst_w * dst_h];
    };
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
        return vec![0.0; dst_w * dst_h];
    }

    image::imageops::resize(&field, dw, dh, FilterType::Triangle)
        .into_raw()
        .into_iter()
        .map(|v| v.clamp(0.0, 1.0))
        .collect()
}

/// Jet colour map: 0 -> dark blue, 0.5 -> green, 1 -> dark red.
pub fn jet(value: f32) -> [f32; 3] {
    let v = value.clamp(0.0, 1.0);
    let channel = |offset: f32| (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Colourise `map` (row-major, `width` x `height` of `base`) and blend it
/// over `base` with `alpha` weight on the heat map.
pub fn blend_heatmap(base: &RgbImage, map: &[f32], alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = RgbImage::new(base.width(), base.height());
    for (i, (x, y, pixel)) in base.enumerate_pixels().enumerate() {
        let heat = jet(map.get(i).copied().unwrap_or(0.0));
        let mut blended = [0u8; 3];
        for c in 0..3 {
            let orig = f32::from(pixel[c]) / 255.0;
            let v = alpha * heat[c] + (1.0 - alpha) * orig;
            blended[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        out.put_pixel(x, y, Rgb(blended));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_and_normalisation() {
        let pre = Preprocessor::new(8, 4, [0.5, 0.5, 0.5], [0.5, 0.5, 0.5]);
        let img = RgbImage::from_pixel(16, 16, Rgb([255, 0, 255]));
        let t = pre.tensor(&img).unwrap();

        assert_eq!(t.len(), 3 * 8 * 4);
        // (1.0 - 0.5) / 0.5 = 1, (0.0 - 0.5) / 0.5 = -1
        assert!(t[..32].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(t[32..64].iter().all(|&v| (v + 1.0).abs() < 1e-6));
        assert!(t[64..].iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_tensor_is_deterministic() {
        let pre = Preprocessor::new(7, 5, [0.485, 0.456, 0.406], [0.229, 0.224, 0.225]);
        let img = RgbImage::from_fn(23, 11, |x, y| Rgb([(x * 10) as u8, (y * 20) as u8, 77]));
        assert_eq!(pre.tensor(&img), pre.tensor(&img));
    }

    #[test]
    fn test_tensor_rejects_empty_image() {
        let pre = Preprocessor::new(8, 8, [0.0; 3], [1.0; 3]);
        assert!(pre.tensor(&RgbImage::new(0, 5)).is_none());
    }

    #[test]
    fn test_resize_bilinear_preserves_range() {
        let src = vec![0.0, 1.0, 0.25, 0.75];
        let out = resize_bilinear(&src, 2, 2, 9, 7);
        assert_eq!(out.len(), 63);
        assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_resize_bilinear_constant_field() {
        let src = vec![0.4; 12];
        let out = resize_bilinear(&src, 4, 3, 10, 10);
        assert!(out.iter().all(|&v| (v - 0.4).abs() < 1e-5));
    }

    #[test]
    fn test_resize_bilinear_rejects_mismatched_buffer() {
        let out = resize_bilinear(&[0.5; 3], 2, 2, 4, 4);
        assert_eq!(out, vec![0.0; 16]);
    }

    #[test]
    fn test_jet_endpoints() {
        let low = jet(0.0);
        let high = jet(1.0);
        assert!(low[2] > 0.4 && low[0] == 0.0);
        assert!(high[0] > 0.4 && high[2] == 0.0);
    }

    #[test]
    fn test_blend_alpha_zero_keeps_original() {
        let base = RgbImage::from_pixel(3, 3, Rgb([10, 20, 30]));
        let out = blend_heatmap(&base, &[1.0; 9], 0.0);
        assert_eq!(out, base);
    }

    #[test]
    fn test_png_roundtrip() {
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let png = encode_png(&img).unwrap();
        assert_eq!(decode_rgb(&png).unwrap(), img);
    }
}
