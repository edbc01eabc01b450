//! Image Preprocessing Module
//!
//! Decodes raw image bytes and converts them into the normalized CHW
//! tensor the classifier expects. Pure functions of their input: the same
//! bytes always produce the same tensor.

use image::{imageops::FilterType, DynamicImage, ImageError};
use ndarray::Array3;

use crate::error::{CoreError, Result};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// One normalized image variant in CHW layout.
///
/// Invariant: shape is `[3, size, size]` with per-channel ImageNet
/// normalization applied.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array3<f32>,
}

impl ImageTensor {
    /// Wrap a CHW array, validating the expected shape.
    pub fn new(data: Array3<f32>, expected_size: u32) -> Result<Self> {
        let shape = data.shape();
        let s = expected_size as usize;
        if shape != [3, s, s] {
            return Err(CoreError::Inference(format!(
                "tensor shape {:?} does not match expected [3, {}, {}]",
                shape, s, s
            )));
        }
        Ok(Self { data })
    }

    /// Spatial size (tensors are square)
    pub fn size(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Raw bit pattern of the tensor contents, used for deterministic
    /// hashing by the stub classifier.
    pub fn to_bits(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * 4);
        for v in self.data.iter() {
            bytes.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        bytes
    }
}

/// Converts raw bytes into classifier-ready tensors.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Target square resolution
    input_size: u32,
}

impl ImagePreprocessor {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Decode raw JPEG/PNG bytes into an image.
    ///
    /// Returns `CoreError::Decode` for bytes that are not a valid image and
    /// `CoreError::UnsupportedFormat` when the container is recognized but
    /// its color mode cannot be handled.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        match image::load_from_memory(bytes) {
            Ok(img) => {
                if img.width() == 0 || img.height() == 0 {
                    return Err(CoreError::UnsupportedFormat(
                        "image has zero dimensions".to_string(),
                    ));
                }
                Ok(img)
            }
            Err(ImageError::Unsupported(e)) => Err(CoreError::UnsupportedFormat(e.to_string())),
            Err(e) => Err(CoreError::Decode(e.to_string())),
        }
    }

    /// Resize to the model resolution and normalize into a CHW tensor.
    pub fn to_tensor(&self, image: &DynamicImage) -> Result<ImageTensor> {
        let resized = image.resize_exact(self.input_size, self.input_size, FilterType::Lanczos3);
        let rgb = resized.to_rgb8();

        let size = self.input_size as usize;
        let mut data = Array3::<f32>::zeros((3, size, size));

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                data[[c, y, x]] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        ImageTensor::new(data, self.input_size)
    }

    /// Decode and normalize in one step.
    pub fn process(&self, bytes: &[u8]) -> Result<ImageTensor> {
        let image = self.decode(bytes)?;
        self.to_tensor(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_png(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_valid_png() {
        let img = DynamicImage::new_rgb8(64, 48);
        let bytes = encode_png(&img);

        let pre = ImagePreprocessor::new(32);
        let decoded = pre.decode(&bytes).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let pre = ImagePreprocessor::new(32);
        let err = pre.decode(b"definitely not an image").unwrap_err();
        assert!(err.is_bad_input());
    }

    #[test]
    fn test_tensor_shape_and_normalization() {
        let img = DynamicImage::new_rgb8(100, 80);
        let pre = ImagePreprocessor::new(32);
        let tensor = pre.to_tensor(&img).unwrap();

        assert_eq!(tensor.data().shape(), &[3, 32, 32]);
        // All-black image: every channel value is (0 - mean) / std
        let expected_r = (0.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((tensor.data()[[0, 0, 0]] - expected_r).abs() < 1e-6);
    }

    #[test]
    fn test_process_is_deterministic() {
        let mut img = image::RgbImage::new(48, 48);
        for (x, y, p) in img.enumerate_pixels_mut() {
            p.0 = [(x * 5) as u8, (y * 3) as u8, ((x + y) * 2) as u8];
        }
        let bytes = encode_png(&DynamicImage::ImageRgb8(img));

        let pre = ImagePreprocessor::new(32);
        let a = pre.process(&bytes).unwrap();
        let b = pre.process(&bytes).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_tensor_shape_mismatch_rejected() {
        let data = Array3::<f32>::zeros((3, 16, 16));
        assert!(ImageTensor::new(data, 32).is_err());
    }
}
