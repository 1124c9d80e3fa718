//! Image preprocessing for the classifier input.
//!
//! Images are forced to RGB, resized to a fixed 224x224, normalized, and
//! laid out as a single-example NCHW batch.

use std::path::Path;

use candle_core::{Device, Tensor};
use image::{DynamicImage, imageops::FilterType};

use crate::error::PipelineError;

/// Spatial resolution the model was trained on.
pub const IMAGE_SIZE: u32 = 224;

/// ImageNet normalization mean values (RGB).
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB).
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel normalization applied after scaling intensities to [0, 1].
///
/// `Scale` matches checkpoints trained on plain [0, 1] inputs; `ImageNet`
/// additionally applies the per-channel mean/std used by ImageNet-pretrained
/// backbones. The variant must match the deployed checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    #[default]
    Scale,
    ImageNet,
}

/// Load the image at `path` and turn it into a model input tensor.
pub fn preprocess_file(
    path: &Path,
    normalization: Normalization,
    device: &Device,
) -> Result<Tensor, PipelineError> {
    let img = image::open(path).map_err(|source| PipelineError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    to_tensor(&img, normalization, device).map_err(PipelineError::from)
}

/// Convert a decoded image into a `(1, 3, 224, 224)` f32 tensor.
pub fn to_tensor(
    img: &DynamicImage,
    normalization: Normalization,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let rgb = img
        .resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::Lanczos3)
        .to_rgb8();

    let num_pixels = (IMAGE_SIZE * IMAGE_SIZE) as usize;
    let mut data = vec![0.0f32; 3 * num_pixels];

    // CHW layout: all R values, then all G values, then all B values.
    for (i, pixel) in rgb.pixels().enumerate() {
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            data[channel * num_pixels + i] = match normalization {
                Normalization::Scale => value,
                Normalization::ImageNet => {
                    (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
                }
            };
        }
    }

    Tensor::from_vec(
        data,
        (1, 3, IMAGE_SIZE as usize, IMAGE_SIZE as usize),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid_image(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(320, 200, Rgb([r, g, b])))
    }

    #[test]
    fn test_tensor_shape() {
        let tensor = to_tensor(&solid_image(10, 20, 30), Normalization::Scale, &Device::Cpu)
            .unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
        assert_eq!(tensor.dtype(), candle_core::DType::F32);
    }

    #[test]
    fn test_scale_normalization() {
        let tensor = to_tensor(&solid_image(255, 0, 51), Normalization::Scale, &Device::Cpu)
            .unwrap();
        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let num_pixels = (IMAGE_SIZE * IMAGE_SIZE) as usize;

        // Solid color survives resizing, so each channel plane is constant.
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[num_pixels] - 0.0).abs() < 1e-6);
        assert!((values[2 * num_pixels] - 0.2).abs() < 1e-6);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_imagenet_normalization() {
        let tensor = to_tensor(&solid_image(0, 0, 0), Normalization::ImageNet, &Device::Cpu)
            .unwrap();
        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let num_pixels = (IMAGE_SIZE * IMAGE_SIZE) as usize;

        for channel in 0..3 {
            let expected = -IMAGENET_MEAN[channel] / IMAGENET_STD[channel];
            assert!((values[channel * num_pixels] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_grayscale_is_forced_to_rgb() {
        let gray = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(64, 64, image::Luma([128])));
        let tensor = to_tensor(&gray, Normalization::Scale, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_missing_file() {
        let err = preprocess_file(
            Path::new("/definitely/not/here.jpg"),
            Normalization::Scale,
            &Device::Cpu,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ImageLoad { .. }));
    }
}
