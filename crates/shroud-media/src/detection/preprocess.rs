//! Image to tensor conversion.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{s, Array4, ArrayViewMut3};

/// Per-channel normalization applied as `(pixel / 255 - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// Plain `[0, 1]` scaling (YOLOv8).
    pub const UNIT: Self = Self {
        mean: [0.0; 3],
        std: [1.0; 3],
    };

    /// `(pixel - 127) / 128` (UltraFace).
    pub const CENTERED: Self = Self {
        mean: [127.0 / 255.0; 3],
        std: [128.0 / 255.0; 3],
    };

    /// ImageNet statistics (DB text detectors).
    pub const IMAGENET: Self = Self {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    /// `[-1, 1]` scaling (CRNN recognizers).
    pub const SIGNED: Self = Self {
        mean: [0.5; 3],
        std: [0.5; 3],
    };

    #[inline]
    fn apply(&self, channel: usize, value: u8) -> f32 {
        (value as f32 / 255.0 - self.mean[channel]) / self.std[channel]
    }
}

/// Resize `image` to `width` x `height` and lay it out as a `[1, 3, H, W]`
/// tensor.
pub fn image_to_tensor(image: &RgbImage, width: u32, height: u32, norm: Normalization) -> Array4<f32> {
    let resized;
    let source = if image.dimensions() == (width, height) {
        image
    } else {
        resized = imageops::resize(image, width, height, FilterType::Triangle);
        &resized
    };

    let mut tensor = Array4::zeros((1, 3, height as usize, width as usize));
    write_chw(tensor.slice_mut(s![0, .., .., ..]), source, norm);
    tensor
}

/// Write `image` into the top-left corner of a `[3, H, W]` slot, HWC -> CHW.
/// Pixels outside the image keep their current value.
pub fn write_chw(mut slot: ArrayViewMut3<'_, f32>, image: &RgbImage, norm: Normalization) {
    let (_, slot_h, slot_w) = slot.dim();
    let h = (image.height() as usize).min(slot_h);
    let w = (image.width() as usize).min(slot_w);

    for y in 0..h {
        for x in 0..w {
            let pixel = image.get_pixel(x as u32, y as u32);
            for c in 0..3 {
                slot[[c, y, x]] = norm.apply(c, pixel[c]);
            }
        }
    }
}
