use std::fmt;

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Fixed-size RGBA bitmap for a launcher. Every icon handed out by a
/// registry has the same dimensions, reported by
/// [`LauncherRegistry::icon_size`](crate::LauncherRegistry::icon_size).
#[derive(Clone, PartialEq, Eq)]
pub struct Icon {
    pixels: RgbaImage,
}

impl Icon {
    /// Scale a native icon of arbitrary size down (or up) to the
    /// registry's icon dimensions.
    pub(crate) fn scaled(image: &DynamicImage, (width, height): (u32, u32)) -> Self {
        let pixels = if image.width() == width && image.height() == height {
            image.to_rgba8()
        } else {
            image::imageops::resize(image, width, height, FilterType::Triangle)
        };
        Self { pixels }
    }

    /// Generate the shared placeholder icon used when the OS has no icon
    /// for a program: a deterministic pattern of 8x8 grayscale blocks.
    pub(crate) fn placeholder(width: u32, height: u32) -> Self {
        const SEED: u64 = 0x6f70_656e_7769_7468;

        let mut pixels = ImageBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let block = (x / 8) * 8 + (y / 8);
                let mut block_rng = ChaCha8Rng::seed_from_u64(SEED + block as u64);

                let intensity = if block_rng.r#gen::<f32>() > 0.5 {
                    200u8
                } else {
                    50u8
                };
                pixels.put_pixel(x, y, Rgba([intensity, intensity, intensity, 255]));
            }
        }
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Raw RGBA pixel data.
    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Encode the icon as PNG, ready to hand to an image widget.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        let encoder = PngEncoder::new(&mut bytes);
        self.pixels.write_with_encoder(encoder)?;
        Ok(bytes)
    }
}

impl fmt::Debug for Icon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Icon")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_deterministic() {
        assert_eq!(Icon::placeholder(48, 48), Icon::placeholder(48, 48));
    }

    #[test]
    fn placeholder_has_requested_dimensions() {
        let icon = Icon::placeholder(32, 16);
        assert_eq!((icon.width(), icon.height()), (32, 16));
    }

    #[test]
    fn scaled_resizes_to_target() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            128,
            128,
            Rgba([10, 20, 30, 255]),
        ));
        let icon = Icon::scaled(&source, (48, 48));
        assert_eq!((icon.width(), icon.height()), (48, 48));
        assert_eq!(icon.as_rgba().get_pixel(20, 20), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn png_encoding_produces_data() {
        let png = Icon::placeholder(16, 16).to_png().unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    }
}
