//! Asset loading: shader sources and decoded images.

mod fs;
#[cfg(test)]
pub(crate) mod memory;

use anyhow::Result;

pub use fs::FsAssets;

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// Rejects empty images and pixel buffers that do not hold exactly
    /// `width * height` RGBA8 texels.
    pub fn validate(&self, name: &str) -> Result<()> {
        anyhow::ensure!(
            self.width > 0 && self.height > 0,
            "`{name}` decoded to an empty {}x{} image",
            self.width,
            self.height
        );
        let expected = self.width as usize * self.height as usize * 4;
        anyhow::ensure!(
            self.pixels.len() == expected,
            "`{name}` has {} bytes of pixels, expected {expected}",
            self.pixels.len()
        );
        Ok(())
    }
}

/// Source of shader text and image data, addressed by relative name.
pub trait Assets {
    fn shader_source(&self, name: &str) -> Result<String>;

    /// Decodes `name`, converting to RGBA8.
    fn decode_image(&self, name: &str) -> Result<DecodedImage>;
}

impl<A: Assets + ?Sized> Assets for &A {
    fn shader_source(&self, name: &str) -> Result<String> {
        (**self).shader_source(name)
    }

    fn decode_image(&self, name: &str) -> Result<DecodedImage> {
        (**self).decode_image(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_image_is_rejected() {
        let image = DecodedImage {
            pixels: Vec::new(),
            width: 0,
            height: 4,
        };
        assert!(image.validate("empty.png").is_err());
    }

    #[test]
    fn short_pixel_buffer_is_rejected() {
        let image = DecodedImage {
            pixels: vec![0; 15],
            width: 2,
            height: 2,
        };
        let err = image.validate("short.png").unwrap_err();
        assert!(err.to_string().contains("expected 16"));
    }
}
