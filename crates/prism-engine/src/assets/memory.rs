use std::collections::HashMap;

use anyhow::{Context, Result};

use super::{Assets, DecodedImage};

/// In-memory assets for tests.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryAssets {
    shaders: HashMap<String, String>,
    images: HashMap<String, DecodedImage>,
}

impl MemoryAssets {
    /// Every asset the viewer loads, with placeholder shader text and a 2x2
    /// white texture.
    pub fn scene() -> Self {
        let mut assets = Self::default();
        for name in [
            crate::scene::GEOMETRY_VERTEX_SHADER,
            crate::scene::GEOMETRY_FRAGMENT_SHADER,
            crate::scene::COMPOSITE_VERTEX_SHADER,
            crate::scene::COMPOSITE_FRAGMENT_SHADER,
        ] {
            assets.shaders.insert(name.to_string(), format!("// {name}"));
        }
        assets.set_image(
            crate::scene::ALBEDO_TEXTURE,
            DecodedImage {
                pixels: vec![255; 16],
                width: 2,
                height: 2,
            },
        );
        assets
    }

    pub fn set_image(&mut self, name: &str, image: DecodedImage) {
        self.images.insert(name.to_string(), image);
    }
}

impl Assets for MemoryAssets {
    fn shader_source(&self, name: &str) -> Result<String> {
        self.shaders
            .get(name)
            .cloned()
            .with_context(|| format!("no shader named {name}"))
    }

    fn decode_image(&self, name: &str) -> Result<DecodedImage> {
        self.images
            .get(name)
            .cloned()
            .with_context(|| format!("no image named {name}"))
    }
}
