use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{Assets, DecodedImage};

/// Loads assets from a directory on disk.
#[derive(Debug, Clone)]
pub struct FsAssets {
    root: PathBuf,
}

impl FsAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Assets for FsAssets {
    fn shader_source(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read shader {}", path.display()))
    }

    fn decode_image(&self, name: &str) -> Result<DecodedImage> {
        let path = self.path(name);
        let bytes =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let rgba = image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode {name}"))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("decoded {name}: {width}x{height}");
        Ok(DecodedImage {
            pixels: rgba.into_raw(),
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipped_assets() -> FsAssets {
        FsAssets::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("../prism-viewer/assets"))
    }

    #[test]
    fn missing_shader_names_the_path() {
        let assets = FsAssets::new("/nonexistent");
        let err = assets.shader_source("nope.wgsl").unwrap_err();
        assert!(format!("{err:#}").contains("nope.wgsl"));
    }

    #[test]
    fn shipped_texture_decodes_to_rgba8() {
        let image = shipped_assets().decode_image("texture.png").unwrap();
        image.validate("texture.png").unwrap();
    }

    #[test]
    fn shipped_shaders_are_readable() {
        let assets = shipped_assets();
        for name in [
            crate::scene::GEOMETRY_VERTEX_SHADER,
            crate::scene::GEOMETRY_FRAGMENT_SHADER,
            crate::scene::COMPOSITE_VERTEX_SHADER,
            crate::scene::COMPOSITE_FRAGMENT_SHADER,
        ] {
            assert!(!assets.shader_source(name).unwrap().is_empty(), "{name}");
        }
    }
}
