use std::path::PathBuf;

use anyhow::Result;
use prism_engine::assets::FsAssets;
use prism_engine::logging::{init_logging, LoggingConfig};
use prism_engine::window::{Runtime, RuntimeConfig};

/// Overrides the asset directory.
const ASSETS_ENV: &str = "PRISM_ASSETS";

/// First of: `$PRISM_ASSETS`, `assets/` next to the executable, this crate's
/// `assets/`.
fn asset_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(ASSETS_ENV) {
        return PathBuf::from(dir);
    }
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("assets")));
    match beside_exe {
        Some(dir) if dir.is_dir() => dir,
        _ => PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets"),
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let assets = FsAssets::new(asset_root());
    log::info!("assets: {}", assets.root().display());

    Runtime::run(RuntimeConfig::default(), assets)
}
