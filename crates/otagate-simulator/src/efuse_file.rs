//! Virtual eFuse image kept in a host file between runs.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use otagate_core::efuse::VirtualEfuse;

/// Load the image at `path`, or a blank chip if the file does not exist yet.
pub fn load(path: &Path) -> Result<VirtualEfuse> {
    match fs::read(path) {
        Ok(bytes) => {
            debug!("Loaded {} byte eFuse image from {}", bytes.len(), path.display());
            VirtualEfuse::from_bytes(&bytes)
                .with_context(|| format!("decoding eFuse image {}", path.display()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No eFuse image at {}, starting from a blank chip", path.display());
            Ok(VirtualEfuse::new())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Persist the burned bits of `efuse` to `path`.
pub fn save(path: &Path, efuse: &VirtualEfuse) -> Result<()> {
    let bytes = efuse.to_bytes().context("encoding eFuse image")?;
    fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    debug!("Saved {} byte eFuse image to {}", bytes.len(), path.display());
    Ok(())
}
