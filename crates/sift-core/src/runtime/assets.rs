//! Copying packaged model weights into the private data directory.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{SiftError, SiftResult};

/// Path of the local copy of `asset` inside `models_dir`, copying it on first use.
///
/// The copy goes through a `.part` file and a rename so an interrupted copy
/// is never mistaken for a complete model.
pub fn ensure_local_model(asset: &Path, models_dir: &Path) -> SiftResult<PathBuf> {
    let file_name = asset
        .file_name()
        .ok_or_else(|| SiftError::validation(format!("model asset {} has no file name", asset.display())))?;
    let local = models_dir.join(file_name);

    if local.exists() {
        debug!(path = %local.display(), "Using local model copy");
        return Ok(local);
    }
    if !asset.exists() {
        return Err(SiftError::asset_missing(asset));
    }

    std::fs::create_dir_all(models_dir)?;
    let partial = local.with_extension("part");
    std::fs::copy(asset, &partial)?;
    std::fs::rename(&partial, &local)?;
    info!(from = %asset.display(), to = %local.display(), "Copied model asset");
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copies_once() {
        let dir = TempDir::new().unwrap();
        let asset = dir.path().join("bundle").join("model.gguf");
        std::fs::create_dir_all(asset.parent().unwrap()).unwrap();
        std::fs::write(&asset, b"weights").unwrap();
        let models = dir.path().join("data").join("models");

        let local = ensure_local_model(&asset, &models).unwrap();
        assert_eq!(local, models.join("model.gguf"));
        assert_eq!(std::fs::read(&local).unwrap(), b"weights");

        std::fs::write(&asset, b"changed").unwrap();
        let again = ensure_local_model(&asset, &models).unwrap();
        assert_eq!(std::fs::read(again).unwrap(), b"weights");
    }

    #[test]
    fn test_missing_asset() {
        let dir = TempDir::new().unwrap();
        let err = ensure_local_model(&dir.path().join("nope.gguf"), dir.path()).unwrap_err();
        assert!(matches!(err, SiftError::ModelUnavailable { .. }));
    }
}
