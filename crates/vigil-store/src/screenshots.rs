use std::path::{Path, PathBuf};
use tracing::debug;

use vigil_core::{Result, VigilError};

/// Content-addressed blob store for desktop screenshots.
///
/// A screenshot's reference is the BLAKE3 hex digest of its bytes, so storing
/// the same image twice yields the same reference and one file.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Store image bytes and return their reference.
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(VigilError::validation("screenshot", "image is empty"));
        }
        let reference = blake3::hash(bytes).to_hex().to_string();
        let path = self.path_for(&reference);
        if !path.exists() {
            std::fs::write(&path, bytes)?;
            debug!(screenshot = %reference, size = bytes.len(), "stored screenshot");
        }
        Ok(reference)
    }

    /// Read the image stored under `reference`.
    pub fn get(&self, reference: &str) -> Result<Vec<u8>> {
        if !is_valid_ref(reference) {
            return Err(VigilError::validation(
                "screenshot_ref",
                "must be a 64-character hex digest",
            ));
        }
        let path = self.path_for(reference);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VigilError::NotFound(format!("screenshot {reference}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, reference: &str) -> PathBuf {
        self.dir.join(format!("{reference}.png"))
    }
}

fn is_valid_ref(reference: &str) -> bool {
    reference.len() == 64 && reference.bytes().all(|b| b.is_ascii_hexdigit())
}
