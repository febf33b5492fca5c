//! Artifact store — decoded image payloads as temp files.
//!
//! The host renders images from files, not inline bytes, so every image
//! payload is decoded and persisted to a uniquely named file. A corrupt or
//! undecodable payload must degrade the display, not abort the cell's
//! execution reporting: the fallback is a fresh empty file under a
//! distinguishable prefix, and the returned path is always valid.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Write;
use std::path::PathBuf;

use crate::types::ArtifactConfig;

const IMAGE_PREFIX: &str = "cellbridge-img-";
const BLANK_PREFIX: &str = "cellbridge-blank-";

/// Writes decoded image payloads to uniquely named files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            dir: config
                .dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Decode a base64 image payload and persist it, returning the path.
    ///
    /// Strips an optional `data:...;base64,` prefix and ignores embedded
    /// whitespace (kernels wrap base64 at 76 columns). Never fails: on any
    /// decode or write problem the returned path points at a blank
    /// placeholder file instead.
    pub fn store_image(&self, payload: &str) -> PathBuf {
        let raw = strip_data_uri(payload);
        let cleaned: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();

        match STANDARD.decode(cleaned.as_bytes()) {
            Ok(bytes) => match self.persist(IMAGE_PREFIX, &bytes) {
                Ok(path) => return path,
                Err(e) => tracing::warn!("image write failed, using blank artifact: {}", e),
            },
            Err(e) => tracing::warn!("image decode failed, using blank artifact: {}", e),
        }

        match self.persist(BLANK_PREFIX, &[]) {
            Ok(path) => path,
            Err(e) => {
                // Even the blank write failed; hand back the path we would
                // have used so the host still gets a well-formed event.
                tracing::warn!("blank artifact write failed: {}", e);
                self.dir
                    .join(format!("{}{}.png", BLANK_PREFIX, uuid::Uuid::new_v4()))
            }
        }
    }

    fn persist(&self, prefix: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".png")
            .tempfile_in(&self.dir)?;
        file.write_all(bytes)?;
        let (_file, path) = file
            .keep()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(path)
    }
}

fn strip_data_uri(payload: &str) -> &str {
    if payload.starts_with("data:") {
        if let Some(idx) = payload.find("base64,") {
            return &payload[idx + "base64,".len()..];
        }
    }
    payload
}
