//! Firmware catalog backed by a directory on disk.
//!
//! The directory holds a `firmwares.json` index next to the binaries it
//! names:
//!
//! ```text
//! firmware/
//! ├── firmwares.json   {"firmwares": [{"name": ..., "variant": ..., "version": ..., "filename": ...}]}
//! └── attractap-esp32c3-1.4.0.bin
//! ```
//!
//! The index is read once at startup. A missing index is logged and
//! yields an empty catalog, so readers are simply never asked to update.

use std::path::{Path, PathBuf};

use attractap_core::services::{FirmwareCatalog, FirmwareStream};
use attractap_core::{FirmwareDefinition, Result};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::{StorageError, StorageResult};

/// Name of the index file inside the firmware directory.
pub const FIRMWARE_INDEX_FILE: &str = "firmwares.json";

#[derive(Debug, Deserialize)]
struct FirmwareIndex {
    #[serde(default)]
    firmwares: Vec<FirmwareDefinition>,
}

#[derive(Debug, Clone)]
pub struct FsFirmwareCatalog {
    directory: PathBuf,
    firmwares: Vec<FirmwareDefinition>,
}

impl FsFirmwareCatalog {
    /// Load the index from `directory`.
    ///
    /// # Errors
    ///
    /// Fails if the index exists but cannot be read or parsed.
    pub async fn open(directory: impl Into<PathBuf>) -> StorageResult<Self> {
        let directory = directory.into();
        let index_path = directory.join(FIRMWARE_INDEX_FILE);

        let firmwares = match tokio::fs::read_to_string(&index_path).await {
            Ok(json) => {
                let index: FirmwareIndex = serde_json::from_str(&json).map_err(|e| {
                    StorageError::Firmware(format!("{}: {e}", index_path.display()))
                })?;
                index.firmwares
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(path = %index_path.display(), "firmware index does not exist");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(count = firmwares.len(), "loaded firmware definitions");
        Ok(Self {
            directory,
            firmwares,
        })
    }

    pub fn firmwares(&self) -> &[FirmwareDefinition] {
        &self.firmwares
    }

    pub fn find(&self, name: &str, variant: &str) -> Option<&FirmwareDefinition> {
        self.firmwares
            .iter()
            .find(|f| f.name == name && f.variant == variant)
    }

    /// Path of the binary of `definition`, refusing names that would
    /// leave the firmware directory.
    fn binary_path(&self, definition: &FirmwareDefinition) -> StorageResult<PathBuf> {
        let filename = Path::new(&definition.filename);
        let plain = filename.components().count() == 1
            && matches!(filename.components().next(), Some(std::path::Component::Normal(_)));
        if !plain {
            return Err(StorageError::Firmware(format!(
                "refusing firmware filename '{}'",
                definition.filename
            )));
        }
        Ok(self.directory.join(filename))
    }
}

impl FirmwareCatalog for FsFirmwareCatalog {
    async fn get_definition(&self, name: &str, variant: &str) -> Result<Option<FirmwareDefinition>> {
        Ok(self.find(name, variant).cloned())
    }

    async fn get_binary_stream(&self, definition: &FirmwareDefinition) -> Result<FirmwareStream> {
        let path = self.binary_path(definition)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            StorageError::Firmware(format!("cannot open {}: {e}", path.display()))
        })?;

        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn get_binary_size(&self, definition: &FirmwareDefinition) -> Result<u64> {
        let path = self.binary_path(definition)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            StorageError::Firmware(format!("cannot stat {}: {e}", path.display()))
        })?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attractap_core::FirmwareDescriptor;
    use futures::StreamExt;

    async fn catalog_with(binary: &[u8]) -> (tempfile::TempDir, FsFirmwareCatalog) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(FIRMWARE_INDEX_FILE),
            r#"{"firmwares": [{
                "name": "attractap",
                "friendlyName": "Attractap",
                "variant": "esp32c3",
                "variantFriendlyName": "ESP32-C3",
                "version": "1.4.0",
                "filename": "attractap-esp32c3.bin"
            }]}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("attractap-esp32c3.bin"), binary)
            .await
            .unwrap();

        let catalog = FsFirmwareCatalog::open(dir.path()).await.unwrap();
        (dir, catalog)
    }

    #[tokio::test]
    async fn test_definition_lookup_and_outdated_check() {
        let (_dir, catalog) = catalog_with(b"firmware").await;

        let definition = catalog
            .get_definition("attractap", "esp32c3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(definition.friendly_name, "Attractap");
        assert!(catalog.get_definition("attractap", "other").await.unwrap().is_none());

        let old = FirmwareDescriptor {
            name: "attractap".into(),
            variant: "esp32c3".into(),
            version: "1.3.0".into(),
        };
        assert!(catalog.is_outdated(&old).await.unwrap());
        assert!(!catalog.is_outdated(&definition.descriptor()).await.unwrap());
    }

    #[tokio::test]
    async fn test_binary_stream_and_size() {
        let binary: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let (_dir, catalog) = catalog_with(&binary).await;
        let definition = catalog.find("attractap", "esp32c3").unwrap().clone();

        assert_eq!(catalog.get_binary_size(&definition).await.unwrap(), 20_000);

        let mut stream = catalog.get_binary_stream(&definition).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, binary);
    }

    #[tokio::test]
    async fn test_missing_index_is_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FsFirmwareCatalog::open(dir.path()).await.unwrap();
        assert!(catalog.firmwares().is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_refused() {
        let (_dir, catalog) = catalog_with(b"x").await;
        let mut definition = catalog.find("attractap", "esp32c3").unwrap().clone();
        definition.filename = "../secrets.bin".into();

        assert!(catalog.get_binary_size(&definition).await.is_err());
    }
}
