//! Process-wide cache of chunked firmware images.
//!
//! Images are keyed by firmware name and variant. The first reader that
//! needs an image loads it from the catalog; concurrent readers wait on the
//! same [`OnceCell`] instead of loading it again.

use std::collections::HashMap;
use std::sync::Arc;

use attractap_core::FirmwareDefinition;
use attractap_core::constants::DEFAULT_FIRMWARE_CHUNK_SIZE;
use attractap_core::services::FirmwareCatalog;
use attractap_protocol::payloads::FirmwareLayout;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::GatewayResult;

type ImageCell = Arc<OnceCell<Arc<FirmwareImage>>>;

/// A firmware binary split into fixed-size chunks
#[derive(Debug)]
pub struct FirmwareImage {
    definition: FirmwareDefinition,
    chunks: Vec<Bytes>,
    size: u64,
    chunk_size: usize,
}

impl FirmwareImage {
    pub fn from_bytes(definition: FirmwareDefinition, binary: Bytes, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunks = (0..binary.len())
            .step_by(chunk_size)
            .map(|start| binary.slice(start..(start + chunk_size).min(binary.len())))
            .collect();

        Self {
            definition,
            chunks,
            size: binary.len() as u64,
            chunk_size,
        }
    }

    pub fn definition(&self) -> &FirmwareDefinition {
        &self.definition
    }

    pub fn chunk(&self, index: usize) -> Option<&Bytes> {
        self.chunks.get(index)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn layout(&self) -> FirmwareLayout {
        FirmwareLayout {
            chunks: self.chunks.len(),
            size: self.size,
            chunk_size: self.chunk_size,
        }
    }
}

#[derive(Debug)]
pub struct FirmwareCache {
    images: Mutex<HashMap<(String, String), ImageCell>>,
    chunk_size: usize,
}

impl FirmwareCache {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Return the chunked image of `definition`, loading it on first use.
    ///
    /// A cached image of an older version is replaced.
    pub async fn get_or_load<C: FirmwareCatalog>(
        &self,
        catalog: &C,
        definition: &FirmwareDefinition,
    ) -> GatewayResult<Arc<FirmwareImage>> {
        let cell = self.cell(definition);
        let chunk_size = self.chunk_size;

        let image = cell
            .get_or_try_init(|| async {
                let image = load(catalog, definition, chunk_size).await?;
                GatewayResult::Ok(Arc::new(image))
            })
            .await?;

        Ok(image.clone())
    }

    fn cell(&self, definition: &FirmwareDefinition) -> ImageCell {
        let key = (definition.name.clone(), definition.variant.clone());
        let mut images = self.images.lock();

        let stale = images
            .get(&key)
            .and_then(|cell| cell.get())
            .is_some_and(|image| image.definition.version != definition.version);
        if stale {
            tracing::info!(
                firmware = %definition.descriptor(),
                "replacing cached firmware image"
            );
            images.remove(&key);
        }

        images.entry(key).or_default().clone()
    }

    /// Number of cached name/variant entries
    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }
}

impl Default for FirmwareCache {
    fn default() -> Self {
        Self::new(DEFAULT_FIRMWARE_CHUNK_SIZE)
    }
}

async fn load<C: FirmwareCatalog>(
    catalog: &C,
    definition: &FirmwareDefinition,
    chunk_size: usize,
) -> GatewayResult<FirmwareImage> {
    let expected = catalog.get_binary_size(definition).await?;
    let mut stream = catalog.get_binary_stream(definition).await?;

    let mut binary = BytesMut::with_capacity(usize::try_from(expected).unwrap_or_default());
    while let Some(part) = stream.next().await {
        binary.extend_from_slice(&part?);
    }

    if binary.len() as u64 != expected {
        tracing::warn!(
            firmware = %definition.descriptor(),
            expected,
            actual = binary.len(),
            "firmware size differs from catalog"
        );
    }

    let image = FirmwareImage::from_bytes(definition.clone(), binary.freeze(), chunk_size);
    tracing::debug!(
        firmware = %definition.descriptor(),
        size = image.size,
        chunks = image.chunk_count(),
        "firmware image loaded"
    );
    Ok(image)
}
