//! Pluggable compression for chunk payloads.
//!
//! Block images are stored as they are, since they are small and must stay byte comparable.
//! Large resources (vertex and index data) are the payloads worth compressing. The id of the
//! compressor that produced a payload is stored in its chunk header.

use crate::error::{BlockError, Result};
use std::borrow::Cow;

/// Interface for compression algorithms.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// The id stored in the chunk header. 0 is reserved for [`NoCompression`].
    fn id(&self) -> u8;

    /// Compresses the data.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Decompresses the data.
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

/// Pass-through (id 0).
#[derive(Debug, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn id(&self) -> u8 {
        0
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        // Borrowed straight from the mapped file.
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(feature = "lz4_flex")]
/// LZ4 block compression (id 1), available with the `lz4_flex` feature.
///
/// Payloads carry their uncompressed size as a u32 LE prefix.
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4_flex")]
impl Compressor for Lz4Compressor {
    fn id(&self) -> u8 {
        1
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if u32::try_from(data.len()).is_err() {
            return Err(BlockError::Compression(format!(
                "Payload of {} bytes is too large for LZ4 framing",
                data.len()
            )));
        }
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let vec = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| BlockError::Compression(e.to_string()))?;
        Ok(Cow::Owned(vec))
    }
}

/// Maps the compression ids found in chunk headers to implementations.
#[derive(Debug)]
pub struct CompressorRegistry {
    algorithms: Vec<Option<Box<dyn Compressor>>>,
}

impl CompressorRegistry {
    /// Creates a registry with the built-in algorithms.
    ///
    /// *   ID 0: `NoCompression`
    /// *   ID 1: `Lz4Compressor` (if `lz4_flex` feature is enabled)
    pub fn new() -> Self {
        let mut reg = Self {
            algorithms: (0..8).map(|_| None).collect(),
        };

        reg.register(Box::new(NoCompression));

        #[cfg(feature = "lz4_flex")]
        reg.register(Box::new(Lz4Compressor));

        reg
    }

    /// Registers a compressor under its own id, replacing any previous one.
    pub fn register(&mut self, algo: Box<dyn Compressor>) {
        let id = usize::from(algo.id());
        if id >= self.algorithms.len() {
            self.algorithms.resize_with(id + 1, || None);
        }
        if let Some(slot) = self.algorithms.get_mut(id) {
            *slot = Some(algo);
        }
    }

    /// Retrieves a compressor by its id.
    ///
    /// # Errors
    /// Returns `BlockError::Format` if the id is not registered. A file written with a
    /// compressor this build lacks is a format problem, not a corrupt one.
    pub fn get(&self, id: u8) -> Result<&dyn Compressor> {
        if let Some(algo) = self
            .algorithms
            .get(usize::from(id))
            .and_then(|opt| opt.as_ref())
        {
            return Ok(algo.as_ref());
        }

        Err(BlockError::Format(format!(
            "Compression id {id} is not registered or available"
        )))
    }

    /// Returns true if a compressor is registered under `id`.
    pub fn contains(&self, id: u8) -> bool {
        self.get(id).is_ok()
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
