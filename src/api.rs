//! High-level entry points: compile values into blocks and scaffold files, and load them back.
//!
//! ```rust
//! use scaffold_block::{BlockObject, Scaffold};
//!
//! #[derive(BlockObject, Debug, PartialEq)]
//! struct Pt {
//!     x: u32,
//!     name: String,
//! }
//!
//! # fn main() -> scaffold_block::Result<()> {
//! let block = Scaffold::serialize(&Pt { x: 42, name: "abc".into() })?;
//! let back: Pt = block.first_object()?;
//! assert_eq!(back.name, "abc");
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use log::debug;
use rayon::prelude::*;

use crate::block::Block;
use crate::chunk::{ChunkFileReader, ChunkFileWriter, chunk_type};
use crate::dispatch::BlockSerialize;
use crate::error::{BlockError, Result};
use crate::reader::FromBlock;
use crate::scaffold::LargeResources;
use crate::serializer::BlockSerializer;

/// Layout version written into scaffold chunk headers.
pub const SCAFFOLD_CHUNK_VERSION: u32 = 1;

/// Compressor id used for large resources when compression is enabled.
pub const LARGE_RESOURCE_COMPRESSION_ID: u8 = 1;

/// Options for writing scaffold files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldConfig {
    /// Store the large resources chunk with LZ4. Requires the `lz4_flex` feature on both
    /// the writing and the reading side.
    pub compress_large_resources: bool,
    /// Name recorded in the chunk headers (truncated to 32 bytes).
    pub name: String,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            compress_large_resources: false,
            name: "scaffold".to_owned(),
        }
    }
}

/// The main entry point for compiling scaffolds.
#[derive(Debug, Clone, Default)]
pub struct Scaffold {
    config: ScaffoldConfig,
}

impl Scaffold {
    /// Creates a facade with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a facade with the given options.
    pub fn with_config(config: ScaffoldConfig) -> Self {
        Self { config }
    }

    /// The active options.
    pub fn config(&self) -> &ScaffoldConfig {
        &self.config
    }

    /// Serializes a value into a finalized, unpatched block.
    pub fn serialize<T: BlockSerialize + ?Sized>(value: &T) -> Result<Block> {
        let mut serializer = BlockSerializer::new();
        serializer.serialize(value);
        serializer.finalize()
    }

    /// Serializes many values in parallel, one serializer per value.
    ///
    /// Blocks come back in input order and are byte-identical to sequential output.
    pub fn serialize_many<T: BlockSerialize + Sync>(values: &[T]) -> Result<Vec<Block>> {
        values.par_iter().map(|value| Self::serialize(value)).collect()
    }

    /// Builds a scaffold file in memory.
    ///
    /// `chunk_type` is one of the scaffold types in [`chunk_type`]. The large resources chunk
    /// is only written when `large_resources` is non-empty.
    pub fn to_bytes<T: BlockSerialize + ?Sized>(
        &self,
        chunk_type: u64,
        value: &T,
        large_resources: Option<&LargeResources>,
    ) -> Result<Vec<u8>> {
        self.build_writer(chunk_type, value, large_resources)?
            .to_bytes()
    }

    /// Writes a scaffold file to `path`.
    pub fn save<T, P>(
        &self,
        path: P,
        chunk_type: u64,
        value: &T,
        large_resources: Option<&LargeResources>,
    ) -> Result<()>
    where
        T: BlockSerialize + ?Sized,
        P: AsRef<Path>,
    {
        let written = self
            .build_writer(chunk_type, value, large_resources)?
            .save(path.as_ref())?;
        debug!(
            "saved scaffold '{}' to {} ({written} bytes)",
            self.config.name,
            path.as_ref().display()
        );
        Ok(())
    }

    fn build_writer<T: BlockSerialize + ?Sized>(
        &self,
        chunk_type: u64,
        value: &T,
        large_resources: Option<&LargeResources>,
    ) -> Result<ChunkFileWriter> {
        let image = Self::serialize(value)?.to_image()?;

        let compression_id = if self.config.compress_large_resources {
            LARGE_RESOURCE_COMPRESSION_ID
        } else {
            0
        };
        let mut writer = ChunkFileWriter::new().with_compression(compression_id);
        writer.add_chunk(chunk_type, SCAFFOLD_CHUNK_VERSION, &self.config.name, image);

        if let Some(large) = large_resources.filter(|l| !l.is_empty()) {
            writer.add_compressed_chunk(
                chunk_type::MODEL_SCAFFOLD_LARGE_BLOCKS,
                SCAFFOLD_CHUNK_VERSION,
                &self.config.name,
                large.as_bytes().to_vec(),
            );
        }
        Ok(writer)
    }
}

/// A loaded scaffold file: the block and its large resources.
#[derive(Debug, Clone)]
pub struct ScaffoldFile {
    name: String,
    block: Block,
    large_resources: LargeResources,
}

impl ScaffoldFile {
    /// Opens a scaffold file and loads the chunk of the given type.
    pub fn open<P: AsRef<Path>>(path: P, chunk_type: u64) -> Result<Self> {
        Self::from_reader(&ChunkFileReader::open(path)?, chunk_type)
    }

    /// Loads a scaffold file held in memory.
    pub fn from_bytes(bytes: Vec<u8>, chunk_type: u64) -> Result<Self> {
        Self::from_reader(&ChunkFileReader::from_bytes(bytes)?, chunk_type)
    }

    /// Loads the chunk of the given type, plus the large resources if present.
    pub fn from_reader(reader: &ChunkFileReader, chunk_type: u64) -> Result<Self> {
        let header = reader.find(chunk_type).ok_or_else(|| {
            BlockError::Format(format!(
                "No {} chunk in file",
                chunk_type::name(chunk_type).unwrap_or("requested")
            ))
        })?;
        if header.version != SCAFFOLD_CHUNK_VERSION {
            return Err(BlockError::Format(format!(
                "Unsupported scaffold chunk version: {}",
                header.version
            )));
        }

        let block = Block::from_image(&reader.read_chunk(header)?)?;

        let large_resources = match reader.find(chunk_type::MODEL_SCAFFOLD_LARGE_BLOCKS) {
            Some(large) => LargeResources::from_bytes(reader.read_chunk(large)?.into_owned()),
            None => LargeResources::new(),
        };

        Ok(Self {
            name: header.name(),
            block,
            large_resources,
        })
    }

    /// Name recorded in the chunk header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scaffold block (unpatched).
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Mutable access, e.g. to [`initialize`](Block::initialize) the block.
    pub fn block_mut(&mut self) -> &mut Block {
        &mut self.block
    }

    /// The large resources (empty if the file had none).
    pub fn large_resources(&self) -> &LargeResources {
        &self.large_resources
    }

    /// Decodes the root object of the block.
    pub fn root<T: FromBlock>(&self) -> Result<T> {
        self.block.first_object()
    }

    /// Consumes the file.
    pub fn into_parts(self) -> (Block, LargeResources) {
        (self.block, self.large_resources)
    }
}
