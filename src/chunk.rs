//! The chunk file container.
//!
//! Scaffold files hold several independently addressable payloads: the block image of a
//! model, skeleton or animation set, plus the large resources it refers to. The container is
//! a flat table of contents followed by the payloads:
//!
//! ```text
//! [FileHeader] [ChunkHeader * N] [Payload 0] [Payload 1] ...
//! ```
//!
//! Each chunk header records where its payload lives, how it was compressed and an xxHash64
//! of the stored bytes. The reader memory-maps the file and hands out borrowed payloads
//! whenever no decompression is needed.

use std::borrow::Cow;
use std::fs::File;
use std::hash::Hasher;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use memmap2::Mmap;
use twox_hash::XxHash64;

use crate::compression::CompressorRegistry;
use crate::error::{BlockError, Result};

/// Magic bytes at the start of every chunk file.
pub const MAGIC_BYTES: [u8; 8] = *b"SCAFCHNK";

/// Current container version.
pub const FILE_VERSION: u32 = 1;

/// Length of the name field in a chunk header.
pub const CHUNK_NAME_LEN: usize = 32;

/// Packs an 8-byte ASCII tag into a chunk type code.
pub const fn type_code(tag: &[u8; 8]) -> u64 {
    u64::from_le_bytes(*tag)
}

/// Chunk type codes used by scaffold files.
pub mod chunk_type {
    use super::type_code;

    /// Block image of a model scaffold.
    pub const MODEL_SCAFFOLD: u64 = type_code(b"ModlScaf");
    /// Large resources referenced by a model scaffold.
    pub const MODEL_SCAFFOLD_LARGE_BLOCKS: u64 = type_code(b"ModlLrgB");
    /// Block image of a skeleton.
    pub const SKELETON: u64 = type_code(b"Skeleton");
    /// Block image of an animation set.
    pub const ANIMATION_SET: u64 = type_code(b"AnimSet\0");

    /// Human readable name of a known type code.
    pub fn name(code: u64) -> Option<&'static str> {
        match code {
            MODEL_SCAFFOLD => Some("ModelScaffold"),
            MODEL_SCAFFOLD_LARGE_BLOCKS => Some("ModelScaffoldLargeBlocks"),
            SKELETON => Some("Skeleton"),
            ANIMATION_SET => Some("AnimationSet"),
            _ => None,
        }
    }
}

/// Header at the start of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Always [`MAGIC_BYTES`].
    pub magic: [u8; 8],
    /// Container version.
    pub file_version: u32,
    /// Number of chunk headers following this one.
    pub chunk_count: u32,
}

impl FileHeader {
    /// The size in bytes of a serialized file header.
    pub const SIZE: usize = 24;

    /// Serializes the header to bytes. The trailing 8 bytes are reserved and zero.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..12].copy_from_slice(&self.file_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf
    }

    /// Parses and validates the header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes
            .get(..Self::SIZE)
            .ok_or_else(|| BlockError::Format("File smaller than header".into()))?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        if magic != MAGIC_BYTES {
            return Err(BlockError::Format("Invalid Magic Bytes".into()));
        }

        let file_version = read_u32(bytes, 8);
        if file_version != FILE_VERSION {
            return Err(BlockError::Format(format!(
                "Unsupported version: {file_version}"
            )));
        }

        Ok(Self {
            magic,
            file_version,
            chunk_count: read_u32(bytes, 12),
        })
    }
}

/// Table-of-contents entry describing one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// What the payload holds, see [`chunk_type`].
    pub type_code: u64,
    /// Version of the payload's own layout.
    pub version: u32,
    /// Id of the compressor that produced the stored bytes.
    pub compression_id: u8,
    /// NUL padded name.
    pub name: [u8; CHUNK_NAME_LEN],
    /// Absolute offset of the payload in the file.
    pub file_offset: u64,
    /// Size of the stored (possibly compressed) payload.
    pub size: u64,
    /// xxHash64 of the stored bytes.
    pub checksum: u64,
}

impl ChunkHeader {
    /// The size in bytes of a serialized chunk header.
    pub const SIZE: usize = 72;

    /// The name with its NUL padding removed.
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(CHUNK_NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.type_code.to_le_bytes());
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12] = self.compression_id;
        buf[16..48].copy_from_slice(&self.name);
        buf[48..56].copy_from_slice(&self.file_offset.to_le_bytes());
        buf[56..64].copy_from_slice(&self.size.to_le_bytes());
        buf[64..72].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserializes from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes
            .get(..Self::SIZE)
            .ok_or_else(|| BlockError::Corrupt("Buffer too small for ChunkHeader".into()))?;

        let mut name = [0u8; CHUNK_NAME_LEN];
        name.copy_from_slice(&bytes[16..48]);
        Ok(Self {
            type_code: read_u64(bytes, 0),
            version: read_u32(bytes, 8),
            compression_id: bytes[12],
            name,
            file_offset: read_u64(bytes, 48),
            size: read_u64(bytes, 56),
            checksum: read_u64(bytes, 64),
        })
    }
}

/// Encodes a chunk name, truncating it to [`CHUNK_NAME_LEN`] bytes.
pub fn encode_name(name: &str) -> [u8; CHUNK_NAME_LEN] {
    let mut out = [0u8; CHUNK_NAME_LEN];
    let len = name.len().min(CHUNK_NAME_LEN);
    out[..len].copy_from_slice(&name.as_bytes()[..len]);
    out
}

/// xxHash64 (seed 0) of a stored payload.
pub fn checksum(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

// Callers slice to the header size first, so these never go out of range.
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[derive(Debug)]
struct PendingChunk {
    type_code: u64,
    version: u32,
    name: [u8; CHUNK_NAME_LEN],
    compression_id: u8,
    data: Vec<u8>,
}

/// Assembles a chunk file in memory and writes it out in one pass.
#[derive(Debug, Default)]
pub struct ChunkFileWriter {
    chunks: Vec<PendingChunk>,
    compression_id: u8,
    registry: CompressorRegistry,
}

impl ChunkFileWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the compressor used by [`add_compressed_chunk`](Self::add_compressed_chunk).
    ///
    /// Unknown ids are reported when the file is written.
    pub fn with_compression(mut self, compression_id: u8) -> Self {
        self.compression_id = compression_id;
        self
    }

    /// Adds a chunk stored as it is.
    pub fn add_chunk(&mut self, type_code: u64, version: u32, name: &str, data: Vec<u8>) -> &mut Self {
        self.push(type_code, version, name, data, 0)
    }

    /// Adds a chunk stored with the writer's compressor.
    pub fn add_compressed_chunk(
        &mut self,
        type_code: u64,
        version: u32,
        name: &str,
        data: Vec<u8>,
    ) -> &mut Self {
        self.push(type_code, version, name, data, self.compression_id)
    }

    fn push(
        &mut self,
        type_code: u64,
        version: u32,
        name: &str,
        data: Vec<u8>,
        compression_id: u8,
    ) -> &mut Self {
        self.chunks.push(PendingChunk {
            type_code,
            version,
            name: encode_name(name),
            compression_id,
            data,
        });
        self
    }

    /// Number of chunks added so far.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if no chunk has been added.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Compresses every payload and writes the complete file. Returns the bytes written.
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<u64> {
        let chunk_count = u32::try_from(self.chunks.len())
            .map_err(|_| BlockError::Format("Too many chunks for one file".into()))?;

        let stored = self
            .chunks
            .iter()
            .map(|chunk| {
                self.registry
                    .get(chunk.compression_id)?
                    .compress(&chunk.data)
            })
            .collect::<Result<Vec<Cow<'_, [u8]>>>>()?;

        let mut offset = (FileHeader::SIZE + self.chunks.len() * ChunkHeader::SIZE) as u64;
        let header = FileHeader {
            magic: MAGIC_BYTES,
            file_version: FILE_VERSION,
            chunk_count,
        };
        out.write_all(&header.to_bytes())?;

        for (chunk, payload) in self.chunks.iter().zip(&stored) {
            let chunk_header = ChunkHeader {
                type_code: chunk.type_code,
                version: chunk.version,
                compression_id: chunk.compression_id,
                name: chunk.name,
                file_offset: offset,
                size: payload.len() as u64,
                checksum: checksum(payload),
            };
            out.write_all(&chunk_header.to_bytes())?;
            offset += payload.len() as u64;
        }

        for payload in &stored {
            out.write_all(payload)?;
        }
        out.flush()?;

        debug!("wrote chunk file: {chunk_count} chunks, {offset} bytes");
        Ok(offset)
    }

    /// Writes the file to `path`, truncating any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<u64> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }

    /// Writes the file into a fresh byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}

#[derive(Debug)]
enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => &mmap[..],
            Self::Owned(vec) => vec.as_slice(),
        }
    }
}

/// Read handle over a chunk file.
///
/// Cheap to clone; clones share the mapping.
#[derive(Debug, Clone)]
pub struct ChunkFileReader {
    source: Arc<Source>,
    chunks: Vec<ChunkHeader>,
    registry: Arc<CompressorRegistry>,
}

impl ChunkFileReader {
    /// Memory-maps a chunk file and parses its table of contents.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let file_size = file.metadata()?.len();
        if file_size < FileHeader::SIZE as u64 {
            return Err(BlockError::Format("File smaller than header".into()));
        }

        // Safety: the mapping is read-only and the file is assumed not to be modified by
        // other processes while it is open.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        debug!(
            "opened chunk file {} ({file_size} bytes)",
            path.as_ref().display()
        );
        Self::from_source(Source::Mapped(mmap))
    }

    /// Parses a chunk file held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(Source::Owned(bytes))
    }

    fn from_source(source: Source) -> Result<Self> {
        let bytes = source.bytes();
        let header = FileHeader::from_bytes(bytes)?;

        let toc_end = (header.chunk_count as usize)
            .checked_mul(ChunkHeader::SIZE)
            .and_then(|len| len.checked_add(FileHeader::SIZE))
            .ok_or_else(|| BlockError::Corrupt("Chunk count overflows".into()))?;
        let toc = bytes.get(FileHeader::SIZE..toc_end).ok_or_else(|| {
            BlockError::Corrupt(format!(
                "File too small for {} chunk headers",
                header.chunk_count
            ))
        })?;

        let chunks = toc
            .chunks_exact(ChunkHeader::SIZE)
            .map(ChunkHeader::from_bytes)
            .collect::<Result<Vec<_>>>()?;

        for chunk in &chunks {
            let end = chunk.file_offset.checked_add(chunk.size);
            if end.is_none_or(|end| end > bytes.len() as u64) {
                return Err(BlockError::Corrupt(format!(
                    "Chunk '{}' at {}+{} out of file bounds",
                    chunk.name(),
                    chunk.file_offset,
                    chunk.size
                )));
            }
        }

        Ok(Self {
            source: Arc::new(source),
            chunks,
            registry: Arc::new(CompressorRegistry::new()),
        })
    }

    /// The table of contents, in file order.
    pub fn chunks(&self) -> &[ChunkHeader] {
        &self.chunks
    }

    /// First chunk of the given type.
    pub fn find(&self, type_code: u64) -> Option<&ChunkHeader> {
        self.chunks.iter().find(|c| c.type_code == type_code)
    }

    /// Returns the stored bytes of a chunk without verifying or decompressing them.
    pub fn raw_chunk(&self, header: &ChunkHeader) -> Result<&[u8]> {
        let start = header.file_offset as usize;
        let end = start
            .checked_add(header.size as usize)
            .ok_or_else(|| BlockError::Corrupt("Chunk range overflows".into()))?;
        self.source
            .bytes()
            .get(start..end)
            .ok_or_else(|| BlockError::Corrupt(format!("Chunk '{}' out of file bounds", header.name())))
    }

    /// Verifies the checksum of a chunk and returns its decompressed payload.
    pub fn read_chunk(&self, header: &ChunkHeader) -> Result<Cow<'_, [u8]>> {
        let stored = self.raw_chunk(header)?;
        let actual = checksum(stored);
        if actual != header.checksum {
            return Err(BlockError::Corrupt(format!(
                "Checksum mismatch in chunk '{}': stored {:#018x}, computed {actual:#018x}",
                header.name(),
                header.checksum
            )));
        }
        self.registry.get(header.compression_id)?.decompress(stored)
    }
}
