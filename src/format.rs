//! Defines the physical binary layout of finalized blocks.
//!
//! # Block Layout
//! A finalized blob is the main block followed by every trailing sub-block:
//!
//! `[Main Block] [Trailing Sub-Block 0] [Trailing Sub-Block 1] ...`
//!
//! The root object always starts at offset 0. Pointer-bearing fields are 8-byte slots which,
//! before relocation, hold `(target - slot) | PTR_FLAG_BIT`.
//!
//! # Image Layout
//! The persisted form of a block carries its own size and relocation table:
//!
//! `[BlockHeader] [Blob] [Relocation * N]`

use crate::error::{BlockError, Result};

/// Width in bytes of every pointer slot, independent of the host pointer width.
pub const POINTER_SIZE: usize = 8;

/// Marks a slot value as an unpatched relative displacement rather than a live address.
///
/// Inside the writer's pointer table the same bit marks a slot living in the trailing region.
pub const PTR_FLAG_BIT: u64 = 1 << 63;

/// Extracts the displacement from a flagged slot value.
pub const PTR_MASK: u64 = !PTR_FLAG_BIT;

/// Largest blob the pointer encoding can address.
pub const MAX_BLOCK_SIZE: u64 = PTR_MASK;

/// Semantic role of the data a pointer slot refers to.
///
/// Purely descriptive: relocation treats every tag the same way. Tooling such as the
/// [`inspector`](crate::inspector) uses it to break a block down by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u64)]
pub enum SpecialBuffer {
    /// A plain pointer to a nested object.
    Unknown = 0,
    /// GPU vertex data.
    VertexBuffer = 1,
    /// GPU index data.
    IndexBuffer = 2,
    /// Character data of a string.
    String = 3,
    /// Elements of a dynamically sized sequence.
    Vector = 4,
    /// Elements of an owned, counted array.
    UniquePtr = 5,
}

impl SpecialBuffer {
    /// Every tag, in discriminant order.
    pub const ALL: [SpecialBuffer; 6] = [
        Self::Unknown,
        Self::VertexBuffer,
        Self::IndexBuffer,
        Self::String,
        Self::Vector,
        Self::UniquePtr,
    ];

    /// Returns the persisted value of the tag.
    pub fn as_u64(self) -> u64 {
        self as u64
    }

    /// Decodes a persisted tag.
    pub fn from_u64(value: u64) -> Result<Self> {
        Self::ALL
            .get(value as usize)
            .copied()
            .filter(|tag| tag.as_u64() == value)
            .ok_or_else(|| BlockError::Corrupt(format!("Unknown special buffer tag {value}")))
    }

    /// Human readable name used in reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::VertexBuffer => "vertex_buffer",
            Self::IndexBuffer => "index_buffer",
            Self::String => "string",
            Self::Vector => "vector",
            Self::UniquePtr => "unique_ptr",
        }
    }
}

/// A pending pointer patch recorded by the writer.
///
/// `pointer_offset` is relative to the writer's main block, unless `PTR_FLAG_BIT` is set, in
/// which case the masked value is relative to its trailing sub-block region.
/// `sub_block_offset` is always relative to the trailing sub-block region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalPointer {
    /// Location of the reserved slot.
    pub pointer_offset: u64,
    /// Start of the pointee within the trailing sub-blocks.
    pub sub_block_offset: u64,
    /// Length of the pointee in bytes.
    pub sub_block_size: u64,
    /// Semantic role of the pointee.
    pub special_buffer: SpecialBuffer,
}

impl InternalPointer {
    /// Returns true if the slot lives in the trailing region rather than the main block.
    pub fn is_in_trailing(&self) -> bool {
        self.pointer_offset & PTR_FLAG_BIT != 0
    }
}

/// A resolved relocation record of a finalized blob. All offsets are absolute within the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the 8-byte pointer slot.
    pub pointer_offset: u64,
    /// Offset of the first byte of the pointee.
    pub sub_block_offset: u64,
    /// Length of the pointee in bytes.
    pub sub_block_size: u64,
    /// Semantic role of the pointee.
    pub special_buffer: SpecialBuffer,
}

impl Relocation {
    /// The size in bytes of a serialized relocation record.
    pub const SIZE: usize = 32;

    /// Displacement stored in the slot before patching.
    pub fn displacement(&self) -> u64 {
        self.sub_block_offset - self.pointer_offset
    }

    /// Slot value of the unpatched encoding.
    pub fn encoded(&self) -> u64 {
        self.displacement() | PTR_FLAG_BIT
    }

    /// Checks that both the slot and the pointee fit inside a blob of `blob_len` bytes and
    /// that the pointee lies after its slot.
    pub fn validate(&self, blob_len: usize) -> Result<()> {
        let blob_len = blob_len as u64;
        let slot_end = self.pointer_offset.checked_add(POINTER_SIZE as u64);
        let target_end = self.sub_block_offset.checked_add(self.sub_block_size);
        match (slot_end, target_end) {
            (Some(slot_end), Some(target_end))
                if slot_end <= blob_len
                    && target_end <= blob_len
                    && self.sub_block_offset >= slot_end =>
            {
                Ok(())
            }
            _ => Err(BlockError::Corrupt(format!(
                "Relocation {{slot: {}, target: {}, size: {}}} out of bounds for blob of {} bytes",
                self.pointer_offset, self.sub_block_offset, self.sub_block_size, blob_len
            ))),
        }
    }

    /// Serializes to a fixed-size byte array (Little Endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.pointer_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.sub_block_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.sub_block_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.special_buffer.as_u64().to_le_bytes());
        buf
    }

    /// Deserializes from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(BlockError::Corrupt("Buffer too small for Relocation".into()));
        }
        Ok(Self {
            pointer_offset: read_u64(bytes, 0)?,
            sub_block_offset: read_u64(bytes, 8)?,
            sub_block_size: read_u64(bytes, 16)?,
            special_buffer: SpecialBuffer::from_u64(read_u64(bytes, 24)?)?,
        })
    }
}

/// Header at the start of a block image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Size of the blob (main block plus trailing sub-blocks).
    pub raw_memory_size: u64,
    /// Number of relocation records following the blob.
    pub internal_pointer_count: u64,
}

impl BlockHeader {
    /// The size in bytes of a serialized header.
    pub const SIZE: usize = 16;

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.raw_memory_size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.internal_pointer_count.to_le_bytes());
        buf
    }

    /// Reads the header from the start of an image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(BlockError::Corrupt("Image smaller than block header".into()));
        }
        Ok(Self {
            raw_memory_size: read_u64(bytes, 0)?,
            internal_pointer_count: read_u64(bytes, 8)?,
        })
    }

    /// Total size of the image this header describes.
    pub fn image_size(&self) -> Result<usize> {
        (self.internal_pointer_count as usize)
            .checked_mul(Relocation::SIZE)
            .and_then(|table| table.checked_add(self.raw_memory_size as usize))
            .and_then(|size| size.checked_add(Self::SIZE))
            .ok_or_else(|| BlockError::Corrupt("Block header describes an impossible size".into()))
    }
}

/// Reads a little-endian u64 at `offset`.
pub fn read_u64(bytes: &[u8], offset: usize) -> Result<u64> {
    let end = offset
        .checked_add(8)
        .ok_or_else(|| BlockError::Corrupt("Offset overflow".into()))?;
    let slice = bytes.get(offset..end).ok_or_else(|| {
        BlockError::Corrupt(format!(
            "Read of 8 bytes at {offset} past end of {} byte buffer",
            bytes.len()
        ))
    })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice);
    Ok(u64::from_le_bytes(raw))
}

/// Writes a little-endian u64 at `offset`.
pub fn write_u64(bytes: &mut [u8], offset: usize, value: u64) -> Result<()> {
    let len = bytes.len();
    let slice = offset
        .checked_add(8)
        .and_then(|end| bytes.get_mut(offset..end))
        .ok_or_else(|| {
            BlockError::Corrupt(format!(
                "Write of 8 bytes at {offset} past end of {len} byte buffer"
            ))
        })?;
    slice.copy_from_slice(&value.to_le_bytes());
    Ok(())
}
