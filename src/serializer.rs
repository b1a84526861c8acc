//! The write-side engine: the nascent block serializer.
//!
//! A [`BlockSerializer`] accumulates three things:
//!
//! 1. the **main block**, where values and raw structs are appended in field order;
//! 2. the **trailing sub-blocks**, the flattened bytes of every nested block, in the order
//!    they were serialized;
//! 3. the **internal pointer table**, one record per 8-byte slot reserved in either region.
//!
//! Nothing is resolved until [`BlockSerializer::as_memory_block`], which concatenates the two
//! regions and writes every slot as a displacement from the slot to its target. Because a
//! displacement is relative to the slot itself, a sub-block can be copied verbatim into any
//! parent at any depth without re-encoding its pointers.

use log::{debug, trace};

use crate::block::Block;
use crate::dispatch::BlockSerialize;
use crate::error::{BlockError, Result};
use crate::format::{
    InternalPointer, MAX_BLOCK_SIZE, POINTER_SIZE, PTR_FLAG_BIT, PTR_MASK, Relocation,
    SpecialBuffer,
};

/// Builds one block. Single-use and single-threaded; give every concurrent task its own.
#[derive(Debug, Default, Clone)]
pub struct BlockSerializer {
    memory: Vec<u8>,
    trailing_sub_blocks: Vec<u8>,
    internal_pointers: Vec<InternalPointer>,
}

impl BlockSerializer {
    /// Creates an empty serializer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes to the main block.
    pub fn push_back_raw(&mut self, data: &[u8]) {
        self.memory.extend_from_slice(data);
    }

    /// Appends the host representation of a raw opt-in type to the main block.
    pub fn serialize_raw<T: bytemuck::Pod>(&mut self, value: &T) {
        self.push_back_raw(bytemuck::bytes_of(value));
    }

    /// Appends `size_in_bytes` zero bytes to the main block.
    pub fn add_padding(&mut self, size_in_bytes: usize) {
        self.memory.resize(self.memory.len() + size_in_bytes, 0);
    }

    /// Serializes a scalar or string.
    ///
    /// Scalars are appended little-endian with no prefix. Strings become a `String` sub-block
    /// referenced from an 8-byte slot.
    pub fn serialize_value<V: BlockValue + ?Sized>(&mut self, value: &V) {
        value.write_value(self);
    }

    /// Serializes any value through the generic dispatch.
    pub fn serialize<T: BlockSerialize + ?Sized>(&mut self, value: &T) {
        value.serialize(self);
    }

    /// Embeds a fully built serializer as a sub-block and reserves a slot pointing at it.
    ///
    /// The child's main block and trailing data are copied as one unit into this serializer's
    /// trailing region. The child's pointer records are carried over, re-based onto this
    /// serializer, so the final relocation table describes every slot in the blob.
    pub fn serialize_sub_block(&mut self, sub_block: &BlockSerializer, special_buffer: SpecialBuffer) {
        let unit_offset = self.trailing_sub_blocks.len() as u64;
        let sub_memory_len = sub_block.memory.len() as u64;

        self.internal_pointers.push(InternalPointer {
            pointer_offset: self.memory.len() as u64,
            sub_block_offset: unit_offset,
            sub_block_size: sub_block.size() as u64,
            special_buffer,
        });

        for pointer in &sub_block.internal_pointers {
            let slot_in_unit = if pointer.is_in_trailing() {
                (pointer.pointer_offset & PTR_MASK) + sub_memory_len
            } else {
                pointer.pointer_offset
            };
            self.internal_pointers.push(InternalPointer {
                pointer_offset: (unit_offset + slot_in_unit) | PTR_FLAG_BIT,
                sub_block_offset: unit_offset + sub_memory_len + pointer.sub_block_offset,
                sub_block_size: pointer.sub_block_size,
                special_buffer: pointer.special_buffer,
            });
        }

        self.trailing_sub_blocks.extend_from_slice(&sub_block.memory);
        self.trailing_sub_blocks
            .extend_from_slice(&sub_block.trailing_sub_blocks);
        self.add_padding(POINTER_SIZE);

        trace!(
            "embedded {:?} sub-block: {} bytes, {} nested pointers",
            special_buffer,
            sub_block.size(),
            sub_block.internal_pointers.len()
        );
    }

    /// Embeds a flat byte range with no internal structure as a sub-block.
    ///
    /// This is also how vertex and index data are tagged for tooling.
    pub fn serialize_raw_sub_block(&mut self, data: &[u8], special_buffer: SpecialBuffer) {
        self.internal_pointers.push(InternalPointer {
            pointer_offset: self.memory.len() as u64,
            sub_block_offset: self.trailing_sub_blocks.len() as u64,
            sub_block_size: data.len() as u64,
            special_buffer,
        });
        self.trailing_sub_blocks.extend_from_slice(data);
        self.add_padding(POINTER_SIZE);
    }

    /// Embeds a sequence as a sub-block.
    ///
    /// Plain-data element types produce one raw sub-block of `count * size` bytes. Any other
    /// element type is serialized element by element into a temporary serializer which is
    /// then embedded with [`serialize_sub_block`](Self::serialize_sub_block).
    pub fn serialize_sequence<T: BlockSerialize>(&mut self, items: &[T], special_buffer: SpecialBuffer) {
        T::serialize_slice(items, self, special_buffer);
    }

    /// Current length of the main block, i.e. the offset of the next appended value.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Current length of the trailing sub-block region.
    pub fn trailing_len(&self) -> usize {
        self.trailing_sub_blocks.len()
    }

    /// Size of the finalized blob, available before finalizing.
    pub fn size(&self) -> usize {
        self.memory.len() + self.trailing_sub_blocks.len()
    }

    /// The main block accumulated so far.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// The trailing sub-blocks accumulated so far.
    pub fn trailing_sub_blocks(&self) -> &[u8] {
        &self.trailing_sub_blocks
    }

    /// The pending pointer records.
    pub fn internal_pointers(&self) -> &[InternalPointer] {
        &self.internal_pointers
    }

    /// The relocation table of the finalized blob, with absolute offsets.
    pub fn relocations(&self) -> Vec<Relocation> {
        let memory_len = self.memory.len() as u64;
        self.internal_pointers
            .iter()
            .map(|pointer| {
                let slot = if pointer.is_in_trailing() {
                    memory_len + (pointer.pointer_offset & PTR_MASK)
                } else {
                    pointer.pointer_offset
                };
                Relocation {
                    pointer_offset: slot,
                    sub_block_offset: memory_len + pointer.sub_block_offset,
                    sub_block_size: pointer.sub_block_size,
                    special_buffer: pointer.special_buffer,
                }
            })
            .collect()
    }

    /// Produces the finalized blob: main block, then trailing sub-blocks, with every slot
    /// holding `(target - slot) | PTR_FLAG_BIT`.
    pub fn as_memory_block(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.size());
        blob.extend_from_slice(&self.memory);
        blob.extend_from_slice(&self.trailing_sub_blocks);

        for relocation in self.relocations() {
            let start = relocation.pointer_offset as usize;
            // Slots are reserved by this serializer, so they are always in range.
            if let Some(slot) = blob.get_mut(start..start + POINTER_SIZE) {
                slot.copy_from_slice(&relocation.encoded().to_le_bytes());
            }
        }
        blob
    }

    /// Finalizes into an owned, unpatched [`Block`].
    pub fn finalize(&self) -> Result<Block> {
        if self.size() as u64 > MAX_BLOCK_SIZE {
            return Err(BlockError::Format(format!(
                "Block of {} bytes exceeds the pointer displacement range",
                self.size()
            )));
        }
        let blob = self.as_memory_block();
        let relocations = self.relocations();
        debug!(
            "finalized block: {} main + {} trailing bytes, {} pointers",
            self.memory.len(),
            self.trailing_sub_blocks.len(),
            relocations.len()
        );
        Block::new(blob, relocations)
    }
}

mod private {
    pub trait Sealed {}
}

/// The closed set of on-the-wire value types accepted by
/// [`BlockSerializer::serialize_value`].
pub trait BlockValue: private::Sealed {
    /// Writes the value into the serializer.
    fn write_value(&self, serializer: &mut BlockSerializer);
}

macro_rules! impl_scalar_value {
    ($($t:ty),*) => {
        $(
            impl private::Sealed for $t {}

            impl BlockValue for $t {
                fn write_value(&self, serializer: &mut BlockSerializer) {
                    serializer.push_back_raw(&self.to_le_bytes());
                }
            }
        )*
    }
}

impl_scalar_value!(u8, u16, u32, u64, f32);

impl private::Sealed for usize {}

/// Sizes and counts are stored as u64 so blocks do not depend on the host word size.
impl BlockValue for usize {
    fn write_value(&self, serializer: &mut BlockSerializer) {
        serializer.push_back_raw(&(*self as u64).to_le_bytes());
    }
}

impl private::Sealed for str {}

impl BlockValue for str {
    fn write_value(&self, serializer: &mut BlockSerializer) {
        serializer.serialize_raw_sub_block(self.as_bytes(), SpecialBuffer::String);
    }
}

impl private::Sealed for String {}

impl BlockValue for String {
    fn write_value(&self, serializer: &mut BlockSerializer) {
        self.as_str().write_value(serializer);
    }
}
