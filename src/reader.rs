//! The read-side engine.
//!
//! A finalized blob is an arena: every pointer field is an offset into the same allocation.
//! [`BlockView`] resolves those offsets whether or not the block has been patched, and
//! [`BlockCursor`] walks a region of the blob field by field, in the same order the writer
//! used. Types describe their own layout by implementing [`FromBlock`], usually through
//! `#[derive(BlockObject)]`.
//!
//! Nothing here dereferences a raw address. A patched slot is turned back into an offset by
//! subtracting the base it was patched against, and every resolved offset is checked against
//! the relocation table and the blob bounds.

use std::marker::PhantomData;

use crate::dispatch::{BlockLayout, CountedArray, padding_for};
use crate::error::{BlockError, Result};
use crate::format::{POINTER_SIZE, PTR_FLAG_BIT, PTR_MASK, Relocation, SpecialBuffer, read_u64};

/// A read-only view over a finalized blob and its relocation table.
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a> {
    blob: &'a [u8],
    /// Sorted by `pointer_offset`.
    relocations: &'a [Relocation],
    base: Option<u64>,
}

impl<'a> BlockView<'a> {
    /// Creates a view. `relocations` must be sorted by slot offset and `base` must be the
    /// value the blob was patched against, if it was patched.
    pub(crate) fn new(blob: &'a [u8], relocations: &'a [Relocation], base: Option<u64>) -> Self {
        Self {
            blob,
            relocations,
            base,
        }
    }

    /// The raw blob.
    pub fn bytes(&self) -> &'a [u8] {
        self.blob
    }

    /// Size of the blob in bytes.
    pub fn len(&self) -> usize {
        self.blob.len()
    }

    /// Returns true if the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }

    /// The relocation table, sorted by slot offset.
    pub fn relocations(&self) -> &'a [Relocation] {
        self.relocations
    }

    /// Returns a cursor positioned on the root object.
    pub fn cursor(&self) -> BlockCursor<'a> {
        BlockCursor {
            view: *self,
            pos: 0,
            end: self.blob.len(),
        }
    }

    /// Returns a cursor over the pointee of a relocation.
    pub fn cursor_at(&self, relocation: &Relocation) -> BlockCursor<'a> {
        let start = relocation.sub_block_offset as usize;
        BlockCursor {
            view: *self,
            pos: start,
            end: start + relocation.sub_block_size as usize,
        }
    }

    /// Decodes the root object.
    pub fn root<T: FromBlock>(&self) -> Result<T> {
        T::read_from(&mut self.cursor())
    }

    /// Borrows the bytes a relocation points at.
    pub fn sub_block_bytes(&self, relocation: &Relocation) -> Result<&'a [u8]> {
        let start = relocation.sub_block_offset as usize;
        let end = start
            .checked_add(relocation.sub_block_size as usize)
            .ok_or_else(|| BlockError::Corrupt("Sub-block range overflows".into()))?;
        self.blob.get(start..end).ok_or_else(|| {
            BlockError::Corrupt(format!(
                "Sub-block {start}..{end} outside blob of {} bytes",
                self.blob.len()
            ))
        })
    }

    /// Looks up the relocation registered for the slot at `slot_offset`.
    pub fn relocation_at(&self, slot_offset: usize) -> Result<Relocation> {
        let slot = slot_offset as u64;
        self.relocations
            .binary_search_by_key(&slot, |r| r.pointer_offset)
            .ok()
            .and_then(|index| self.relocations.get(index).copied())
            .ok_or_else(|| {
                BlockError::Corrupt(format!("No pointer registered at offset {slot_offset}"))
            })
    }

    /// Resolves the pointer slot at `slot_offset` to its relocation record.
    ///
    /// Accepts both the unpatched encoding (flag set, displacement from the slot) and the
    /// patched one (flag clear, `base + target`).
    pub fn resolve(&self, slot_offset: usize) -> Result<Relocation> {
        let relocation = self.relocation_at(slot_offset)?;
        let value = read_u64(self.blob, slot_offset)?;

        let target = if value & PTR_FLAG_BIT != 0 {
            (slot_offset as u64).checked_add(value & PTR_MASK)
        } else {
            self.base.and_then(|base| value.checked_sub(base))
        };

        match target {
            Some(target) if target == relocation.sub_block_offset => Ok(relocation),
            Some(target) => Err(BlockError::Corrupt(format!(
                "Pointer at {slot_offset} resolves to {target}, table expects {}",
                relocation.sub_block_offset
            ))),
            None => Err(BlockError::Corrupt(format!(
                "Pointer at {slot_offset} holds {value:#x} which is neither relative nor patched against this block"
            ))),
        }
    }
}

/// Sequential reader over a region of a blob.
///
/// Positions are absolute within the blob, so pointer slots read through any cursor resolve
/// against the same relocation table.
#[derive(Debug, Clone)]
pub struct BlockCursor<'a> {
    view: BlockView<'a>,
    pos: usize,
    end: usize,
}

impl<'a> BlockCursor<'a> {
    /// The view this cursor reads from.
    pub fn view(&self) -> &BlockView<'a> {
        &self.view
    }

    /// Absolute position in the blob.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left before the end of the region.
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    /// Borrows the next `len` bytes and advances past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.end)
            .ok_or_else(|| {
                BlockError::Corrupt(format!(
                    "Read of {len} bytes at {} past end of region ({})",
                    self.pos, self.end
                ))
            })?;
        let bytes = self.view.blob.get(self.pos..end).ok_or_else(|| {
            BlockError::Corrupt(format!("Region end {end} outside blob"))
        })?;
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a fixed-size byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Skips `len` bytes of padding.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Reads a pointer slot and resolves it.
    pub fn read_pointer(&mut self) -> Result<Relocation> {
        let slot = self.pos;
        self.skip(POINTER_SIZE)?;
        self.view.resolve(slot)
    }

    /// Returns a cursor over the pointee of a relocation.
    pub fn sub_cursor(&self, relocation: &Relocation) -> BlockCursor<'a> {
        self.view.cursor_at(relocation)
    }

    /// Decodes the next value.
    pub fn read<T: FromBlock>(&mut self) -> Result<T> {
        T::read_from(self)
    }

    /// Reads a u64 count and converts it to `usize`.
    pub fn read_count(&mut self) -> Result<usize> {
        let count = u64::from_le_bytes(self.read_array()?);
        usize::try_from(count)
            .map_err(|_| BlockError::Corrupt(format!("Count {count} does not fit in usize")))
    }

    /// Reads a plain-data value with its host layout.
    pub fn read_pod<T: bytemuck::Pod>(&mut self) -> Result<T> {
        let bytes = self.read_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Reads `count` consecutive plain-data values.
    pub fn read_pod_slice<T: bytemuck::Pod>(&mut self, count: usize) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>();
        let total = count
            .checked_mul(size)
            .ok_or_else(|| BlockError::Corrupt(format!("Element count {count} overflows")))?;
        let bytes = self.read_bytes(total)?;
        if size == 0 {
            return Ok(vec![T::zeroed(); count]);
        }
        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

/// A type that can be decoded from a block.
///
/// Implementations must mirror the matching [`BlockSerialize`](crate::BlockSerialize) impl
/// field for field.
pub trait FromBlock: BlockLayout + Sized {
    /// Decodes one value at the cursor.
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self>;

    /// Decodes `count` values laid out back to back, as produced by `serialize_slice`.
    fn read_slice(cursor: &mut BlockCursor<'_>, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::read_from(cursor)).collect()
    }
}

macro_rules! impl_scalar_from_block {
    ($($t:ty),*) => {
        $(
            impl FromBlock for $t {
                fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
                    Ok(<$t>::from_le_bytes(cursor.read_array()?))
                }

                fn read_slice(cursor: &mut BlockCursor<'_>, count: usize) -> Result<Vec<Self>> {
                    const SIZE: usize = std::mem::size_of::<$t>();
                    let total = count.checked_mul(SIZE).ok_or_else(|| {
                        BlockError::Corrupt(format!("Element count {count} overflows"))
                    })?;
                    let bytes = cursor.read_bytes(total)?;
                    Ok(bytes
                        .chunks_exact(SIZE)
                        .map(|chunk| {
                            let mut raw = [0u8; SIZE];
                            raw.copy_from_slice(chunk);
                            <$t>::from_le_bytes(raw)
                        })
                        .collect())
                }
            }
        )*
    }
}

impl_scalar_from_block!(u8, u16, u32, u64, f32);

impl FromBlock for usize {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        cursor.read_count()
    }
}

impl FromBlock for String {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        let relocation = cursor.read_pointer()?;
        let bytes = cursor.view().sub_block_bytes(&relocation)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            BlockError::Corrupt(format!(
                "String at {} is not valid UTF-8: {e}",
                relocation.sub_block_offset
            ))
        })
    }
}

impl<T: FromBlock> FromBlock for Vec<T> {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        let relocation = cursor.read_pointer()?;
        let count = cursor.read_count()?;
        T::read_slice(&mut cursor.sub_cursor(&relocation), count)
    }
}

impl<T: FromBlock> FromBlock for CountedArray<T> {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        Vec::<T>::read_from(cursor).map(CountedArray::from)
    }
}

impl<T: FromBlock> FromBlock for Box<T> {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        let relocation = cursor.read_pointer()?;
        T::read_from(&mut cursor.sub_cursor(&relocation)).map(Box::new)
    }
}

impl<A: FromBlock, B: FromBlock> FromBlock for (A, B) {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        let start = cursor.position();
        let first = A::read_from(cursor)?;
        cursor.skip(padding_for(cursor.position() - start, B::BLOCK_ALIGN))?;
        let second = B::read_from(cursor)?;
        cursor.skip(padding_for(
            cursor.position() - start,
            <Self as BlockLayout>::BLOCK_ALIGN,
        ))?;
        Ok((first, second))
    }
}

impl<T: FromBlock, const N: usize> FromBlock for [T; N] {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        let items = (0..N)
            .map(|_| T::read_from(cursor))
            .collect::<Result<Vec<T>>>()?;
        items
            .try_into()
            .map_err(|_| BlockError::Internal(format!("Array of {N} elements came back short")))
    }
}

macro_rules! impl_math_from_block {
    ($($t:ty => $from:ident, $n:expr),* $(,)?) => {
        $(
            impl FromBlock for $t {
                fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
                    let components: [f32; $n] = FromBlock::read_from(cursor)?;
                    Ok(<$t>::$from(&components))
                }

                fn read_slice(cursor: &mut BlockCursor<'_>, count: usize) -> Result<Vec<Self>> {
                    let total = count.checked_mul($n).ok_or_else(|| {
                        BlockError::Corrupt(format!("Element count {count} overflows"))
                    })?;
                    let components = f32::read_slice(cursor, total)?;
                    Ok(components.chunks_exact($n).map(<$t>::$from).collect())
                }
            }
        )*
    }
}

impl_math_from_block!(
    glam::Vec2 => from_slice, 2,
    glam::Vec3 => from_slice, 3,
    glam::Vec4 => from_slice, 4,
    glam::Quat => from_slice, 4,
    glam::Mat3 => from_cols_slice, 9,
    glam::Mat4 => from_cols_slice, 16,
);

/// A pointer field resolved on demand.
///
/// Occupies the same 8-byte slot as a `Box<T>` field, but reading it only records where the
/// pointee lives. Call [`resolve`](Self::resolve) to decode it, or [`bytes`](Self::bytes) to
/// borrow the raw sub-block without decoding.
#[derive(Debug)]
pub struct Offset<T> {
    relocation: Relocation,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Offset<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Offset<T> {}

impl<T> Offset<T> {
    /// Offset of the pointee within the blob.
    pub fn target(&self) -> usize {
        self.relocation.sub_block_offset as usize
    }

    /// Size of the pointee sub-block in bytes.
    pub fn len(&self) -> usize {
        self.relocation.sub_block_size as usize
    }

    /// Returns true if the pointee sub-block is empty.
    pub fn is_empty(&self) -> bool {
        self.relocation.sub_block_size == 0
    }

    /// Semantic tag of the pointee.
    pub fn tag(&self) -> SpecialBuffer {
        self.relocation.special_buffer
    }

    /// Borrows the pointee's raw bytes.
    pub fn bytes<'a>(&self, view: &BlockView<'a>) -> Result<&'a [u8]> {
        view.sub_block_bytes(&self.relocation)
    }
}

impl<T: FromBlock> Offset<T> {
    /// Decodes the pointee.
    pub fn resolve(&self, view: &BlockView<'_>) -> Result<T> {
        T::read_from(&mut view.cursor_at(&self.relocation))
    }
}

impl<T> BlockLayout for Offset<T> {
    const BLOCK_ALIGN: usize = POINTER_SIZE;
}

impl<T> FromBlock for Offset<T> {
    fn read_from(cursor: &mut BlockCursor<'_>) -> Result<Self> {
        Ok(Self {
            relocation: cursor.read_pointer()?,
            _marker: PhantomData,
        })
    }
}
