//! Finalized blocks and their persisted images.
//!
//! A [`Block`] owns one blob plus the relocation table that describes every pointer slot in
//! it. Freshly finalized blocks are *unpatched*: each slot holds a displacement with
//! [`PTR_FLAG_BIT`] set, so the bytes are position independent and can be copied, hashed and
//! written to disk as they are. [`Block::initialize`] turns the displacements into absolute
//! values (`base + target`), which is the form a consumer hands to code that wants flat
//! addresses.
//!
//! The free functions at the bottom of this module work directly on image bytes
//! (`[BlockHeader] [Blob] [Relocation * N]`) for callers that manage their own buffers.
//! Images read from a memory-mapped file are never patched in place: load them with
//! [`Block::from_image`] or [`duplicate`] first.

use log::debug;

use crate::error::{BlockError, Result};
use crate::format::{
    BlockHeader, POINTER_SIZE, PTR_FLAG_BIT, PTR_MASK, Relocation, read_u64, write_u64,
};
use crate::reader::{BlockView, FromBlock};

/// An owned, finalized block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    blob: Vec<u8>,
    /// Sorted by `pointer_offset`.
    relocations: Vec<Relocation>,
    base: Option<u64>,
}

impl Block {
    /// Wraps an unpatched blob and its relocation table.
    ///
    /// Every record is checked against the blob bounds, and slots must not overlap.
    pub(crate) fn new(blob: Vec<u8>, mut relocations: Vec<Relocation>) -> Result<Self> {
        relocations.sort_by_key(|r| r.pointer_offset);
        check_table(&relocations, blob.len())?;
        Ok(Self {
            blob,
            relocations,
            base: None,
        })
    }

    /// Loads a block from image bytes.
    ///
    /// The blob is copied into a fresh allocation and every slot is checked against the
    /// table. An image that was patched before it was saved is brought back to the
    /// unpatched form, so the returned block can be initialized at its own address.
    pub fn from_image(image: &[u8]) -> Result<Self> {
        let (header, relocations) = parse_image(image)?;
        let blob_end = BlockHeader::SIZE + header.raw_memory_size as usize;
        let mut blob = image
            .get(BlockHeader::SIZE..blob_end)
            .ok_or_else(|| BlockError::Corrupt("Image blob truncated".into()))?
            .to_vec();

        let mut sorted = relocations;
        sorted.sort_by_key(|r| r.pointer_offset);
        check_table(&sorted, blob.len())?;
        check_slots(&blob, &sorted)?;
        encode_slots(&mut blob, &sorted)?;

        Ok(Self {
            blob,
            relocations: sorted,
            base: None,
        })
    }

    /// Serializes the block to image bytes. The image always carries unpatched slots.
    pub fn to_image(&self) -> Result<Vec<u8>> {
        let header = BlockHeader {
            raw_memory_size: self.blob.len() as u64,
            internal_pointer_count: self.relocations.len() as u64,
        };
        let mut image = Vec::with_capacity(header.image_size()?);
        image.extend_from_slice(&header.to_bytes());
        let blob_start = image.len();
        image.extend_from_slice(&self.blob);
        if self.base.is_some() {
            encode_slots(&mut image[blob_start..], &self.relocations)?;
        }
        for relocation in &self.relocations {
            image.extend_from_slice(&relocation.to_bytes());
        }
        Ok(image)
    }

    /// Patches every unpatched slot to `base + target` and returns the number of slots
    /// written.
    ///
    /// `base` defaults to the address of the blob itself. A block that is already patched
    /// is left alone and the call returns 0.
    ///
    /// # Errors
    /// Returns `BlockError::Format` if `base` plus the blob size reaches [`PTR_FLAG_BIT`],
    /// since such values could not be told apart from unpatched slots.
    pub fn initialize(&mut self, base: Option<u64>) -> Result<usize> {
        let base = base.unwrap_or(self.blob.as_ptr() as usize as u64);
        let patched = patch_slots(&mut self.blob, &self.relocations, base)?;
        if self.base.is_none() {
            self.base = Some(base);
        }
        debug!(
            "initialized block at base {:#x}: {} of {} slots patched",
            self.base.unwrap_or(base),
            patched,
            self.relocations.len()
        );
        Ok(patched)
    }

    /// Returns true once [`initialize`](Self::initialize) has run.
    pub fn is_patched(&self) -> bool {
        self.base.is_some()
    }

    /// The base the slots were patched against, if any.
    pub fn base(&self) -> Option<u64> {
        self.base
    }

    /// Size of the blob (main block plus trailing sub-blocks).
    pub fn size(&self) -> usize {
        self.blob.len()
    }

    /// Size of the image [`to_image`](Self::to_image) produces.
    pub fn image_size(&self) -> usize {
        BlockHeader::SIZE + self.blob.len() + self.relocations.len() * Relocation::SIZE
    }

    /// The blob bytes in their current state.
    pub fn bytes(&self) -> &[u8] {
        &self.blob
    }

    /// The relocation table, sorted by slot offset.
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// A typed view over the blob.
    pub fn view(&self) -> BlockView<'_> {
        BlockView::new(&self.blob, &self.relocations, self.base)
    }

    /// Decodes the root object.
    pub fn first_object<T: FromBlock>(&self) -> Result<T> {
        self.view().root()
    }

    /// Copies the block into a fresh, unpatched block.
    pub fn duplicate(&self) -> Result<Self> {
        let mut blob = self.blob.clone();
        encode_slots(&mut blob, &self.relocations)?;
        Ok(Self {
            blob,
            relocations: self.relocations.clone(),
            base: None,
        })
    }

    /// Consumes the block and returns the blob.
    pub fn into_bytes(self) -> Vec<u8> {
        self.blob
    }
}

/// Patches the blob inside an image in place and returns the number of slots written.
///
/// `base` defaults to the address of the blob inside `image`. Slots that are already patched
/// are skipped, so a second call returns 0. A base that would carry a patched slot into
/// [`PTR_FLAG_BIT`] is a `Format` error and leaves the image untouched.
pub fn initialize(image: &mut [u8], base: Option<u64>) -> Result<usize> {
    let (header, relocations) = parse_image(image)?;
    let blob_end = BlockHeader::SIZE + header.raw_memory_size as usize;
    let blob = image
        .get_mut(BlockHeader::SIZE..blob_end)
        .ok_or_else(|| BlockError::Corrupt("Image blob truncated".into()))?;
    check_table_unsorted(&relocations, blob.len())?;

    let base = base.unwrap_or(blob.as_ptr() as usize as u64);
    let patched = patch_slots(blob, &relocations, base)?;
    debug!(
        "initialized image at base {base:#x}: {patched} of {} slots patched",
        relocations.len()
    );
    Ok(patched)
}

/// Borrows the blob of an image. The root object starts at offset 0 of the returned slice.
pub fn get_first_object(image: &[u8]) -> Result<&[u8]> {
    let header = BlockHeader::from_bytes(image)?;
    let blob_end = (header.raw_memory_size as usize)
        .checked_add(BlockHeader::SIZE)
        .ok_or_else(|| BlockError::Corrupt("Block header describes an impossible size".into()))?;
    image
        .get(BlockHeader::SIZE..blob_end)
        .ok_or_else(|| {
            BlockError::Corrupt(format!(
                "Image of {} bytes is shorter than its {} byte blob",
                image.len(),
                header.raw_memory_size
            ))
        })
}

/// Total size of an image (header, blob and relocation table), read from its header.
pub fn get_size(image: &[u8]) -> Result<usize> {
    BlockHeader::from_bytes(image)?.image_size()
}

/// Copies an image and re-encodes every slot in the copy to its unpatched form.
///
/// The source may be patched or not; the copy is always safe to [`initialize`] wherever it
/// ends up.
pub fn duplicate(image: &[u8]) -> Result<Vec<u8>> {
    let (header, relocations) = parse_image(image)?;
    let size = header.image_size()?;
    let mut copy = image
        .get(..size)
        .ok_or_else(|| BlockError::Corrupt("Image truncated".into()))?
        .to_vec();

    let blob_end = BlockHeader::SIZE + header.raw_memory_size as usize;
    let blob = copy
        .get_mut(BlockHeader::SIZE..blob_end)
        .ok_or_else(|| BlockError::Corrupt("Image blob truncated".into()))?;
    check_table_unsorted(&relocations, blob.len())?;
    encode_slots(blob, &relocations)?;
    Ok(copy)
}

/// Reads the header and relocation table of an image.
fn parse_image(image: &[u8]) -> Result<(BlockHeader, Vec<Relocation>)> {
    let header = BlockHeader::from_bytes(image)?;
    let size = header.image_size()?;
    if image.len() < size {
        return Err(BlockError::Corrupt(format!(
            "Image of {} bytes is shorter than the {size} bytes its header describes",
            image.len()
        )));
    }

    let table_start = BlockHeader::SIZE + header.raw_memory_size as usize;
    let table = image
        .get(table_start..size)
        .ok_or_else(|| BlockError::Corrupt("Relocation table truncated".into()))?;
    let relocations = table
        .chunks_exact(Relocation::SIZE)
        .map(Relocation::from_bytes)
        .collect::<Result<Vec<_>>>()?;
    Ok((header, relocations))
}

/// Validates a sorted table: every record in bounds, no two slots overlapping.
fn check_table(relocations: &[Relocation], blob_len: usize) -> Result<()> {
    for relocation in relocations {
        relocation.validate(blob_len)?;
    }
    for (a, b) in relocations.iter().zip(relocations.iter().skip(1)) {
        if b.pointer_offset < a.pointer_offset + POINTER_SIZE as u64 {
            return Err(BlockError::Corrupt(format!(
                "Pointer slots at {} and {} overlap",
                a.pointer_offset, b.pointer_offset
            )));
        }
    }
    Ok(())
}

fn check_table_unsorted(relocations: &[Relocation], blob_len: usize) -> Result<()> {
    let mut sorted = relocations.to_vec();
    sorted.sort_by_key(|r| r.pointer_offset);
    check_table(&sorted, blob_len)
}

/// Checks that every slot agrees with its record.
///
/// Unpatched slots must hold the record's displacement. Patched slots must all agree on one
/// base.
fn check_slots(blob: &[u8], relocations: &[Relocation]) -> Result<()> {
    let mut patched_base: Option<u64> = None;
    for relocation in relocations {
        let value = read_u64(blob, relocation.pointer_offset as usize)?;
        if value & PTR_FLAG_BIT != 0 {
            if value & PTR_MASK != relocation.displacement() {
                return Err(BlockError::Corrupt(format!(
                    "Slot at {} holds displacement {}, table expects {}",
                    relocation.pointer_offset,
                    value & PTR_MASK,
                    relocation.displacement()
                )));
            }
            continue;
        }

        let base = value.checked_sub(relocation.sub_block_offset).ok_or_else(|| {
            BlockError::Corrupt(format!(
                "Patched slot at {} holds {value:#x}, below its target",
                relocation.pointer_offset
            ))
        })?;
        match patched_base {
            Some(expected) if expected != base => {
                return Err(BlockError::Corrupt(format!(
                    "Patched slot at {} implies base {base:#x}, other slots use {expected:#x}",
                    relocation.pointer_offset
                )));
            }
            _ => patched_base = Some(base),
        }
    }
    Ok(())
}

/// Writes `base + target` into every unpatched slot.
///
/// Every patched value must stay below [`PTR_FLAG_BIT`], otherwise it would read back as
/// unpatched. The base is checked against the end of the blob before the first slot is
/// written, so a rejected base leaves the blob untouched.
fn patch_slots(blob: &mut [u8], relocations: &[Relocation], base: u64) -> Result<usize> {
    let blob_len = blob.len() as u64;
    let mut patched = 0;
    for relocation in relocations {
        let slot = relocation.pointer_offset as usize;
        let value = read_u64(blob, slot)?;
        if value & PTR_FLAG_BIT == 0 {
            continue;
        }
        if patched == 0 && base.checked_add(blob_len).is_none_or(|end| end > PTR_MASK) {
            return Err(BlockError::Format(format!(
                "Base {base:#x} puts a {blob_len} byte blob beyond the addressable range"
            )));
        }
        let target = relocation.pointer_offset + (value & PTR_MASK);
        if target != relocation.sub_block_offset {
            return Err(BlockError::Corrupt(format!(
                "Slot at {slot} points at {target}, table expects {}",
                relocation.sub_block_offset
            )));
        }
        write_u64(blob, slot, base + target)?;
        patched += 1;
    }
    Ok(patched)
}

/// Writes the unpatched encoding into every slot, whatever state it is in.
fn encode_slots(blob: &mut [u8], relocations: &[Relocation]) -> Result<()> {
    for relocation in relocations {
        write_u64(blob, relocation.pointer_offset as usize, relocation.encoded())?;
    }
    Ok(())
}
