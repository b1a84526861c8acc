#![allow(missing_docs)]

use scaffold_block::block::{duplicate, get_first_object, get_size, initialize as initialize_image};
use scaffold_block::format::{
    BlockHeader, PTR_FLAG_BIT, PTR_MASK, Relocation, read_u64, write_u64,
};
use scaffold_block::{Block, BlockError, BlockObject, Scaffold};

#[derive(BlockObject, Debug, PartialEq, Clone)]
struct Leaf {
    name: String,
    weight: f32,
}

#[derive(BlockObject, Debug, PartialEq, Clone)]
struct Branch {
    leaves: Vec<Leaf>,
    tag: String,
}

#[derive(BlockObject, Debug, PartialEq, Clone)]
struct Tree {
    id: u64,
    branches: Vec<Branch>,
    root: Box<Leaf>,
}

fn create_tree() -> Tree {
    Tree {
        id: 7,
        branches: (0..3)
            .map(|b| Branch {
                leaves: (0..4)
                    .map(|l| Leaf {
                        name: format!("leaf-{b}-{l}"),
                        weight: l as f32 * 0.5,
                    })
                    .collect(),
                tag: format!("branch-{b}"),
            })
            .collect(),
        root: Box::new(Leaf {
            name: "root".into(),
            weight: 1.0,
        }),
    }
}

fn assert_patched_against(block: &Block, base: u64) -> scaffold_block::Result<()> {
    for relocation in block.relocations() {
        let value = read_u64(block.bytes(), relocation.pointer_offset as usize)?;
        assert_eq!(value, base + relocation.sub_block_offset);
    }
    Ok(())
}

// --- RELOCATION ---

#[test]
fn test_relocation_is_base_agnostic() -> scaffold_block::Result<()> {
    let tree = create_tree();
    let original = Scaffold::serialize(&tree)?;

    let mut low = original.duplicate()?;
    let mut high = original.duplicate()?;
    assert_eq!(low.initialize(Some(0x1000))?, original.relocations().len());
    assert_eq!(high.initialize(Some(0x7f00_0000_0000))?, original.relocations().len());

    assert_patched_against(&low, 0x1000)?;
    assert_patched_against(&high, 0x7f00_0000_0000)?;

    assert_eq!(low.first_object::<Tree>()?, tree);
    assert_eq!(high.first_object::<Tree>()?, tree);
    Ok(())
}

#[test]
fn test_default_base_is_blob_address() -> scaffold_block::Result<()> {
    let mut block = Scaffold::serialize(&create_tree())?;
    block.initialize(None)?;
    let base = block.bytes().as_ptr() as usize as u64;
    assert_eq!(block.base(), Some(base));
    assert_patched_against(&block, base)
}

#[test]
fn test_second_initialize_is_a_no_op() -> scaffold_block::Result<()> {
    let mut block = Scaffold::serialize(&create_tree())?;
    let first = block.initialize(Some(0x4000))?;
    assert!(first > 0);
    let snapshot = block.bytes().to_vec();

    assert_eq!(block.initialize(Some(0x4000))?, 0);
    assert_eq!(block.initialize(Some(0x9000))?, 0);
    assert_eq!(block.bytes(), snapshot.as_slice());
    assert_eq!(block.base(), Some(0x4000));
    Ok(())
}

#[test]
fn test_nested_three_levels_deep() -> scaffold_block::Result<()> {
    // Tree -> Vec<Branch> -> Vec<Leaf> -> String
    let tree = create_tree();
    let block = Scaffold::serialize(&tree)?;

    // The root footprint is 32 bytes: id, the branches slot and count, the root slot.
    let nested = block
        .relocations()
        .iter()
        .filter(|r| r.pointer_offset >= 32)
        .count();
    // Per branch: the leaves vector, the tag, and one name per leaf. Plus the root name.
    assert_eq!(nested, 3 * (2 + 4) + 1);

    for relocation in block.relocations() {
        let value = read_u64(block.bytes(), relocation.pointer_offset as usize)?;
        assert_ne!(value & PTR_FLAG_BIT, 0);
        assert_eq!(relocation.pointer_offset + relocation.displacement(), relocation.sub_block_offset);
    }

    let mut patched = block.duplicate()?;
    patched.initialize(Some(0x10_0000))?;
    assert_patched_against(&patched, 0x10_0000)?;
    assert_eq!(patched.first_object::<Tree>()?, tree);
    Ok(())
}

#[test]
fn test_duplicate_of_patched_block_is_unpatched() -> scaffold_block::Result<()> {
    let original = Scaffold::serialize(&create_tree())?;
    let mut patched = original.duplicate()?;
    patched.initialize(Some(0x2000))?;

    let copy = patched.duplicate()?;
    assert!(!copy.is_patched());
    assert_eq!(copy.bytes(), original.bytes());
    Ok(())
}

// --- IMAGES ---

#[test]
fn test_image_round_trip() -> scaffold_block::Result<()> {
    let tree = create_tree();
    let block = Scaffold::serialize(&tree)?;
    let image = block.to_image()?;

    assert_eq!(image.len(), block.image_size());
    assert_eq!(get_size(&image)?, image.len());
    assert_eq!(get_first_object(&image)?, block.bytes());

    let header = BlockHeader::from_bytes(&image)?;
    assert_eq!(header.raw_memory_size, block.size() as u64);
    assert_eq!(header.internal_pointer_count, block.relocations().len() as u64);

    let loaded = Block::from_image(&image)?;
    assert_eq!(loaded, block);
    assert_eq!(loaded.first_object::<Tree>()?, tree);
    Ok(())
}

#[test]
fn test_image_functions_patch_in_place() -> scaffold_block::Result<()> {
    let tree = create_tree();
    let block = Scaffold::serialize(&tree)?;
    let mut image = block.to_image()?;

    let patched = initialize_image(&mut image, Some(0x8000))?;
    assert_eq!(patched, block.relocations().len());
    assert_eq!(initialize_image(&mut image, Some(0x8000))?, 0);

    let blob = get_first_object(&image)?;
    for relocation in block.relocations() {
        assert_eq!(
            read_u64(blob, relocation.pointer_offset as usize)?,
            0x8000 + relocation.sub_block_offset
        );
    }

    // A duplicate of the patched image is back in relative form.
    let copy = duplicate(&image)?;
    assert_eq!(get_first_object(&copy)?, block.bytes());
    assert_eq!(initialize_image(&mut copy.clone(), None)?, patched);

    // Loading a patched image normalizes it.
    let loaded = Block::from_image(&image)?;
    assert_eq!(loaded.bytes(), block.bytes());
    assert_eq!(loaded.first_object::<Tree>()?, tree);
    Ok(())
}

#[test]
fn test_image_of_patched_block_is_unpatched() -> scaffold_block::Result<()> {
    let original = Scaffold::serialize(&create_tree())?;
    let mut patched = original.duplicate()?;
    patched.initialize(None)?;
    assert_eq!(patched.to_image()?, original.to_image()?);
    Ok(())
}

#[test]
fn test_duplicate_ignores_trailing_bytes() -> scaffold_block::Result<()> {
    let block = Scaffold::serialize(&create_tree())?;
    let mut image = block.to_image()?;
    let size = image.len();
    image.extend_from_slice(b"next image");

    assert_eq!(get_size(&image)?, size);
    assert_eq!(duplicate(&image)?.len(), size);
    Ok(())
}

// --- CORRUPTION ---

#[test]
fn test_rejects_short_image() {
    assert!(matches!(Block::from_image(&[1, 2, 3]), Err(BlockError::Corrupt(_))));
}

#[test]
fn test_rejects_truncated_image() -> scaffold_block::Result<()> {
    let image = Scaffold::serialize(&create_tree())?.to_image()?;
    let truncated = &image[..image.len() - 1];
    assert!(matches!(Block::from_image(truncated), Err(BlockError::Corrupt(_))));
    Ok(())
}

#[test]
fn test_rejects_slot_that_disagrees_with_table() -> scaffold_block::Result<()> {
    let block = Scaffold::serialize(&create_tree())?;
    let mut image = block.to_image()?;
    let slot = BlockHeader::SIZE + block.relocations()[0].pointer_offset as usize;
    write_u64(&mut image, slot, 4 | PTR_FLAG_BIT)?;

    assert!(matches!(Block::from_image(&image), Err(BlockError::Corrupt(_))));
    assert!(matches!(initialize_image(&mut image, None), Err(BlockError::Corrupt(_))));
    Ok(())
}

#[test]
fn test_rejects_out_of_bounds_relocation() -> scaffold_block::Result<()> {
    let block = Scaffold::serialize(&"text".to_string())?;
    let mut image = block.to_image()?;

    let record_at = BlockHeader::SIZE + block.size();
    let bad = Relocation {
        sub_block_size: 1_000,
        ..block.relocations()[0]
    };
    image[record_at..record_at + Relocation::SIZE].copy_from_slice(&bad.to_bytes());

    assert!(matches!(Block::from_image(&image), Err(BlockError::Corrupt(_))));
    Ok(())
}

#[test]
fn test_rejects_unknown_special_buffer() -> scaffold_block::Result<()> {
    let block = Scaffold::serialize(&"text".to_string())?;
    let mut image = block.to_image()?;
    let tag_at = BlockHeader::SIZE + block.size() + 24;
    write_u64(&mut image, tag_at, 99)?;

    assert!(matches!(Block::from_image(&image), Err(BlockError::Corrupt(_))));
    Ok(())
}

#[test]
fn test_rejects_base_in_flag_range() -> scaffold_block::Result<()> {
    let mut block = Scaffold::serialize(&create_tree())?;
    let snapshot = block.bytes().to_vec();
    let near_limit = PTR_MASK - block.size() as u64 + 1;

    for base in [PTR_FLAG_BIT, u64::MAX, near_limit] {
        assert!(matches!(block.initialize(Some(base)), Err(BlockError::Format(_))));
        assert!(!block.is_patched());
        assert_eq!(block.bytes(), snapshot.as_slice());
    }

    let highest = PTR_MASK - block.size() as u64;
    assert!(block.initialize(Some(highest))? > 0);
    assert_patched_against(&block, highest)?;

    let mut image = Scaffold::serialize(&create_tree())?.to_image()?;
    let untouched = image.clone();
    assert!(matches!(
        initialize_image(&mut image, Some(PTR_FLAG_BIT)),
        Err(BlockError::Format(_))
    ));
    assert_eq!(image, untouched);
    assert!(initialize_image(&mut image, Some(0x1000))? > 0);
    Ok(())
}
