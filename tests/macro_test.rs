#![allow(missing_docs)]

use scaffold_block::{
    BlockLayout, BlockObject, BlockSerialize, BlockSerializer, FromBlock, Scaffold, SpecialBuffer,
};

#[derive(BlockObject, Debug, PartialEq)]
struct Mesh {
    name: String,
    #[block(buffer = "vertex")]
    vertices: Vec<f32>,
    #[block(buffer = "index")]
    indices: Vec<u16>,
    lods: Vec<u32>,
}

#[derive(BlockObject, Debug, PartialEq)]
struct Pair(u32, String);

#[derive(BlockObject, Debug, PartialEq)]
struct Marker;

#[deny(unused_variables)]
mod strict {
    use scaffold_block::BlockObject;

    #[derive(BlockObject, Debug, PartialEq)]
    pub struct Empty;

    #[derive(BlockObject, Debug, PartialEq)]
    pub struct Wrapper(pub Empty, pub u16);
}

#[derive(BlockObject, Debug, PartialEq)]
struct Tagged<T: BlockSerialize + FromBlock> {
    tag: u8,
    value: T,
}

#[derive(BlockObject, Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
#[block(raw)]
struct Extent {
    min: [f32; 3],
    max: [f32; 3],
}

#[derive(BlockObject, Debug, PartialEq)]
struct Bounds {
    count: u8,
    extents: Vec<Extent>,
}

// --- FIELD ATTRIBUTES ---

#[test]
fn test_buffer_attributes_tag_sub_blocks() -> scaffold_block::Result<()> {
    let mesh = Mesh {
        name: "quad".into(),
        vertices: vec![0.0, 1.0, 2.0, 3.0],
        indices: vec![0, 1, 2, 2, 3, 0],
        lods: vec![0],
    };
    let block = Scaffold::serialize(&mesh)?;

    let tags: Vec<SpecialBuffer> = block.relocations().iter().map(|r| r.special_buffer).collect();
    assert_eq!(
        tags,
        [
            SpecialBuffer::String,
            SpecialBuffer::VertexBuffer,
            SpecialBuffer::IndexBuffer,
            SpecialBuffer::Vector,
        ]
    );
    assert_eq!(block.relocations()[1].sub_block_size, 16);
    assert_eq!(block.relocations()[2].sub_block_size, 12);

    assert_eq!(block.first_object::<Mesh>()?, mesh);
    Ok(())
}

// --- STRUCT SHAPES ---

#[test]
fn test_tuple_struct() -> scaffold_block::Result<()> {
    let value = Pair(9, "nine".into());
    let block = Scaffold::serialize(&value)?;
    assert_eq!(block.size(), 4 + 8 + 4);
    assert_eq!(block.first_object::<Pair>()?, value);
    Ok(())
}

#[test]
fn test_unit_struct_is_empty() -> scaffold_block::Result<()> {
    let mut serializer = BlockSerializer::new();
    serializer.serialize(&Marker);
    assert_eq!(serializer.size(), 0);
    assert_eq!(<Marker as BlockLayout>::BLOCK_ALIGN, 1);

    let block = Scaffold::serialize(&(Marker, 5u32))?;
    assert_eq!(block.first_object::<(Marker, u32)>()?, (Marker, 5));
    Ok(())
}

#[test]
fn test_unit_struct_builds_under_strict_lints() -> scaffold_block::Result<()> {
    let mut serializer = BlockSerializer::new();
    serializer.serialize(&strict::Empty);
    assert_eq!(serializer.size(), 0);

    let value = strict::Wrapper(strict::Empty, 0xBEEF);
    let block = Scaffold::serialize(&value)?;
    assert_eq!(block.size(), 2);
    assert_eq!(block.first_object::<strict::Wrapper>()?, value);
    Ok(())
}

#[test]
fn test_generic_struct() -> scaffold_block::Result<()> {
    let value = Tagged {
        tag: 1,
        value: vec!["x".to_string(), "yz".to_string()],
    };
    assert_eq!(<Tagged<Vec<String>> as BlockLayout>::BLOCK_ALIGN, 8);

    let block = Scaffold::serialize(&value)?;
    assert_eq!(block.first_object::<Tagged<Vec<String>>>()?, value);
    Ok(())
}

// --- RAW ---

#[test]
fn test_raw_struct_copies_host_layout() -> scaffold_block::Result<()> {
    let extent = Extent {
        min: [0.0, -1.0, 2.0],
        max: [3.0, 4.0, 5.5],
    };
    let block = Scaffold::serialize(&extent)?;
    assert_eq!(block.bytes(), bytemuck::bytes_of(&extent));
    assert_eq!(<Extent as BlockLayout>::BLOCK_ALIGN, 4);
    assert_eq!(block.first_object::<Extent>()?, extent);
    Ok(())
}

#[test]
fn test_raw_elements_form_one_sub_block() -> scaffold_block::Result<()> {
    let bounds = Bounds {
        count: 2,
        extents: vec![
            Extent {
                min: [0.0; 3],
                max: [1.0; 3],
            },
            Extent {
                min: [-1.0; 3],
                max: [0.0; 3],
            },
        ],
    };
    let block = Scaffold::serialize(&bounds)?;

    assert_eq!(block.relocations().len(), 1);
    let elements = block.relocations()[0];
    assert_eq!(elements.sub_block_size, 2 * 24);
    assert_eq!(
        &block.bytes()[elements.sub_block_offset as usize..],
        bytemuck::cast_slice::<Extent, u8>(&bounds.extents)
    );
    assert_eq!(block.first_object::<Bounds>()?, bounds);
    Ok(())
}
