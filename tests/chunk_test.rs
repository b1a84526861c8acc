#![allow(missing_docs)]

use scaffold_block::chunk::{FileHeader, MAGIC_BYTES, chunk_type, checksum};
use scaffold_block::{BlockError, ChunkFileReader, ChunkFileWriter, ChunkHeader};
use tempfile::NamedTempFile;

fn sample_writer() -> ChunkFileWriter {
    let mut writer = ChunkFileWriter::new();
    writer
        .add_chunk(chunk_type::SKELETON, 3, "rig", b"skeleton payload".to_vec())
        .add_chunk(chunk_type::ANIMATION_SET, 1, "walk", vec![7u8; 1000]);
    writer
}

// --- ROUND TRIP ---

#[test]
fn test_in_memory_round_trip() -> scaffold_block::Result<()> {
    let bytes = sample_writer().to_bytes()?;
    assert_eq!(&bytes[0..8], &MAGIC_BYTES);

    let reader = ChunkFileReader::from_bytes(bytes)?;
    assert_eq!(reader.chunks().len(), 2);

    let skeleton = reader.find(chunk_type::SKELETON).ok_or_else(missing)?;
    assert_eq!(skeleton.name(), "rig");
    assert_eq!(skeleton.version, 3);
    assert_eq!(skeleton.compression_id, 0);
    assert_eq!(&*reader.read_chunk(skeleton)?, b"skeleton payload");

    let animation = reader.find(chunk_type::ANIMATION_SET).ok_or_else(missing)?;
    assert_eq!(&*reader.read_chunk(animation)?, vec![7u8; 1000].as_slice());
    assert!(reader.find(chunk_type::MODEL_SCAFFOLD).is_none());
    Ok(())
}

#[test]
fn test_file_round_trip() -> scaffold_block::Result<()> {
    let file = NamedTempFile::new()?;
    let written = sample_writer().save(file.path())?;
    assert_eq!(written, std::fs::metadata(file.path())?.len());

    let reader = ChunkFileReader::open(file.path())?;
    let header = reader.find(chunk_type::SKELETON).ok_or_else(missing)?;
    assert_eq!(header.checksum, checksum(b"skeleton payload"));
    assert_eq!(&*reader.read_chunk(header)?, b"skeleton payload");

    // Clones share the mapping.
    let clone = reader.clone();
    assert_eq!(clone.raw_chunk(header)?, reader.raw_chunk(header)?);
    Ok(())
}

#[test]
fn test_payloads_follow_table_of_contents() -> scaffold_block::Result<()> {
    let reader = ChunkFileReader::from_bytes(sample_writer().to_bytes()?)?;
    let first = reader.chunks()[0];
    let second = reader.chunks()[1];
    assert_eq!(
        first.file_offset,
        (FileHeader::SIZE + 2 * ChunkHeader::SIZE) as u64
    );
    assert_eq!(second.file_offset, first.file_offset + first.size);
    Ok(())
}

#[test]
fn test_long_names_are_truncated() -> scaffold_block::Result<()> {
    let long = "n".repeat(40);
    let mut writer = ChunkFileWriter::new();
    writer.add_chunk(chunk_type::SKELETON, 1, &long, Vec::new());
    let reader = ChunkFileReader::from_bytes(writer.to_bytes()?)?;
    assert_eq!(reader.chunks()[0].name(), "n".repeat(32));
    Ok(())
}

// --- ERRORS ---

#[test]
fn test_checksum_mismatch_is_corrupt() -> scaffold_block::Result<()> {
    let mut bytes = sample_writer().to_bytes()?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let reader = ChunkFileReader::from_bytes(bytes)?;
    let header = reader.find(chunk_type::ANIMATION_SET).ok_or_else(missing)?;
    assert!(matches!(reader.read_chunk(header), Err(BlockError::Corrupt(_))));

    // The untouched chunk still reads.
    let skeleton = reader.find(chunk_type::SKELETON).ok_or_else(missing)?;
    assert!(reader.read_chunk(skeleton).is_ok());
    Ok(())
}

#[test]
fn test_bad_magic_is_format_error() -> scaffold_block::Result<()> {
    let mut bytes = sample_writer().to_bytes()?;
    bytes[0] = b'X';
    assert!(matches!(
        ChunkFileReader::from_bytes(bytes),
        Err(BlockError::Format(_))
    ));
    Ok(())
}

#[test]
fn test_truncated_file_is_rejected() -> scaffold_block::Result<()> {
    let mut bytes = sample_writer().to_bytes()?;
    bytes.truncate(bytes.len() - 10);
    assert!(matches!(
        ChunkFileReader::from_bytes(bytes),
        Err(BlockError::Corrupt(_))
    ));
    assert!(matches!(
        ChunkFileReader::from_bytes(vec![0; 4]),
        Err(BlockError::Format(_))
    ));
    Ok(())
}

#[test]
fn test_unknown_compressor_fails_on_write() {
    let mut writer = ChunkFileWriter::new().with_compression(7);
    writer.add_compressed_chunk(chunk_type::SKELETON, 1, "rig", vec![1, 2, 3]);
    assert!(matches!(writer.to_bytes(), Err(BlockError::Format(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let result = ChunkFileReader::open("/definitely/not/here.scaf");
    assert!(matches!(result, Err(BlockError::Io(_))));
}

// --- COMPRESSION ---

#[cfg(feature = "lz4_flex")]
#[test]
fn test_lz4_chunk_round_trip() -> scaffold_block::Result<()> {
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 16) as u8).collect();
    let mut writer = ChunkFileWriter::new().with_compression(1);
    writer
        .add_compressed_chunk(chunk_type::MODEL_SCAFFOLD_LARGE_BLOCKS, 1, "large", payload.clone())
        .add_chunk(chunk_type::MODEL_SCAFFOLD, 1, "model", b"image".to_vec());

    let reader = ChunkFileReader::from_bytes(writer.to_bytes()?)?;
    let large = reader
        .find(chunk_type::MODEL_SCAFFOLD_LARGE_BLOCKS)
        .ok_or_else(missing)?;
    assert_eq!(large.compression_id, 1);
    assert!(large.size < payload.len() as u64);
    assert_eq!(reader.read_chunk(large)?.as_ref(), payload.as_slice());

    let model = reader.find(chunk_type::MODEL_SCAFFOLD).ok_or_else(missing)?;
    assert_eq!(model.compression_id, 0);
    Ok(())
}

fn missing() -> BlockError {
    BlockError::Format("chunk missing".into())
}
