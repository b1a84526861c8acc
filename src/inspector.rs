//! Tools for inspecting the physical structure of blocks and scaffold files.
//! Useful for finding what dominates the size of an asset.

use std::path::Path;

use serde::Serialize;

use crate::block::Block;
use crate::chunk::{ChunkFileReader, chunk_type};
use crate::error::Result;
use crate::format::{Relocation, SpecialBuffer};

/// Category name used for bytes not covered by any sub-block.
pub const MAIN_BLOCK_CATEGORY: &str = "main_block";

/// A structural report of one block.
#[derive(Debug, Serialize)]
pub struct BlockReport {
    /// Size of the blob in bytes.
    pub blob_size: u64,
    /// Number of pointer slots.
    pub pointer_count: u64,
    /// Whether the slots hold patched values.
    pub patched: bool,
    /// Bytes per category. Every byte of the blob is counted exactly once.
    pub categories: Vec<CategoryUsage>,
    /// The sub-block tree, rooted at the main block.
    pub tree: SubBlockInfo,
}

/// Aggregate usage of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryUsage {
    /// Special buffer name, or [`MAIN_BLOCK_CATEGORY`].
    pub category: String,
    /// Number of sub-blocks of this category.
    pub sub_blocks: u64,
    /// Bytes owned by those sub-blocks, excluding their nested sub-blocks.
    pub bytes: u64,
}

/// One node of the sub-block tree.
#[derive(Debug, Serialize)]
pub struct SubBlockInfo {
    /// Offset of the pointer slot referring to this sub-block (none for the root).
    pub slot: Option<u64>,
    /// Absolute offset of the sub-block.
    pub offset: u64,
    /// Size including nested sub-blocks.
    pub size: u64,
    /// Size excluding nested sub-blocks.
    pub exclusive_size: u64,
    /// Special buffer name, or [`MAIN_BLOCK_CATEGORY`] for the root.
    pub category: String,
    /// Nested sub-blocks, ordered by slot.
    pub children: Vec<SubBlockInfo>,
}

/// A structural report of a scaffold file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// Chunks in file order.
    pub chunks: Vec<ChunkInfo>,
}

/// One chunk of a scaffold file.
#[derive(Debug, Serialize)]
pub struct ChunkInfo {
    /// Known type name, or the type code in hex.
    pub kind: String,
    /// Name from the chunk header.
    pub name: String,
    /// Stored size.
    pub stored_size: u64,
    /// Compression algorithm used.
    pub compression_algo: String,
    /// Block report, for chunks holding a block image.
    pub block: Option<BlockReport>,
}

/// The scaffold inspector tool.
#[derive(Debug)]
pub struct BlockInspector;

impl BlockInspector {
    /// Analyzes a block.
    pub fn inspect(block: &Block) -> BlockReport {
        let relocations = block.relocations();
        let tree = build_tree(relocations, block.size() as u64);

        let mut categories: Vec<CategoryUsage> = std::iter::once(MAIN_BLOCK_CATEGORY)
            .chain(SpecialBuffer::ALL.iter().map(|tag| tag.name()))
            .map(|category| CategoryUsage {
                category: category.to_owned(),
                sub_blocks: 0,
                bytes: 0,
            })
            .collect();
        tree.accumulate(&mut categories);

        BlockReport {
            blob_size: block.size() as u64,
            pointer_count: relocations.len() as u64,
            patched: block.is_patched(),
            categories,
            tree,
        }
    }

    /// Analyzes a block image.
    pub fn inspect_image(image: &[u8]) -> Result<BlockReport> {
        Ok(Self::inspect(&Block::from_image(image)?))
    }

    /// Analyzes every chunk of a scaffold file.
    pub fn inspect_file<P: AsRef<Path>>(path: P) -> Result<FileReport> {
        let reader = ChunkFileReader::open(path)?;
        let mut chunks = Vec::with_capacity(reader.chunks().len());

        for header in reader.chunks() {
            let kind = chunk_type::name(header.type_code)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{:#018x}", header.type_code));
            let compression_algo = match header.compression_id {
                0 => "None".to_string(),
                1 => "LZ4".to_string(),
                id => format!("Unknown({id})"),
            };
            let block = if header.type_code == chunk_type::MODEL_SCAFFOLD_LARGE_BLOCKS {
                None
            } else {
                Some(Self::inspect_image(&reader.read_chunk(header)?)?)
            };

            chunks.push(ChunkInfo {
                kind,
                name: header.name(),
                stored_size: header.size,
                compression_algo,
                block,
            });
        }
        Ok(FileReport { chunks })
    }
}

/// Builds the sub-block tree. Each sub-block's parent is the innermost sub-block that holds
/// its slot; slots outside every sub-block belong to the main block.
fn build_tree(relocations: &[Relocation], blob_size: u64) -> SubBlockInfo {
    let mut by_start: Vec<usize> = (0..relocations.len()).collect();
    by_start.sort_by_key(|&i| relocations[i].sub_block_offset);

    let contains = |r: &Relocation, at: u64| {
        r.sub_block_offset <= at && at < r.sub_block_offset + r.sub_block_size
    };

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); relocations.len()];
    let mut roots = Vec::new();
    for (i, relocation) in relocations.iter().enumerate() {
        let slot = relocation.pointer_offset;
        let candidates = by_start.partition_point(|&j| relocations[j].sub_block_offset <= slot);
        let parent = by_start[..candidates]
            .iter()
            .rev()
            .copied()
            .find(|&j| contains(&relocations[j], slot));
        match parent {
            Some(parent) => children[parent].push(i),
            None => roots.push(i),
        }
    }

    fn node(index: usize, relocations: &[Relocation], children: &[Vec<usize>]) -> SubBlockInfo {
        let relocation = relocations[index];
        let nested: Vec<SubBlockInfo> = children[index]
            .iter()
            .map(|&child| node(child, relocations, children))
            .collect();
        let nested_size: u64 = nested.iter().map(|c| c.size).sum();
        SubBlockInfo {
            slot: Some(relocation.pointer_offset),
            offset: relocation.sub_block_offset,
            size: relocation.sub_block_size,
            exclusive_size: relocation.sub_block_size.saturating_sub(nested_size),
            category: relocation.special_buffer.name().to_owned(),
            children: nested,
        }
    }

    let top: Vec<SubBlockInfo> = roots
        .iter()
        .map(|&i| node(i, relocations, &children))
        .collect();
    let nested_size: u64 = top.iter().map(|c| c.size).sum();
    SubBlockInfo {
        slot: None,
        offset: 0,
        size: blob_size,
        exclusive_size: blob_size.saturating_sub(nested_size),
        category: MAIN_BLOCK_CATEGORY.to_owned(),
        children: top,
    }
}

impl SubBlockInfo {
    fn accumulate(&self, categories: &mut [CategoryUsage]) {
        if let Some(usage) = categories.iter_mut().find(|c| c.category == self.category) {
            usage.bytes += self.exclusive_size;
            if self.slot.is_some() {
                usage.sub_blocks += 1;
            }
        }
        for child in &self.children {
            child.accumulate(categories);
        }
    }

    fn fmt_recursive(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        prefix: &str,
        is_last: bool,
    ) -> std::fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };

        writeln!(
            f,
            "{}{}[{}] @{} Size: {}b | Own: {}b | Children: {}",
            prefix,
            connector,
            self.category,
            self.offset,
            self.size,
            self.exclusive_size,
            self.children.len()
        )?;

        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i == self.children.len() - 1;
            child.fmt_recursive(f, &format!("{}{}", prefix, child_prefix), is_last_child)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for BlockReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== SCAFFOLD BLOCK REPORT ===")?;
        writeln!(f, "Blob Size:      {}", self.blob_size)?;
        writeln!(f, "Pointers:       {}", self.pointer_count)?;
        writeln!(f, "Patched:        {}", self.patched)?;
        writeln!(f, "\n[BREAKDOWN]")?;
        for usage in self.categories.iter().filter(|c| c.bytes > 0 || c.sub_blocks > 0) {
            writeln!(
                f,
                "  {:<14} {:>10}b in {} sub-blocks",
                usage.category, usage.bytes, usage.sub_blocks
            )?;
        }
        writeln!(f, "\n[SUB-BLOCKS]")?;
        self.tree.fmt_recursive(f, "", true)
    }
}

impl std::fmt::Display for FileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== SCAFFOLD FILE REPORT ===")?;
        for chunk in &self.chunks {
            writeln!(
                f,
                "\n[{}] '{}' {}b stored | Algo: {}",
                chunk.kind, chunk.name, chunk.stored_size, chunk.compression_algo
            )?;
            if let Some(block) = &chunk.block {
                write!(f, "{block}")?;
            }
        }
        Ok(())
    }
}
