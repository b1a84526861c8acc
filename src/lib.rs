//! # scaffold-block
//!
//! An offset-relative binary block serializer for compiled 3D assets: model scaffolds,
//! skeletons and animation sets.
//!
//! ## Overview
//!
//! A scaffold is written once by an asset compiler and loaded many times by a runtime that
//! wants the data in one contiguous allocation, ready to use without a decode pass. This crate
//! produces exactly that: a single blob in which every pointer field is an 8-byte slot that can
//! be relocated to any address with one table-driven patch loop.
//!
//! ### Key Features
//!
//! *   **Position-independent output:** Before relocation every slot stores the displacement
//!     from itself to its target, flagged with the high bit. Sub-blocks are copied verbatim
//!     into their parents at any nesting depth without re-encoding.
//! *   **Deterministic:** The same input always produces the same bytes, also when many
//!     scaffolds are compiled in parallel.
//! *   **Table-driven relocation:** Every finalized block carries its relocation table, so
//!     consumers can patch it, duplicate it, or read it through a typed view without patching.
//! *   **Static dispatch:** Embeddable types implement [`BlockSerialize`]; the impl decides
//!     the strategy at compile time. `#[derive(BlockObject)]` covers plain structs.
//! *   **Chunk files:** Scaffold blocks and their large resources are stored in a checksummed
//!     chunk container that is memory-mapped on load.
//!
//! ## Block Layout
//!
//! ```text
//! [Main Block] [Trailing Sub-Block 0] [Trailing Sub-Block 1] ...
//! ```
//!
//! The root object starts at offset 0. A `Vec<T>` field, for example, occupies a slot followed
//! by a u64 element count in the main block, and its elements live in a trailing sub-block.
//!
//! ## Usage
//!
//! ```rust
//! use scaffold_block::{BlockObject, BlockSerializer};
//!
//! #[derive(BlockObject, Debug, PartialEq)]
//! struct Joint {
//!     name: String,
//!     parent: u32,
//! }
//!
//! #[derive(BlockObject, Debug, PartialEq)]
//! struct Rig {
//!     joints: Vec<Joint>,
//! }
//!
//! # fn main() -> scaffold_block::Result<()> {
//! let rig = Rig {
//!     joints: vec![Joint { name: "root".into(), parent: u32::MAX }],
//! };
//!
//! let mut serializer = BlockSerializer::new();
//! serializer.serialize(&rig);
//! let mut block = serializer.finalize()?;
//!
//! // Read it back unpatched...
//! assert_eq!(block.first_object::<Rig>()?, rig);
//!
//! // ...or patch the slots to absolute values first.
//! let patched = block.initialize(None)?;
//! assert_eq!(patched, block.relocations().len());
//! assert_eq!(block.first_object::<Rig>()?, rig);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// Lets the derive macro's absolute paths resolve inside this crate too.
extern crate self as scaffold_block;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod block;
pub mod chunk;
pub mod compression;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod inspector;
pub mod reader;
pub mod scaffold;
pub mod serializer;

// --- MACRO SUPPORT MODULES ---

/// Internal re-exports for the macro to ensure dependencies are available.
#[doc(hidden)]
pub mod internal {
    pub use crate::dispatch::serialize_tagged_sequence;
    pub use bytemuck;
}

// --- RE-EXPORTS ---

#[cfg(feature = "lz4_flex")]
pub use compression::Lz4Compressor;
pub use compression::{Compressor, NoCompression};

pub use api::{Scaffold, ScaffoldConfig, ScaffoldFile};
pub use block::Block;
pub use chunk::{ChunkFileReader, ChunkFileWriter, ChunkHeader};
pub use dispatch::{BlockLayout, BlockSerialize, CountedArray};
pub use error::{BlockError, Result};
pub use format::{Relocation, SpecialBuffer};
pub use inspector::BlockInspector;
pub use reader::{BlockCursor, BlockView, FromBlock, Offset};
pub use scaffold::{LargeResourceRef, LargeResources};
pub use serializer::{BlockSerializer, BlockValue};

// Re-export the derive macro so it is accessible as `scaffold_block::BlockObject`
pub use scaffold_block_derive::BlockObject;
