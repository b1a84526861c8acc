//! Centralized error handling for scaffold-block.
//!
//! The writer side of the crate is pure computation and almost never fails. Errors show up
//! at the boundary where blocks and chunk files come back from storage, which is also where
//! the format stops trusting its input: every offset is bounds-checked before it is followed.
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`BlockError::Io`]): file system operations on chunk files
//! - **Format Errors** ([`BlockError::Format`]): wrong magic, unsupported version, oversized blocks
//! - **Corrupt Errors** ([`BlockError::Corrupt`]): out-of-bounds offsets, unknown tags,
//!   checksum mismatches, pointer slots that disagree with the relocation table
//! - **Compression Errors** ([`BlockError::Compression`]): chunk payload (de)compression
//! - **Internal Errors** ([`BlockError::Internal`]): logic errors (should not occur in production)
//!
//! ## Usage
//!
//! ```rust
//! use scaffold_block::{Block, BlockError};
//!
//! match Block::from_image(&[1, 2, 3]) {
//!     Err(BlockError::Corrupt(msg)) => eprintln!("corrupt asset: {msg}"),
//!     Err(e) => eprintln!("other error: {e}"),
//!     Ok(_) => unreachable!(),
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for scaffold-block operations.
pub type Result<T> = std::result::Result<T, BlockError>;

/// The error enum covering every failure domain in the crate.
///
/// The type is `Clone`; I/O errors are wrapped in an `Arc` so cloning stays cheap.
#[derive(Debug, Clone)]
pub enum BlockError {
    /// Low-level I/O failure while reading or writing a chunk file.
    Io(Arc<io::Error>),

    /// The bytes are not in a format this crate understands.
    ///
    /// Raised for wrong magic bytes, unsupported file versions, unknown compression ids,
    /// and blocks that exceed the displacement range of the pointer encoding.
    Format(String),

    /// The bytes claim to be in the right format but their contents are inconsistent.
    ///
    /// This is the "corrupt asset" error kind: truncated images, offsets pointing outside
    /// the blob, unknown special buffer tags, checksum mismatches, or a reader whose
    /// struct layout has drifted away from the writer's.
    Corrupt(String),

    /// Compression or decompression of a chunk payload failed.
    Compression(String),

    /// Logic error inside the crate. Please report it with a reproduction case.
    Internal(String),
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::Corrupt(s) => write!(f, "Corrupt Block: {s}"),
            Self::Compression(s) => write!(f, "Compression Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for BlockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BlockError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
