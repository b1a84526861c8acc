//! Static dispatch of values into a [`BlockSerializer`].
//!
//! Every embeddable type implements [`BlockSerialize`]. The impl chosen for a type decides its
//! strategy, and since trait impls cannot overlap the choice is always unambiguous:
//!
//! | Kind | Types | Encoding |
//! |------|-------|----------|
//! | Member method | `#[derive(BlockObject)]`, manual impls | fields in declaration order |
//! | Scalar | `u8 u16 u32 u64 usize f32` | little-endian, no prefix |
//! | Raw opt-in | `#[block(raw)]` Pod structs, [`impl_raw_block_value!`] types | host bytes |
//! | String | `String`, `str` | 8-byte slot to a `String` sub-block |
//! | Sequence | `Vec<T>`, `[T]` | slot to a `Vector` sub-block, then a u64 count |
//! | Counted array | [`CountedArray<T>`] | slot to a `UniquePtr` sub-block, then a u64 count |
//! | Pair | `(A, B)` | `repr(C)` layout, padding included |
//! | Math | `glam` vectors, quaternions, matrices, `[T; N]` | components in memory order |
//! | Box | `Box<T>` | slot to an `Unknown` sub-block holding one `T` |
//!
//! A type with no impl is rejected at compile time; there is no fallback.

use crate::format::{POINTER_SIZE, SpecialBuffer};
use crate::serializer::BlockSerializer;

/// Natural alignment of a type's footprint in the main block.
///
/// Only pairs consult it; everything else is written back to back.
pub trait BlockLayout {
    /// Alignment in bytes. Types holding a pointer slot use [`POINTER_SIZE`].
    const BLOCK_ALIGN: usize;
}

/// A type that knows how to write itself into a block.
pub trait BlockSerialize: BlockLayout {
    /// Writes the value's fields into the serializer's main block.
    fn serialize(&self, serializer: &mut BlockSerializer);

    /// Embeds a slice of values as one sub-block.
    ///
    /// The default builds a temporary serializer and serializes every element into it, so
    /// elements keep their own nested sub-blocks. Plain-data types override this to emit one
    /// flat raw sub-block instead.
    fn serialize_slice(items: &[Self], serializer: &mut BlockSerializer, special_buffer: SpecialBuffer)
    where
        Self: Sized,
    {
        let mut sub_block = BlockSerializer::new();
        for item in items {
            item.serialize(&mut sub_block);
        }
        serializer.serialize_sub_block(&sub_block, special_buffer);
    }
}

/// Number of padding bytes needed to bring `offset` up to a multiple of `align`.
pub const fn padding_for(offset: usize, align: usize) -> usize {
    if align <= 1 {
        return 0;
    }
    (align - offset % align) % align
}

const fn max_align(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}

// --- Scalars ---

macro_rules! impl_scalar_serialize {
    ($($t:ty),*) => {
        $(
            impl BlockLayout for $t {
                const BLOCK_ALIGN: usize = std::mem::size_of::<$t>();
            }

            impl BlockSerialize for $t {
                fn serialize(&self, serializer: &mut BlockSerializer) {
                    serializer.serialize_value(self);
                }

                fn serialize_slice(items: &[Self], serializer: &mut BlockSerializer, special_buffer: SpecialBuffer) {
                    let bytes: Vec<u8> = items.iter().flat_map(|v| v.to_le_bytes()).collect();
                    serializer.serialize_raw_sub_block(&bytes, special_buffer);
                }
            }
        )*
    }
}

impl_scalar_serialize!(u8, u16, u32, u64, f32);

impl BlockLayout for usize {
    const BLOCK_ALIGN: usize = 8;
}

impl BlockSerialize for usize {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        serializer.serialize_value(self);
    }

    fn serialize_slice(items: &[Self], serializer: &mut BlockSerializer, special_buffer: SpecialBuffer) {
        let bytes: Vec<u8> = items
            .iter()
            .flat_map(|v| (*v as u64).to_le_bytes())
            .collect();
        serializer.serialize_raw_sub_block(&bytes, special_buffer);
    }
}

// --- Raw opt-in ---

/// Opts plain-data types into raw serialization.
///
/// The types must implement `bytemuck::Pod`. Values are copied with their host layout, and
/// slices of them become a single flat sub-block.
///
/// ```rust
/// use scaffold_block::impl_raw_block_value;
///
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Extent { min: [f32; 3], max: [f32; 3] }
///
/// impl_raw_block_value!(Extent);
/// ```
#[macro_export]
macro_rules! impl_raw_block_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl $crate::BlockLayout for $t {
                const BLOCK_ALIGN: usize = ::std::mem::align_of::<$t>();
            }

            impl $crate::BlockSerialize for $t {
                fn serialize(&self, serializer: &mut $crate::BlockSerializer) {
                    serializer.serialize_raw(self);
                }

                fn serialize_slice(
                    items: &[Self],
                    serializer: &mut $crate::BlockSerializer,
                    special_buffer: $crate::SpecialBuffer,
                ) {
                    serializer.serialize_raw_sub_block(
                        $crate::internal::bytemuck::cast_slice(items),
                        special_buffer,
                    );
                }
            }

            impl $crate::FromBlock for $t {
                fn read_from(cursor: &mut $crate::BlockCursor<'_>) -> $crate::Result<Self> {
                    cursor.read_pod()
                }

                fn read_slice(cursor: &mut $crate::BlockCursor<'_>, count: usize) -> $crate::Result<Vec<Self>> {
                    cursor.read_pod_slice(count)
                }
            }
        )*
    };
}

// Signed and wide types are not part of the portable scalar set; they travel as raw values.
impl_raw_block_value!(i8, i16, i32, i64, f64);

// --- Strings ---

impl BlockLayout for str {
    const BLOCK_ALIGN: usize = POINTER_SIZE;
}

impl BlockSerialize for str {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        serializer.serialize_value(self);
    }
}

impl BlockLayout for String {
    const BLOCK_ALIGN: usize = POINTER_SIZE;
}

impl BlockSerialize for String {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        serializer.serialize_value(self);
    }
}

// --- Sequences ---

impl<T> BlockLayout for [T] {
    const BLOCK_ALIGN: usize = POINTER_SIZE;
}

/// Writes a slot to a sub-block holding `items`, tagged `special_buffer`, followed by the u64
/// element count. This is the footprint of every sequence field.
pub fn serialize_tagged_sequence<T: BlockSerialize>(
    items: &[T],
    special_buffer: SpecialBuffer,
    serializer: &mut BlockSerializer,
) {
    serializer.serialize_sequence(items, special_buffer);
    serializer.serialize_value(&items.len());
}

impl<T: BlockSerialize> BlockSerialize for [T] {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        serialize_tagged_sequence(self, SpecialBuffer::Vector, serializer);
    }
}

impl<T> BlockLayout for Vec<T> {
    const BLOCK_ALIGN: usize = POINTER_SIZE;
}

impl<T: BlockSerialize> BlockSerialize for Vec<T> {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        <[T] as BlockSerialize>::serialize(self.as_slice(), serializer);
    }
}

/// An owned array with an explicit element count, embedded as a `UniquePtr` sub-block.
///
/// Use it for fixed-size tables that are allocated once and never grow, such as the joint
/// matrices of a skeleton.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CountedArray<T> {
    items: Box<[T]>,
}

impl<T> CountedArray<T> {
    /// Takes ownership of the items.
    pub fn new(items: Box<[T]>) -> Self {
        Self { items }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The elements.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Consumes the array.
    pub fn into_vec(self) -> Vec<T> {
        self.items.into_vec()
    }
}

impl<T> From<Vec<T>> for CountedArray<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items.into_boxed_slice())
    }
}

impl<T> std::ops::Deref for CountedArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> BlockLayout for CountedArray<T> {
    const BLOCK_ALIGN: usize = POINTER_SIZE;
}

impl<T: BlockSerialize> BlockSerialize for CountedArray<T> {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        serialize_tagged_sequence(self.as_slice(), SpecialBuffer::UniquePtr, serializer);
    }
}

// --- Box ---

impl<T> BlockLayout for Box<T> {
    const BLOCK_ALIGN: usize = POINTER_SIZE;
}

impl<T: BlockSerialize> BlockSerialize for Box<T> {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        let mut sub_block = BlockSerializer::new();
        (**self).serialize(&mut sub_block);
        serializer.serialize_sub_block(&sub_block, SpecialBuffer::Unknown);
    }
}

// --- References ---

impl<T: BlockLayout + ?Sized> BlockLayout for &T {
    const BLOCK_ALIGN: usize = T::BLOCK_ALIGN;
}

impl<T: BlockSerialize + ?Sized> BlockSerialize for &T {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        (**self).serialize(serializer);
    }
}

// --- Pairs ---

impl<A: BlockLayout, B: BlockLayout> BlockLayout for (A, B) {
    const BLOCK_ALIGN: usize = max_align(A::BLOCK_ALIGN, B::BLOCK_ALIGN);
}

impl<A: BlockSerialize, B: BlockSerialize> BlockSerialize for (A, B) {
    /// Writes `first` and `second` at the offsets a `repr(C)` struct of the same shape would
    /// use, including the tail padding that rounds the pair up to its alignment.
    fn serialize(&self, serializer: &mut BlockSerializer) {
        let start = serializer.memory_len();
        self.0.serialize(serializer);
        serializer.add_padding(padding_for(serializer.memory_len() - start, B::BLOCK_ALIGN));
        self.1.serialize(serializer);
        serializer.add_padding(padding_for(
            serializer.memory_len() - start,
            <Self as BlockLayout>::BLOCK_ALIGN,
        ));
    }
}

// --- Fixed-size arrays ---

impl<T: BlockLayout, const N: usize> BlockLayout for [T; N] {
    const BLOCK_ALIGN: usize = T::BLOCK_ALIGN;
}

impl<T: BlockSerialize, const N: usize> BlockSerialize for [T; N] {
    fn serialize(&self, serializer: &mut BlockSerializer) {
        for item in self {
            item.serialize(serializer);
        }
    }
}

// --- Math types ---

macro_rules! impl_math_serialize {
    ($($t:ty => $to:ident),* $(,)?) => {
        $(
            // SIMD-backed types such as `Vec4` and `Mat4` are 16-byte aligned on the host.
            impl BlockLayout for $t {
                const BLOCK_ALIGN: usize = std::mem::align_of::<$t>();
            }

            impl BlockSerialize for $t {
                fn serialize(&self, serializer: &mut BlockSerializer) {
                    for component in self.$to() {
                        serializer.serialize_value(&component);
                    }
                }

                fn serialize_slice(items: &[Self], serializer: &mut BlockSerializer, special_buffer: SpecialBuffer) {
                    let bytes: Vec<u8> = items
                        .iter()
                        .flat_map(|v| v.$to())
                        .flat_map(f32::to_le_bytes)
                        .collect();
                    serializer.serialize_raw_sub_block(&bytes, special_buffer);
                }
            }
        )*
    }
}

impl_math_serialize!(
    glam::Vec2 => to_array,
    glam::Vec3 => to_array,
    glam::Vec4 => to_array,
    glam::Quat => to_array,
    glam::Mat3 => to_cols_array,
    glam::Mat4 => to_cols_array,
);
