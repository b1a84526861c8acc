//! Structural scaffold types.
//!
//! A scaffold is the structural half of a model, skeleton or animation asset: instance
//! lists, input assemblies, draw calls, driver tables and joint matrices. It is serialized
//! into one [`Block`](crate::Block). The bulky half (vertex and index data) goes into
//! [`LargeResources`], a separate byte buffer that scaffold structs address with plain
//! [`LargeResourceRef`] offsets, so it can be streamed or uploaded without relocation.
//!
//! Names (joints, parameters, animations) are stored as 64-bit hashes, see [`hash_name`].

use std::hash::Hasher;

use glam::{Mat4, Vec3};
use twox_hash::XxHash64;

use crate::dispatch::CountedArray;
use crate::error::{BlockError, Result};
use crate::BlockObject;

/// Alignment of every payload appended to [`LargeResources`].
pub const LARGE_RESOURCE_ALIGN: usize = 16;

/// Hashes a name the way scaffold interfaces store it.
pub fn hash_name(name: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(name.as_bytes());
    hasher.finish()
}

// --- Large resources ---

/// Location of a payload inside [`LargeResources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable, BlockObject)]
#[repr(C)]
#[block(raw)]
pub struct LargeResourceRef {
    /// Byte offset from the start of the large resources.
    pub offset: u32,
    /// Payload length in bytes.
    pub size: u32,
}

/// Side buffer for bulky payloads that live outside the relocated block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LargeResources {
    bytes: Vec<u8>,
}

impl LargeResources {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps bytes previously produced by [`into_bytes`](Self::into_bytes).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Appends a payload at the next 16-byte boundary.
    ///
    /// # Errors
    /// Returns `BlockError::Format` once the buffer outgrows the u32 range of a reference.
    pub fn add(&mut self, data: &[u8]) -> Result<LargeResourceRef> {
        let start = self.bytes.len().next_multiple_of(LARGE_RESOURCE_ALIGN);
        let end = start + data.len();
        let (offset, size) = match (u32::try_from(start), u32::try_from(data.len())) {
            (Ok(offset), Ok(size)) if u32::try_from(end).is_ok() => (offset, size),
            _ => {
                return Err(BlockError::Format(format!(
                    "Large resources exceed 4 GiB ({end} bytes)"
                )));
            }
        };
        self.bytes.resize(start, 0);
        self.bytes.extend_from_slice(data);
        Ok(LargeResourceRef { offset, size })
    }

    /// Borrows a payload.
    pub fn slice(&self, resource: LargeResourceRef) -> Result<&[u8]> {
        let start = resource.offset as usize;
        let end = start + resource.size as usize;
        self.bytes.get(start..end).ok_or_else(|| {
            BlockError::Corrupt(format!(
                "Large resource {start}..{end} outside buffer of {} bytes",
                self.bytes.len()
            ))
        })
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// --- Model command stream ---

/// One placement of a geometry in the scene.
#[derive(Debug, Clone, PartialEq, Default, BlockObject)]
pub struct GeoCall {
    /// Index into the geometry (or skinned controller) list.
    pub geo_id: u32,
    /// Skeleton output that positions this instance.
    pub transform_marker: u32,
    /// Material per draw call.
    pub material_ids: Vec<u64>,
    /// Level of detail this instance belongs to.
    pub level_of_detail: u32,
}

/// The instance lists of a model plus the joints it expects from a skeleton.
#[derive(Debug, Clone, PartialEq, Default, BlockObject)]
pub struct ModelCommandStream {
    /// Static geometry instances.
    pub geometry_instances: Vec<GeoCall>,
    /// Skinned geometry instances.
    pub skin_controller_instances: Vec<GeoCall>,
    /// Hashed joint names, see [`hash_name`].
    pub input_interface: Vec<u64>,
}

impl ModelCommandStream {
    /// Instances at the given level of detail, static and skinned together.
    pub fn calls_for_lod(&self, level_of_detail: u32) -> impl Iterator<Item = &GeoCall> {
        self.geometry_instances
            .iter()
            .chain(&self.skin_controller_instances)
            .filter(move |call| call.level_of_detail == level_of_detail)
    }

    /// Highest level of detail referenced by any instance.
    pub fn max_lod(&self) -> u32 {
        self.geometry_instances
            .iter()
            .chain(&self.skin_controller_instances)
            .map(|call| call.level_of_detail)
            .max()
            .unwrap_or(0)
    }
}

// --- Geometry ---

/// A range of indices drawn with one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable, BlockObject)]
#[repr(C)]
#[block(raw)]
pub struct DrawCallDesc {
    /// First index of the range.
    pub first_index: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Added to every index.
    pub first_vertex: u32,
    /// Material slot within the geo call.
    pub sub_material_index: u32,
    /// Primitive topology id.
    pub topology: u32,
}

/// One attribute of a vertex layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, BlockObject)]
pub struct VertexElement {
    /// Semantic name, e.g. `POSITION`.
    pub semantic: String,
    /// Semantic index, e.g. the texture coordinate set.
    pub semantic_index: u32,
    /// Format id of the attribute.
    pub format: u32,
    /// Offset within a vertex.
    pub start_offset: u32,
}

/// A vertex layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, BlockObject)]
pub struct GeoInputAssembly {
    /// Attributes in declaration order.
    pub elements: Vec<VertexElement>,
    /// Bytes per vertex.
    pub vertex_stride: u32,
}

impl GeoInputAssembly {
    /// Hash identifying the layout, used to share input layouts between geometries.
    pub fn build_hash(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        for element in &self.elements {
            hasher.write(element.semantic.as_bytes());
            hasher.write_u32(element.semantic_index);
            hasher.write_u32(element.format);
            hasher.write_u32(element.start_offset);
        }
        hasher.write_u32(self.vertex_stride);
        hasher.finish()
    }
}

/// Vertex data: its layout and where the bytes live in the large resources.
#[derive(Debug, Clone, PartialEq, Eq, Default, BlockObject)]
pub struct VertexData {
    /// Vertex layout.
    pub ia: GeoInputAssembly,
    /// The vertex bytes.
    pub data: LargeResourceRef,
}

/// Index data: its format and where the bytes live in the large resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BlockObject)]
pub struct IndexData {
    /// Format id of one index.
    pub format: u32,
    /// The index bytes.
    pub data: LargeResourceRef,
}

/// Unanimated geometry.
#[derive(Debug, Clone, PartialEq, Default, BlockObject)]
pub struct RawGeometry {
    /// Vertex buffer.
    pub vb: VertexData,
    /// Index buffer.
    pub ib: IndexData,
    /// Draw calls, in submission order.
    pub draw_calls: Vec<DrawCallDesc>,
}

/// Geometry bound to a skeleton.
#[derive(Debug, Clone, PartialEq, Default, BlockObject)]
pub struct SkinnedGeometry {
    /// The unanimated vertex elements and the draw calls for the whole object.
    pub geometry: RawGeometry,
    /// Vertex elements rewritten by skinning.
    pub animated_vertex_elements: VertexData,
    /// Joint indices and weights per vertex.
    pub skeleton_binding: VertexData,
    /// Inverse bind matrix per joint.
    pub inverse_bind_matrices: Vec<Mat4>,
    /// Inverse bind matrices premultiplied by the bind shape matrix.
    pub inverse_bind_by_bind_shape_matrices: Vec<Mat4>,
    /// Maps skinning joint slots to the model's joint list.
    pub joint_matrices: Vec<u16>,
    /// Bind shape matrix.
    pub bind_shape_matrix: Mat4,
    /// Draw calls for the pre-skinning pass.
    pub preskinning_draw_calls: Vec<DrawCallDesc>,
    /// Bounds in model space (min, max).
    pub local_bounding_box: (Vec3, Vec3),
}

/// Everything a model scaffold block holds.
#[derive(Debug, Clone, PartialEq, Default, BlockObject)]
pub struct ModelImmutableData {
    /// Instance lists.
    pub visual_scene: ModelCommandStream,
    /// Static geometries.
    pub geos: Vec<RawGeometry>,
    /// Skinned geometries.
    pub bound_skinned_controllers: Vec<SkinnedGeometry>,
    /// Bounds of the whole model (min, max).
    pub bounding_box: (Vec3, Vec3),
}

// --- Skeleton ---

/// An animatable input of the skeleton machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BlockObject)]
pub struct SkeletonParameter {
    /// Hashed parameter name.
    pub name: u64,
    /// Slot within the parameter set.
    pub index: u32,
    /// Parameter type id.
    pub kind: u32,
}

/// A compiled skeleton: a command stream that produces joint matrices.
#[derive(Debug, Clone, PartialEq, Default, BlockObject)]
pub struct Skeleton {
    /// Transformation commands.
    pub command_stream: Vec<u32>,
    /// Number of matrices the command stream outputs.
    pub output_matrix_count: u32,
    /// Animatable inputs.
    pub input_interface: Vec<SkeletonParameter>,
    /// Hashed name per output matrix.
    pub output_matrix_names: Vec<u64>,
    /// Inverse bind matrix per output matrix.
    pub inverse_bind_matrices: CountedArray<Mat4>,
}

impl Skeleton {
    /// Index of the output matrix with the given name.
    pub fn find_output(&self, name: &str) -> Option<usize> {
        let hash = hash_name(name);
        self.output_matrix_names.iter().position(|n| *n == hash)
    }
}

// --- Animation set ---

/// Binds an animation curve to a skeleton parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable, BlockObject)]
#[repr(C)]
#[block(raw)]
pub struct AnimationDriver {
    /// Curve to sample.
    pub curve_index: u32,
    /// Parameter in the output interface.
    pub parameter_index: u32,
    /// Offset within the sampled value.
    pub sampler_offset: u32,
    /// Sampler type id.
    pub sampler_type: u32,
}

/// Binds a constant value to a skeleton parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable, BlockObject)]
#[repr(C)]
#[block(raw)]
pub struct ConstantDriver {
    /// Offset of the value in the constant data.
    pub data_offset: u32,
    /// Parameter in the output interface.
    pub parameter_index: u32,
    /// Offset within the sampled value.
    pub sampler_offset: u32,
    /// Sampler type id.
    pub sampler_type: u32,
}

/// One named animation: a range of drivers and a time span.
#[derive(Debug, Clone, Copy, PartialEq, Default, BlockObject)]
pub struct Animation {
    /// First animation driver.
    pub begin_driver: u32,
    /// One past the last animation driver.
    pub end_driver: u32,
    /// First constant driver.
    pub begin_constant_driver: u32,
    /// One past the last constant driver.
    pub end_constant_driver: u32,
    /// Start time in seconds.
    pub begin_time: f32,
    /// End time in seconds.
    pub end_time: f32,
}

/// A set of animations sharing one output interface.
#[derive(Debug, Clone, PartialEq, Default, BlockObject)]
pub struct AnimationSet {
    /// Curve drivers.
    pub animation_drivers: Vec<AnimationDriver>,
    /// Constant drivers.
    pub constant_drivers: Vec<ConstantDriver>,
    /// Values referenced by constant drivers.
    pub constant_data: Vec<u8>,
    /// Animations keyed by hashed name, sorted by key.
    pub animations: Vec<(u64, Animation)>,
    /// Hashed parameter names the drivers write to.
    pub output_interface: Vec<u64>,
    /// Animation names, in the same order as `animations`.
    pub names: Vec<String>,
}

impl AnimationSet {
    /// Adds an animation, keeping the table sorted by name hash and `names` parallel to it.
    ///
    /// An animation with the same name is replaced and returned.
    pub fn add_animation(&mut self, name: &str, animation: Animation) -> Option<Animation> {
        let key = hash_name(name);
        match self.animations.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(at) => {
                let previous = std::mem::replace(&mut self.animations[at].1, animation);
                if let Some(slot) = self.names.get_mut(at) {
                    *slot = name.to_owned();
                }
                Some(previous)
            }
            Err(at) => {
                self.animations.insert(at, (key, animation));
                self.names.insert(at.min(self.names.len()), name.to_owned());
                None
            }
        }
    }

    /// Name of the animation at `index` in `animations`.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Looks up an animation by name.
    pub fn find_animation(&self, name: &str) -> Option<&Animation> {
        let key = hash_name(name);
        self.animations
            .binary_search_by_key(&key, |(k, _)| *k)
            .ok()
            .and_then(|index| self.animations.get(index))
            .map(|(_, animation)| animation)
    }
}
