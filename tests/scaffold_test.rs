#![allow(missing_docs)]

use glam::{Mat4, Vec3};
use scaffold_block::api::SCAFFOLD_CHUNK_VERSION;
use scaffold_block::chunk::chunk_type;
use scaffold_block::inspector::MAIN_BLOCK_CATEGORY;
use scaffold_block::scaffold::{
    Animation, AnimationDriver, AnimationSet, DrawCallDesc, GeoCall, GeoInputAssembly,
    IndexData, ModelCommandStream, ModelImmutableData, RawGeometry, Skeleton, SkinnedGeometry,
    VertexData, VertexElement, hash_name,
};
use scaffold_block::{
    BlockError, BlockInspector, ChunkFileWriter, CountedArray, LargeResources, Scaffold,
    ScaffoldConfig, ScaffoldFile,
};
use tempfile::NamedTempFile;

const VERTICES: [u8; 36] = [3; 36];
const INDICES: [u8; 6] = [0, 0, 1, 0, 2, 0];

fn position_layout() -> GeoInputAssembly {
    GeoInputAssembly {
        elements: vec![VertexElement {
            semantic: "POSITION".into(),
            semantic_index: 0,
            format: 6,
            start_offset: 0,
        }],
        vertex_stride: 12,
    }
}

fn create_model(large: &mut LargeResources) -> scaffold_block::Result<ModelImmutableData> {
    let vertices = large.add(&VERTICES)?;
    let indices = large.add(&INDICES)?;

    let geometry = RawGeometry {
        vb: VertexData {
            ia: position_layout(),
            data: vertices,
        },
        ib: IndexData {
            format: 57,
            data: indices,
        },
        draw_calls: vec![DrawCallDesc {
            first_index: 0,
            index_count: 3,
            first_vertex: 0,
            sub_material_index: 0,
            topology: 4,
        }],
    };

    let skinned = SkinnedGeometry {
        geometry: geometry.clone(),
        inverse_bind_matrices: vec![Mat4::IDENTITY, Mat4::from_scale(Vec3::splat(2.0))],
        joint_matrices: vec![0, 1],
        bind_shape_matrix: Mat4::IDENTITY,
        local_bounding_box: (Vec3::ZERO, Vec3::ONE),
        ..Default::default()
    };

    Ok(ModelImmutableData {
        visual_scene: ModelCommandStream {
            geometry_instances: vec![
                GeoCall {
                    geo_id: 0,
                    transform_marker: 0,
                    material_ids: vec![hash_name("stone")],
                    level_of_detail: 0,
                },
                GeoCall {
                    geo_id: 0,
                    transform_marker: 0,
                    material_ids: vec![hash_name("stone_far")],
                    level_of_detail: 1,
                },
            ],
            skin_controller_instances: vec![GeoCall {
                geo_id: 0,
                transform_marker: 1,
                material_ids: vec![hash_name("skin")],
                level_of_detail: 0,
            }],
            input_interface: vec![hash_name("root"), hash_name("arm")],
        },
        geos: vec![geometry],
        bound_skinned_controllers: vec![skinned],
        bounding_box: (Vec3::splat(-1.0), Vec3::splat(1.0)),
    })
}

fn create_skeleton() -> Skeleton {
    Skeleton {
        command_stream: vec![1, 0, 2, 1],
        output_matrix_count: 2,
        input_interface: Vec::new(),
        output_matrix_names: vec![hash_name("root"), hash_name("arm")],
        inverse_bind_matrices: CountedArray::from(vec![Mat4::IDENTITY; 2]),
    }
}

fn create_animation_set() -> AnimationSet {
    let mut set = AnimationSet {
        animation_drivers: vec![AnimationDriver {
            curve_index: 0,
            parameter_index: 1,
            sampler_offset: 0,
            sampler_type: 2,
        }],
        constant_data: vec![0, 0, 128, 63],
        output_interface: vec![hash_name("arm")],
        ..Default::default()
    };
    for (name, end) in [("walk", 1.0), ("run", 0.5), ("idle", 4.0)] {
        set.add_animation(
            name,
            Animation {
                begin_driver: 0,
                end_driver: 1,
                end_time: end,
                ..Default::default()
            },
        );
    }
    set
}

// --- LARGE RESOURCES ---

#[test]
fn test_large_resources_are_aligned() -> scaffold_block::Result<()> {
    let mut large = LargeResources::new();
    let first = large.add(&[1, 2, 3])?;
    let second = large.add(&[4, 5])?;

    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, 16);
    assert_eq!(large.len(), 18);
    assert_eq!(large.slice(second)?, &[4, 5]);
    Ok(())
}

#[test]
fn test_large_resource_out_of_range_is_corrupt() -> scaffold_block::Result<()> {
    let mut large = LargeResources::new();
    let mut resource = large.add(&[1, 2, 3])?;
    resource.size = 100;
    assert!(matches!(large.slice(resource), Err(BlockError::Corrupt(_))));
    Ok(())
}

// --- MODEL ---

#[test]
fn test_model_round_trip_through_file() -> scaffold_block::Result<()> {
    let mut large = LargeResources::new();
    let model = create_model(&mut large)?;

    let file = NamedTempFile::new()?;
    let scaffold = Scaffold::with_config(ScaffoldConfig {
        name: "crate_model".into(),
        ..Default::default()
    });
    scaffold.save(file.path(), chunk_type::MODEL_SCAFFOLD, &model, Some(&large))?;

    let mut loaded = ScaffoldFile::open(file.path(), chunk_type::MODEL_SCAFFOLD)?;
    assert_eq!(loaded.name(), "crate_model");
    assert_eq!(loaded.large_resources(), &large);

    let back: ModelImmutableData = loaded.root()?;
    assert_eq!(back, model);
    assert_eq!(loaded.large_resources().slice(back.geos[0].vb.data)?, &VERTICES);
    assert_eq!(loaded.large_resources().slice(back.geos[0].ib.data)?, &INDICES);

    loaded.block_mut().initialize(None)?;
    assert_eq!(loaded.root::<ModelImmutableData>()?, model);
    Ok(())
}

#[test]
fn test_model_queries() -> scaffold_block::Result<()> {
    let model = create_model(&mut LargeResources::new())?;
    let scene = &model.visual_scene;
    assert_eq!(scene.max_lod(), 1);
    assert_eq!(scene.calls_for_lod(0).count(), 2);
    assert_eq!(scene.calls_for_lod(1).count(), 1);
    assert_eq!(scene.calls_for_lod(2).count(), 0);

    let layout = position_layout();
    assert_eq!(layout.build_hash(), model.geos[0].vb.ia.build_hash());
    let mut other = position_layout();
    other.vertex_stride = 16;
    assert_ne!(layout.build_hash(), other.build_hash());
    Ok(())
}

#[test]
fn test_file_without_large_resources() -> scaffold_block::Result<()> {
    let bytes = Scaffold::new().to_bytes(chunk_type::SKELETON, &create_skeleton(), None)?;
    let loaded = ScaffoldFile::from_bytes(bytes, chunk_type::SKELETON)?;
    assert!(loaded.large_resources().is_empty());
    assert_eq!(loaded.root::<Skeleton>()?, create_skeleton());
    Ok(())
}

#[test]
fn test_missing_chunk_is_format_error() -> scaffold_block::Result<()> {
    let bytes = Scaffold::new().to_bytes(chunk_type::SKELETON, &create_skeleton(), None)?;
    let result = ScaffoldFile::from_bytes(bytes, chunk_type::ANIMATION_SET);
    assert!(matches!(result, Err(BlockError::Format(_))));
    Ok(())
}

#[test]
fn test_unsupported_chunk_version_is_format_error() -> scaffold_block::Result<()> {
    let image = Scaffold::serialize(&create_skeleton())?.to_image()?;
    let mut writer = ChunkFileWriter::new();
    writer.add_chunk(chunk_type::SKELETON, SCAFFOLD_CHUNK_VERSION + 1, "rig", image);
    let result = ScaffoldFile::from_bytes(writer.to_bytes()?, chunk_type::SKELETON);
    assert!(matches!(result, Err(BlockError::Format(_))));
    Ok(())
}

#[cfg(feature = "lz4_flex")]
#[test]
fn test_compressed_large_resources() -> scaffold_block::Result<()> {
    let mut large = LargeResources::new();
    large.add(&[9u8; 8192])?;
    let model = create_model(&mut large)?;

    let scaffold = Scaffold::with_config(ScaffoldConfig {
        compress_large_resources: true,
        ..Default::default()
    });
    let bytes = scaffold.to_bytes(chunk_type::MODEL_SCAFFOLD, &model, Some(&large))?;
    assert!(bytes.len() < large.len());

    let loaded = ScaffoldFile::from_bytes(bytes, chunk_type::MODEL_SCAFFOLD)?;
    assert_eq!(loaded.large_resources(), &large);
    assert_eq!(loaded.root::<ModelImmutableData>()?, model);
    Ok(())
}

// --- SKELETON & ANIMATION ---

#[test]
fn test_skeleton_lookup() -> scaffold_block::Result<()> {
    let block = Scaffold::serialize(&create_skeleton())?;
    let skeleton: Skeleton = block.first_object()?;
    assert_eq!(skeleton.find_output("arm"), Some(1));
    assert_eq!(skeleton.find_output("leg"), None);
    assert_eq!(skeleton.inverse_bind_matrices.len(), 2);
    Ok(())
}

#[test]
fn test_animation_lookup_after_round_trip() -> scaffold_block::Result<()> {
    let set = create_animation_set();
    assert!(set.animations.windows(2).all(|w| w[0].0 < w[1].0));

    let block = Scaffold::serialize(&set)?;
    let back: AnimationSet = block.first_object()?;
    assert_eq!(back, set);
    assert_eq!(back.find_animation("run").map(|a| a.end_time), Some(0.5));
    assert_eq!(back.find_animation("idle").map(|a| a.end_time), Some(4.0));
    assert!(back.find_animation("swim").is_none());
    Ok(())
}

#[test]
fn test_animation_names_follow_sorted_table() -> scaffold_block::Result<()> {
    let mut set = create_animation_set();
    assert_eq!(set.names.len(), set.animations.len());
    for (index, (key, _)) in set.animations.iter().enumerate() {
        assert_eq!(set.name_at(index).map(hash_name), Some(*key));
    }

    let faster = Animation {
        end_time: 0.25,
        ..Default::default()
    };
    let previous = set.add_animation("run", faster);
    assert_eq!(previous.map(|a| a.end_time), Some(0.5));
    assert_eq!(set.animations.len(), 3);
    assert_eq!(set.names.len(), 3);
    assert_eq!(set.find_animation("run").map(|a| a.end_time), Some(0.25));

    let back: AnimationSet = Scaffold::serialize(&set)?.first_object()?;
    let run = back.animations.iter().position(|(key, _)| *key == hash_name("run"));
    assert_eq!(run.and_then(|index| back.name_at(index)), Some("run"));
    Ok(())
}

// --- PARALLEL ---

#[test]
fn test_parallel_matches_sequential() -> scaffold_block::Result<()> {
    let skeletons: Vec<Skeleton> = (0..32)
        .map(|i| Skeleton {
            command_stream: vec![i; i as usize],
            output_matrix_count: i,
            ..create_skeleton()
        })
        .collect();

    let parallel = Scaffold::serialize_many(&skeletons)?;
    assert_eq!(parallel.len(), skeletons.len());
    for (block, skeleton) in parallel.iter().zip(&skeletons) {
        assert_eq!(block, &Scaffold::serialize(skeleton)?);
    }
    Ok(())
}

// --- INSPECTOR ---

#[test]
fn test_inspector_accounts_for_every_byte() -> scaffold_block::Result<()> {
    let model = create_model(&mut LargeResources::new())?;
    let block = Scaffold::serialize(&model)?;
    let report = BlockInspector::inspect(&block);

    assert_eq!(report.blob_size, block.size() as u64);
    assert_eq!(report.pointer_count, block.relocations().len() as u64);
    assert!(!report.patched);

    let bytes: u64 = report.categories.iter().map(|c| c.bytes).sum();
    assert_eq!(bytes, report.blob_size);
    let sub_blocks: u64 = report.categories.iter().map(|c| c.sub_blocks).sum();
    assert_eq!(sub_blocks, report.pointer_count);

    assert_eq!(report.tree.category, MAIN_BLOCK_CATEGORY);
    // visual_scene has three vectors, then geos and bound_skinned_controllers.
    assert_eq!(report.tree.children.len(), 5);

    let text = report.to_string();
    assert!(text.contains("SCAFFOLD BLOCK REPORT"));
    assert!(text.contains("vector"));
    Ok(())
}

#[test]
fn test_inspect_file_skips_large_resources() -> scaffold_block::Result<()> {
    let mut large = LargeResources::new();
    let model = create_model(&mut large)?;
    let file = NamedTempFile::new()?;
    Scaffold::new().save(file.path(), chunk_type::MODEL_SCAFFOLD, &model, Some(&large))?;

    let report = BlockInspector::inspect_file(file.path())?;
    assert_eq!(report.chunks.len(), 2);
    assert_eq!(report.chunks[0].kind, "ModelScaffold");
    assert!(report.chunks[0].block.is_some());
    assert_eq!(report.chunks[1].kind, "ModelScaffoldLargeBlocks");
    assert!(report.chunks[1].block.is_none());

    let json = serde_json::to_string(&report).map_err(|e| BlockError::Internal(e.to_string()))?;
    assert!(json.contains("\"blob_size\""));
    Ok(())
}
