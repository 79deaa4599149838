use std::mem::size_of;

use app::vulkan::ash::vk::{self, Packed24_8};
use app::vulkan::utils::create_gpu_only_buffer_from_data;
use app::vulkan::{AccelerationStructure, Buffer, Context};

use super::TraceError;
use crate::scene::{Scene, TriangleVertex};

pub struct BottomAS {
    pub inner: AccelerationStructure,
}

pub struct TopAS {
    pub inner: AccelerationStructure,
    pub _instance_buffer: Buffer,
}

/// Builds the bottom level structure over the scene's whole index range.
///
/// The build is synchronous. Once this returns, the structure's device
/// address is valid and may be referenced by a top level build.
pub fn create_bottom_as(context: &Context, scene: &Scene) -> Result<BottomAS, TraceError> {
    let primitive_count = scene.triangle_count();

    let as_geo_triangles_data = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: scene.vertex_buffer_address(),
        })
        .vertex_stride(size_of::<TriangleVertex>() as _)
        .max_vertex(scene.vertex_count())
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: scene.index_buffer_address(),
        })
        .build();

    let as_struct_geo = vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            triangles: as_geo_triangles_data,
        })
        .build();

    let as_ranges = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .first_vertex(0)
        .primitive_count(primitive_count)
        .build();

    let inner = context
        .create_bottom_level_acceleration_structure(
            &[as_struct_geo],
            &[as_ranges],
            &[primitive_count],
        )
        .map_err(|e| TraceError::ResourceCreation("bottom level acceleration structure", e))?;

    Ok(BottomAS { inner })
}

/// Builds the single instance top level structure over a finished bottom
/// level structure. Taking `&BottomAS` pins the build order: the bottom
/// level address consumed here can only come from a completed build.
pub fn create_top_as(context: &Context, bottom_as: &BottomAS) -> Result<TopAS, TraceError> {
    let as_instance = blas_instance(bottom_as.inner.address);

    let instance_buffer = create_gpu_only_buffer_from_data(
        context,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        &[as_instance],
    )
    .map_err(|e| TraceError::ResourceCreation("acceleration structure instance buffer", e))?;

    let as_struct_geo = vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: instance_buffer.get_device_address(),
                })
                .build(),
        })
        .build();

    let as_ranges = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .first_vertex(0)
        .primitive_count(1)
        .build();

    let inner = context
        .create_top_level_acceleration_structure(&[as_struct_geo], &[as_ranges], &[1])
        .map_err(|e| TraceError::ResourceCreation("top level acceleration structure", e))?;

    Ok(TopAS {
        inner,
        _instance_buffer: instance_buffer,
    })
}

/// One identity transformed instance covering the whole scene. Rays must
/// reach both sides of every plate, so triangle facing culling is off.
fn blas_instance(blas_address: u64) -> vk::AccelerationStructureInstanceKHR {
    #[rustfmt::skip]
    let transform_matrix = vk::TransformMatrixKHR { matrix: [
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
    ]};

    vk::AccelerationStructureInstanceKHR {
        transform: transform_matrix,
        instance_custom_index_and_mask: Packed24_8::new(0, 0xFF),
        instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(
            0,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as _,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: blas_address,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_references_the_bottom_level_address() {
        let instance = blas_instance(0xDEAD_BEEF);

        let device_handle = unsafe { instance.acceleration_structure_reference.device_handle };
        assert_eq!(device_handle, 0xDEAD_BEEF);

        // custom index 0, visible to every ray mask
        assert_eq!(instance.instance_custom_index_and_mask.low_24(), 0);
        assert_eq!(instance.instance_custom_index_and_mask.high_8(), 0xFF);

        // binding table record 0 with facing culling disabled
        assert_eq!(
            instance
                .instance_shader_binding_table_record_offset_and_flags
                .low_24(),
            0
        );
        assert_eq!(
            u32::from(
                instance
                    .instance_shader_binding_table_record_offset_and_flags
                    .high_8()
            ),
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
    }

    #[test]
    fn instance_transform_is_identity() {
        let m = blas_instance(1).transform.matrix;

        for row in 0..3 {
            for col in 0..4 {
                let expected = if row == col { 1.0 } else { 0.0 };
                assert_eq!(m[row * 4 + col], expected);
            }
        }
    }
}
