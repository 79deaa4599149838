use anyhow::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::{
    utils::compute_aligned_size, Buffer, Context, RayTracingContext, RayTracingPipeline,
    RayTracingShaderGroupInfo,
};

/// Byte layout of a shader binding table, computed from the pipeline group
/// counts and the device alignment rules alone, before any buffer exists.
///
/// Regions are packed back to back in a fixed order: one region per ray
/// generation group, then the hit region, then the miss region. Ray
/// generation regions are special cased by the API (their stride must equal
/// their size), so each gets a region of its own and dispatch picks one by
/// index. All offsets are relative to the start of the table buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u32,
    pub handle_size_aligned: u32,
    pub raygen_count: u32,
    pub hit_count: u32,
    pub miss_count: u32,
    /// Size (and stride) of every ray generation region.
    pub raygen_region_size: u32,
    pub hit_region_size: u32,
    pub miss_region_size: u32,
    pub buffer_size: u32,
}

impl SbtLayout {
    pub fn new(
        group_info: &RayTracingShaderGroupInfo,
        handle_size: u32,
        handle_alignment: u32,
        base_alignment: u32,
    ) -> Self {
        let handle_size_aligned = compute_aligned_size(handle_size, handle_alignment);

        let raygen_region_size = compute_aligned_size(handle_size_aligned, base_alignment);
        let hit_region_size = compute_aligned_size(
            group_info.hit_shader_count * handle_size_aligned,
            base_alignment,
        );
        let miss_region_size = compute_aligned_size(
            group_info.miss_shader_count * handle_size_aligned,
            base_alignment,
        );

        let buffer_size = group_info.raygen_shader_count * raygen_region_size
            + hit_region_size
            + miss_region_size;

        Self {
            handle_size,
            handle_size_aligned,
            raygen_count: group_info.raygen_shader_count,
            hit_count: group_info.hit_shader_count,
            miss_count: group_info.miss_shader_count,
            raygen_region_size,
            hit_region_size,
            miss_region_size,
            buffer_size,
        }
    }

    pub fn raygen_offset(&self, index: u32) -> u32 {
        index * self.raygen_region_size
    }

    pub fn hit_offset(&self) -> u32 {
        self.raygen_count * self.raygen_region_size
    }

    pub fn hit_slot_offset(&self, index: u32) -> u32 {
        self.hit_offset() + index * self.handle_size_aligned
    }

    pub fn miss_offset(&self) -> u32 {
        self.hit_offset() + self.hit_region_size
    }

    pub fn miss_slot_offset(&self, index: u32) -> u32 {
        self.miss_offset() + index * self.handle_size_aligned
    }
}

/// Scatters the queried group handles into their table slots. Gaps between
/// a handle and the end of its slot stay zeroed. Handles are consumed in
/// pipeline group order, which therefore has to be: ray generation shaders
/// first, then hit shaders, then miss shaders.
fn pack_handles(layout: &SbtLayout, handles: &[u8]) -> Vec<u8> {
    let mut table = vec![0u8; layout.buffer_size as usize];
    let handle_size = layout.handle_size as usize;

    let mut next_handle = 0usize;
    let mut place = |slot_offset: u32| {
        let handle = &handles[next_handle * handle_size..(next_handle + 1) * handle_size];
        let slot = slot_offset as usize;
        table[slot..slot + handle_size].copy_from_slice(handle);
        next_handle += 1;
    };

    for i in 0..layout.raygen_count {
        place(layout.raygen_offset(i));
    }
    for i in 0..layout.hit_count {
        place(layout.hit_slot_offset(i));
    }
    for i in 0..layout.miss_count {
        place(layout.miss_slot_offset(i));
    }

    table
}

pub struct ShaderBindingTable {
    _buffer: Buffer,
    pub layout: SbtLayout,
    raygen_regions: Vec<vk::StridedDeviceAddressRegionKHR>,
    pub(crate) miss_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) hit_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    pub(crate) fn new(
        context: &Context,
        ray_tracing: &RayTracingContext,
        pipeline: &RayTracingPipeline,
    ) -> Result<Self> {
        let group_info = pipeline.shader_group_info;

        let properties = &ray_tracing.pipeline_properties;
        let layout = SbtLayout::new(
            &group_info,
            properties.shader_group_handle_size,
            properties.shader_group_handle_alignment,
            properties.shader_group_base_alignment,
        );
        log::debug!("Shader binding table layout: {layout:?}");

        // One query fetches the handles of every group.
        let handles_size = group_info.group_count * layout.handle_size;
        let handles = unsafe {
            ray_tracing
                .pipeline_fn
                .get_ray_tracing_shader_group_handles(
                    pipeline.inner,
                    0,
                    group_info.group_count,
                    handles_size as _,
                )?
        };

        let table = pack_handles(&layout, &handles);

        let buffer = context.create_buffer(
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            layout.buffer_size as _,
        )?;
        buffer.copy_data_to_buffer(&table)?;

        let address = buffer.get_device_address();

        let raygen_regions = (0..layout.raygen_count)
            .map(|i| {
                vk::StridedDeviceAddressRegionKHR::builder()
                    .device_address(address + layout.raygen_offset(i) as u64)
                    .size(layout.raygen_region_size as _)
                    .stride(layout.raygen_region_size as _)
                    .build()
            })
            .collect();

        let hit_region = vk::StridedDeviceAddressRegionKHR::builder()
            .device_address(address + layout.hit_offset() as u64)
            .size(layout.hit_region_size as _)
            .stride(layout.handle_size_aligned as _)
            .build();

        let miss_region = vk::StridedDeviceAddressRegionKHR::builder()
            .device_address(address + layout.miss_offset() as u64)
            .size(layout.miss_region_size as _)
            .stride(layout.handle_size_aligned as _)
            .build();

        Ok(Self {
            _buffer: buffer,
            layout,
            raygen_regions,
            miss_region,
            hit_region,
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
        })
    }

    pub(crate) fn raygen_region(&self, index: usize) -> &vk::StridedDeviceAddressRegionKHR {
        &self.raygen_regions[index]
    }

    pub fn raygen_region_count(&self) -> usize {
        self.raygen_regions.len()
    }
}

impl Context {
    pub fn create_shader_binding_table(
        &self,
        pipeline: &RayTracingPipeline,
    ) -> Result<ShaderBindingTable> {
        ShaderBindingTable::new(self, &self.ray_tracing, pipeline)
    }
}

#[cfg(test)]
fn two_raygen_groups() -> RayTracingShaderGroupInfo {
    RayTracingShaderGroupInfo {
        group_count: 4,
        raygen_shader_count: 2,
        miss_shader_count: 1,
        hit_shader_count: 1,
    }
}

#[test]
fn raygen_regions_use_stride_equal_size() {
    let layout = SbtLayout::new(&two_raygen_groups(), 32, 32, 64);

    assert_eq!(layout.handle_size_aligned, 32);
    // stride and size of a raygen region are the same field by
    // construction, aligned up to the base alignment
    assert_eq!(layout.raygen_region_size, 64);
    assert_eq!(layout.raygen_region_size % 64, 0);
}

#[test]
fn regions_are_base_aligned_and_disjoint() {
    let layout = SbtLayout::new(&two_raygen_groups(), 32, 64, 128);

    assert_eq!(layout.handle_size_aligned, 64);
    assert_eq!(layout.raygen_region_size, 128);
    assert_eq!(layout.hit_region_size % 128, 0);
    assert_eq!(layout.miss_region_size % 128, 0);

    // offsets increase monotonically and never overlap
    let rg0 = layout.raygen_offset(0);
    let rg1 = layout.raygen_offset(1);
    assert!(rg0 + layout.raygen_region_size <= rg1);
    assert!(rg1 + layout.raygen_region_size <= layout.hit_offset());
    assert!(layout.hit_offset() + layout.hit_region_size <= layout.miss_offset());
    assert_eq!(
        layout.miss_offset() + layout.miss_region_size,
        layout.buffer_size
    );
}

#[test]
fn handles_land_on_region_slots() {
    let layout = SbtLayout::new(&two_raygen_groups(), 32, 32, 64);

    // four groups, each handle filled with its group index
    let handles = (0..4u8)
        .flat_map(|g| [g + 1; 32])
        .collect::<Vec<_>>();

    let table = pack_handles(&layout, &handles);
    assert_eq!(table.len(), layout.buffer_size as usize);

    assert_eq!(table[layout.raygen_offset(0) as usize], 1);
    assert_eq!(table[layout.raygen_offset(1) as usize], 2);
    assert_eq!(table[layout.hit_slot_offset(0) as usize], 3);
    assert_eq!(table[layout.miss_slot_offset(0) as usize], 4);

    // padding between the first handle and the next region stays zero
    let pad = layout.raygen_offset(0) as usize + layout.handle_size as usize;
    assert!(table[pad..layout.raygen_offset(1) as usize]
        .iter()
        .all(|b| *b == 0));
}

#[test]
fn multi_entry_regions_stride_by_aligned_handle() {
    let groups = RayTracingShaderGroupInfo {
        group_count: 4,
        raygen_shader_count: 1,
        miss_shader_count: 2,
        hit_shader_count: 1,
    };
    let layout = SbtLayout::new(&groups, 32, 32, 64);

    let handles = (0..4u8)
        .flat_map(|g| [g + 1; 32])
        .collect::<Vec<_>>();
    let table = pack_handles(&layout, &handles);

    assert_eq!(
        layout.miss_slot_offset(1) - layout.miss_slot_offset(0),
        layout.handle_size_aligned
    );
    assert_eq!(table[layout.miss_slot_offset(0) as usize], 3);
    assert_eq!(table[layout.miss_slot_offset(1) as usize], 4);
}
