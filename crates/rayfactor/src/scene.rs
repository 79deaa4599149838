use std::mem::size_of;
use std::path::Path;

use app::anyhow::{anyhow, Context as _, Result};
use app::vulkan::ash::vk;
use app::vulkan::utils::create_gpu_only_buffer_from_data;
use app::vulkan::{Buffer, Context, Vertex};
use glam::{UVec4, Vec2, Vec3};

/// One corner of a scene triangle.
///
/// The raster pipelines consume it through the vertex input bindings
/// below, the ray tracing shaders fetch the same bytes through the vertex
/// buffer's device address, so the layout is shared between both paths.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct TriangleVertex {
    pub position: Vec3,
    pub color: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex for TriangleVertex {
    fn bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: 44,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 24,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 3,
                format: vk::Format::R32G32_SFLOAT,
                offset: 36,
            },
        ]
    }
}

/// CPU side of a loaded OBJ file. All meshes of the file are merged into
/// one vertex/index stream so the whole scene fits a single bottom level
/// geometry; per mesh identity survives only in `triangle_mesh_map`.
///
/// The map has one `UVec4` row per triangle: `x` is the triangle count of
/// the owning mesh, `y` the cumulative triangle count through the owning
/// mesh and `z` the mesh ordinal. `w` is unused.
#[derive(Debug, Clone, Default)]
pub struct SceneData {
    pub vertices: Vec<TriangleVertex>,
    pub indices: Vec<u32>,
    pub triangle_mesh_map: Vec<UVec4>,
    pub mesh_count: u32,
}

impl SceneData {
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (models, _) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
            .with_context(|| format!("Failed to load obj file {}", path.display()))?;
        if models.is_empty() {
            return Err(anyhow!("Obj file {} contains no meshes", path.display()));
        }

        let mut data = Self {
            mesh_count: models.len() as u32,
            ..Default::default()
        };

        for model in &models {
            let mesh = &model.mesh;
            let base_vertex = data.vertices.len() as u32;

            let vertex_count = mesh.positions.len() / 3;
            for v in 0..vertex_count {
                data.vertices.push(TriangleVertex {
                    position: Vec3::from_slice(&mesh.positions[3 * v..]),
                    color: if mesh.vertex_color.is_empty() {
                        Vec3::ONE
                    } else {
                        Vec3::from_slice(&mesh.vertex_color[3 * v..])
                    },
                    normal: if mesh.normals.is_empty() {
                        Vec3::Y
                    } else {
                        Vec3::from_slice(&mesh.normals[3 * v..])
                    },
                    uv: if mesh.texcoords.is_empty() {
                        Vec2::ZERO
                    } else {
                        Vec2::from_slice(&mesh.texcoords[2 * v..])
                    },
                });
            }

            data.indices
                .extend(mesh.indices.iter().map(|i| base_vertex + i));
        }

        if data.indices.is_empty() {
            return Err(anyhow!("Obj file {} contains no triangles", path.display()));
        }

        data.triangle_mesh_map = triangle_mesh_map(
            &models
                .iter()
                .map(|m| (m.mesh.indices.len() / 3) as u32)
                .collect::<Vec<_>>(),
        );

        log::info!(
            "Loaded {}: {} meshes, {} triangles, {} vertices",
            path.display(),
            data.mesh_count,
            data.triangle_count(),
            data.vertices.len()
        );

        Ok(data)
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }
}

fn triangle_mesh_map(triangles_per_mesh: &[u32]) -> Vec<UVec4> {
    let mut map = Vec::new();
    let mut cumulative = 0;

    for (mesh, &count) in triangles_per_mesh.iter().enumerate() {
        cumulative += count;
        for _ in 0..count {
            map.push(UVec4::new(count, cumulative, mesh as u32, 0));
        }
    }

    map
}

/// Device resident scene geometry. The buffers are device local and also
/// serve as bottom level build input, so they carry the acceleration
/// structure read only usage on top of their raster roles.
pub struct Scene {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub mesh_map_buffer: Buffer,
    index_count: u32,
    vertex_count: u32,
    mesh_count: u32,
}

impl Scene {
    pub fn new(context: &Context, data: &SceneData) -> Result<Self> {
        let vertex_buffer = create_gpu_only_buffer_from_data(
            context,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            &data.vertices,
        )?;

        let index_buffer = create_gpu_only_buffer_from_data(
            context,
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            &data.indices,
        )?;

        let mesh_map_buffer = create_gpu_only_buffer_from_data(
            context,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            &data.triangle_mesh_map,
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            mesh_map_buffer,
            index_count: data.indices.len() as u32,
            vertex_count: data.vertices.len() as u32,
            mesh_count: data.mesh_count,
        })
    }

    pub fn vertex_buffer_address(&self) -> u64 {
        self.vertex_buffer.get_device_address()
    }

    pub fn index_buffer_address(&self) -> u64 {
        self.index_buffer.get_device_address()
    }

    pub fn mesh_map_address(&self) -> u64 {
        self.mesh_map_buffer.get_device_address()
    }

    pub fn vertex_stride(&self) -> u64 {
        size_of::<TriangleVertex>() as u64
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn mesh_count(&self) -> u32 {
        self.mesh_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<TriangleVertex>(), 44);
    }

    #[test]
    fn mesh_map_counts_cumulatively() {
        let map = triangle_mesh_map(&[2, 3]);

        assert_eq!(map.len(), 5);
        assert_eq!(map[0], UVec4::new(2, 2, 0, 0));
        assert_eq!(map[1], UVec4::new(2, 2, 0, 0));
        assert_eq!(map[2], UVec4::new(3, 5, 1, 0));
        assert_eq!(map[4], UVec4::new(3, 5, 1, 0));
    }

    #[test]
    fn loads_the_two_plates_scene() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("models/two_plates.obj");
        let data = SceneData::load_obj(path).unwrap();

        assert_eq!(data.mesh_count, 2);
        assert_eq!(data.triangle_count(), 4);
        assert_eq!(data.indices.len(), 12);
        assert_eq!(data.triangle_mesh_map.len(), 4);
        assert_eq!(data.triangle_mesh_map[0], UVec4::new(2, 2, 0, 0));
        assert_eq!(data.triangle_mesh_map[3], UVec4::new(2, 4, 1, 0));

        // indices of the second mesh must point past the first mesh's vertices
        assert!(data.indices[6..].iter().all(|&i| i >= 4));
    }
}
