use std::{
    mem::{align_of, size_of, size_of_val},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context as _, Result};
use ash::vk;
use gpu_allocator::vulkan::AllocationScheme;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};

use crate::{device::Device, Context};

pub struct Buffer {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let create_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        let inner = unsafe { device.inner.create_buffer(&create_info, None)? };
        let requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };
        let allocation = allocator
            .lock()
            .map_err(|_| anyhow!("Allocator mutex poisoned"))?
            .allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location: memory_location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory(), allocation.offset())?
        };

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            size,
        })
    }

    pub fn copy_data_to_buffer<T: Copy>(&self, data: &[T]) -> Result<()> {
        let data_ptr = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .context("Buffer memory is not host visible")?
            .as_ptr();

        unsafe {
            let mut align =
                ash::util::Align::new(data_ptr, align_of::<T>() as _, size_of_val(data) as _);
            align.copy_from_slice(data);
        };

        Ok(())
    }

    /// Reads back `count` elements from the start of a host visible buffer.
    pub fn read_data<T: Copy>(&self, count: usize) -> Result<Vec<T>> {
        let byte_len = count * size_of::<T>();
        if byte_len as vk::DeviceSize > self.size {
            return Err(anyhow!(
                "Read of {byte_len} bytes exceeds buffer size {}",
                self.size
            ));
        }

        let data_ptr = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .context("Buffer memory is not host visible")?
            .as_ptr();

        let data = unsafe { std::slice::from_raw_parts(data_ptr as *const T, count) };

        Ok(data.to_vec())
    }

    pub fn get_device_address(&self) -> u64 {
        let addr_info = vk::BufferDeviceAddressInfo::builder().buffer(self.inner);
        unsafe { self.device.inner.get_buffer_device_address(&addr_info) }
    }
}

impl Context {
    pub fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            memory_location,
            size,
        )
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_buffer(self.inner, None) };
        if let (Ok(mut allocator), Some(allocation)) =
            (self.allocator.lock(), self.allocation.take())
        {
            let _ = allocator.free(allocation);
        }
    }
}
