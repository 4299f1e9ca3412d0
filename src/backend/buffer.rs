// Buffer utilities for vertex and uniform buffers
//
// Buffers live in CPU-to-GPU memory from gpu-allocator, which keeps them
// persistently mapped. The allocation itself is handed to the deletion
// queue; callers keep a `HostBuffer` view for writes.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use std::ptr::NonNull;

use super::{DeletionQueue, Resource, VulkanDevice};

/// Round `size` up to the next multiple of `alignment`.
///
/// An alignment of 0 means the device has no requirement.
pub fn pad_uniform_buffer_size(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

pub fn create_allocator(
    device: &VulkanDevice,
    deletion: &mut DeletionQueue<Resource>,
) -> Result<Allocator> {
    let allocator = Allocator::new(&AllocatorCreateDesc {
        instance: device.instance.clone(),
        device: device.device.clone(),
        physical_device: device.physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: Default::default(),
    })
    .context("Failed to create memory allocator")?;

    deletion.push(Resource::Allocator);
    log::info!(target: "application", "Initialized memory allocator");

    Ok(allocator)
}

/// Mapped, host-writable view of a buffer whose memory the deletion queue
/// owns. Valid until the queue is drained.
pub struct HostBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    mapped: NonNull<u8>,
}

impl HostBuffer {
    /// # Safety
    /// `mapped` must point to at least `size` writable bytes that outlive
    /// the returned value.
    pub unsafe fn from_mapped(buffer: vk::Buffer, size: vk::DeviceSize, mapped: NonNull<u8>) -> Self {
        Self { buffer, size, mapped }
    }

    /// Copy `data` into the buffer starting at byte `offset`
    pub fn write<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = offset
            .checked_add(bytes.len() as vk::DeviceSize)
            .context("Buffer write range overflows")?;

        if end > self.size {
            anyhow::bail!(
                "Buffer write of {} bytes at offset {} exceeds buffer size {}",
                bytes.len(),
                offset,
                self.size
            );
        }

        unsafe {
            self.mapped
                .as_ptr()
                .add(offset as usize)
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        }

        Ok(())
    }
}

/// Create a host-visible buffer and register it for release
pub fn create_host_buffer(
    device: &VulkanDevice,
    allocator: &mut Allocator,
    name: &str,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    deletion: &mut DeletionQueue<Resource>,
) -> Result<HostBuffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
        .with_context(|| format!("Failed to create {} buffer", name))?;

    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let allocation = match allocator.allocate(&AllocationCreateDesc {
        name,
        requirements,
        location: MemoryLocation::CpuToGpu,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e).with_context(|| format!("Failed to allocate {} buffer memory", name));
        }
    };

    // Register before binding so a failure below still releases both
    let memory = unsafe { allocation.memory() };
    let offset = allocation.offset();
    let mapped = allocation.mapped_ptr().map(|ptr| ptr.cast::<u8>());
    deletion.push(Resource::Buffer(buffer, allocation));

    unsafe { device.device.bind_buffer_memory(buffer, memory, offset) }
        .with_context(|| format!("Failed to bind {} buffer memory", name))?;

    let mapped = mapped.with_context(|| format!("{} buffer memory is not host mapped", name))?;

    Ok(unsafe { HostBuffer::from_mapped(buffer, size, mapped) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_padding_examples() {
        assert_eq!(pad_uniform_buffer_size(80, 256), 256);
        assert_eq!(pad_uniform_buffer_size(128, 64), 128);
        assert_eq!(pad_uniform_buffer_size(16, 0), 16);
        assert_eq!(pad_uniform_buffer_size(0, 256), 0);
        assert_eq!(pad_uniform_buffer_size(257, 256), 512);
    }

    #[test]
    fn test_padding_is_smallest_aligned_size() {
        for alignment in [1u64, 4, 16, 48, 64, 256] {
            for size in 0..600u64 {
                let padded = pad_uniform_buffer_size(size, alignment);
                assert!(padded >= size);
                assert_eq!(padded % alignment, 0);
                // One alignment step less would no longer fit
                assert!(padded < size + alignment);
            }
        }
    }

    #[test]
    fn test_write_lands_at_offset() {
        let mut backing = vec![0u8; 32];
        let mapped = NonNull::new(backing.as_mut_ptr()).unwrap();
        let buffer = unsafe { HostBuffer::from_mapped(vk::Buffer::from_raw(1), 32, mapped) };

        buffer.write(16, &[1.0f32, 2.0]).unwrap();

        assert_eq!(&backing[..16], &[0u8; 16]);
        assert_eq!(&backing[16..20], &1.0f32.to_ne_bytes());
        assert_eq!(&backing[20..24], &2.0f32.to_ne_bytes());
    }

    #[test]
    fn test_write_past_end_is_rejected() {
        let mut backing = vec![0u8; 16];
        let mapped = NonNull::new(backing.as_mut_ptr()).unwrap();
        let buffer = unsafe { HostBuffer::from_mapped(vk::Buffer::from_raw(1), 16, mapped) };

        assert!(buffer.write(12, &[0u32, 0]).is_err());
        assert!(buffer.write(u64::MAX, &[0u8]).is_err());
        assert!(buffer.write(12, &[7u32]).is_ok());
        assert_eq!(&backing[12..], &7u32.to_ne_bytes());
    }
}
