// Descriptors for the per-frame camera uniform
//
// One uniform buffer holds N camera blocks, each padded to the device's
// minimum uniform offset alignment. Slot i's descriptor set points at
// block i, so a frame never overwrites data an in-flight frame reads.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocator;

use super::buffer::{self, HostBuffer};
use super::{DeletionQueue, Resource, VulkanDevice};

/// Byte range of slot `index` inside the shared uniform buffer
pub fn slot_region(index: usize, stride: vk::DeviceSize) -> vk::DeviceSize {
    index as vk::DeviceSize * stride
}

pub struct FrameDescriptors {
    pub set_layout: vk::DescriptorSetLayout,
    /// One set per frame slot, in slot order
    pub sets: Vec<vk::DescriptorSet>,
    pub uniform_buffer: HostBuffer,
    /// Padded size of one slot's block
    pub stride: vk::DeviceSize,
}

/// Create pool, layout, uniform buffer and one set per frame slot.
///
/// `block_size` is the unpadded size of one slot's uniform data.
pub fn create_frame_descriptors(
    device: &VulkanDevice,
    allocator: &mut Allocator,
    frame_overlap: usize,
    block_size: vk::DeviceSize,
    deletion: &mut DeletionQueue<Resource>,
) -> Result<FrameDescriptors> {
    let overlap = u32::try_from(frame_overlap).context("Too many frames in flight")?;

    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: overlap,
    }];
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .max_sets(overlap)
        .pool_sizes(&pool_sizes);
    let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
        .context("Failed to create descriptor pool")?;
    deletion.push(Resource::DescriptorPool(pool));

    let bindings = [vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build()];
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    let set_layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .context("Failed to create descriptor set layout")?;
    deletion.push(Resource::DescriptorSetLayout(set_layout));

    let stride = buffer::pad_uniform_buffer_size(block_size, device.min_uniform_alignment());
    let uniform_buffer = buffer::create_host_buffer(
        device,
        allocator,
        "camera uniform",
        stride * frame_overlap as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        deletion,
    )?;

    // Sets are freed together with the pool
    let set_layouts = vec![set_layout; frame_overlap];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&set_layouts);
    let sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
        .context("Failed to allocate descriptor sets")?;

    for (index, &set) in sets.iter().enumerate() {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform_buffer.buffer,
            offset: slot_region(index, stride),
            range: block_size,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();

        unsafe { device.device.update_descriptor_sets(&[write], &[]) };
    }

    log::info!(target: "application",
        "Descriptors created: {} sets, {} byte stride",
        sets.len(),
        stride
    );

    Ok(FrameDescriptors {
        set_layout,
        sets,
        uniform_buffer,
        stride,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_regions_do_not_overlap() {
        let stride = buffer::pad_uniform_buffer_size(16, 256);
        let regions: Vec<_> = (0..3).map(|i| slot_region(i, stride)).collect();

        assert_eq!(regions, vec![0, 256, 512]);
        for pair in regions.windows(2) {
            assert!(pair[1] - pair[0] >= 16);
        }
    }
}
