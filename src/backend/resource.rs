// Tagged Vulkan resources and their release dispatcher
//
// Setup code pushes one `Resource` per created object into the deletion
// queue. `VulkanReleaser` is the only place that knows how to destroy each
// kind, so the teardown sequence can be inspected without touching a GPU.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};

use super::deletion::Release;
use super::{DeletionQueue, VulkanDevice};

/// One releasable Vulkan object
pub enum Resource {
    Instance,
    DebugMessenger(vk::DebugUtilsMessengerEXT),
    Surface(vk::SurfaceKHR),
    Device,
    /// Drops the gpu-allocator instance; all buffers must be gone by then
    Allocator,
    Swapchain(vk::SwapchainKHR),
    ImageView(vk::ImageView),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    CommandPool(vk::CommandPool),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
    Buffer(vk::Buffer, Allocation),
    DescriptorPool(vk::DescriptorPool),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
}

/// Discriminant of a [`Resource`], for logging and inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Allocator,
    Swapchain,
    ImageView,
    RenderPass,
    Framebuffer,
    CommandPool,
    Semaphore,
    Fence,
    Buffer,
    DescriptorPool,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Instance => ResourceKind::Instance,
            Resource::DebugMessenger(_) => ResourceKind::DebugMessenger,
            Resource::Surface(_) => ResourceKind::Surface,
            Resource::Device => ResourceKind::Device,
            Resource::Allocator => ResourceKind::Allocator,
            Resource::Swapchain(_) => ResourceKind::Swapchain,
            Resource::ImageView(_) => ResourceKind::ImageView,
            Resource::RenderPass(_) => ResourceKind::RenderPass,
            Resource::Framebuffer(_) => ResourceKind::Framebuffer,
            Resource::CommandPool(_) => ResourceKind::CommandPool,
            Resource::Semaphore(_) => ResourceKind::Semaphore,
            Resource::Fence(_) => ResourceKind::Fence,
            Resource::Buffer(..) => ResourceKind::Buffer,
            Resource::DescriptorPool(_) => ResourceKind::DescriptorPool,
            Resource::DescriptorSetLayout(_) => ResourceKind::DescriptorSetLayout,
            Resource::PipelineLayout(_) => ResourceKind::PipelineLayout,
            Resource::Pipeline(_) => ResourceKind::Pipeline,
        }
    }
}

impl DeletionQueue<Resource> {
    /// Kinds of the registered resources, in the order they will be released
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.release_order().map(Resource::kind).collect()
    }
}

/// Destroys resources against a live device.
///
/// Holds the allocator slot so `Resource::Buffer` can hand its memory back
/// and `Resource::Allocator` can drop the allocator itself.
pub struct VulkanReleaser<'a> {
    pub device: &'a VulkanDevice,
    pub allocator: &'a mut Option<Allocator>,
}

impl Release<Resource> for VulkanReleaser<'_> {
    fn release(&mut self, resource: Resource) -> Result<()> {
        log::trace!(target: "application", "Releasing {:?}", resource.kind());

        let device = &self.device.device;

        unsafe {
            match resource {
                Resource::Instance => self.device.instance.destroy_instance(None),
                Resource::DebugMessenger(messenger) => self
                    .device
                    .debug_utils
                    .destroy_debug_utils_messenger(messenger, None),
                Resource::Surface(surface) => {
                    self.device.surface_loader.destroy_surface(surface, None)
                }
                Resource::Device => device.destroy_device(None),
                Resource::Allocator => {
                    let allocator = self
                        .allocator
                        .take()
                        .context("Allocator released twice")?;
                    drop(allocator);
                }
                Resource::Swapchain(swapchain) => self
                    .device
                    .swapchain_loader
                    .destroy_swapchain(swapchain, None),
                Resource::ImageView(view) => device.destroy_image_view(view, None),
                Resource::RenderPass(render_pass) => device.destroy_render_pass(render_pass, None),
                Resource::Framebuffer(framebuffer) => device.destroy_framebuffer(framebuffer, None),
                Resource::CommandPool(pool) => device.destroy_command_pool(pool, None),
                Resource::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                Resource::Fence(fence) => device.destroy_fence(fence, None),
                Resource::Buffer(buffer, allocation) => {
                    self.allocator
                        .as_mut()
                        .context("Buffer released after its allocator")?
                        .free(allocation)
                        .context("Failed to free buffer memory")?;
                    device.destroy_buffer(buffer, None);
                }
                Resource::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
                Resource::DescriptorSetLayout(layout) => {
                    device.destroy_descriptor_set_layout(layout, None)
                }
                Resource::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
                Resource::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
            }
        }

        Ok(())
    }
}
