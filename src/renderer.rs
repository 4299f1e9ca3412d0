// =============================================================================
// RENDERER - Setup, per-frame work and teardown for the triangle
// =============================================================================
//
// SETUP ORDER (each step registers what it creates):
//   instance -> debug messenger -> surface -> device -> allocator
//   -> swapchain + image views -> render pass -> framebuffers
//   -> descriptors + uniform buffer -> vertex buffer -> frame slots
//   -> pipeline layout + pipeline
//
// Teardown idles the device and drains the deletion queue, which releases
// everything above in exactly the reverse order.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocator;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::backend::buffer::{self, HostBuffer};
use crate::backend::deletion::Release;
use crate::backend::descriptor::{self, FrameDescriptors};
use crate::backend::pipeline::{self, GraphicsPipeline};
use crate::backend::sync::FrameSync;
use crate::backend::{DeletionQueue, FrameRing, FrameSlot, Resource, Swapchain, VulkanDevice, VulkanReleaser};
use crate::config::Config;
use crate::triangle::{CameraData, PushConstants, Vertex, TRIANGLE_VERTICES};

/// Everything created after the logical device
struct Resources {
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    descriptors: FrameDescriptors,
    vertex_buffer: HostBuffer,
    ring: FrameRing,
    pipeline: GraphicsPipeline,
}

pub struct Renderer {
    device: VulkanDevice,
    allocator: Option<Allocator>,
    deletion: DeletionQueue<Resource>,
    resources: Resources,

    clear_color: [f32; 4],
    acquire_timeout_ns: u64,
    shut_down: bool,
}

impl Renderer {
    /// Create every Vulkan object needed to draw into `window`.
    ///
    /// If a step after device creation fails, whatever was already created
    /// is released before the error is returned.
    pub fn new<W>(config: &Config, window: &W, width: u32, height: u32) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let mut deletion = DeletionQueue::new();

        let device = VulkanDevice::new(
            &config.window.title,
            config.debug.validation_layers,
            window,
            &mut deletion,
        )?;

        let mut allocator = None;
        let resources = match Self::create_resources(
            &device,
            &mut allocator,
            &mut deletion,
            config,
            width,
            height,
        ) {
            Ok(resources) => resources,
            Err(e) => {
                let mut releaser = VulkanReleaser {
                    device: &device,
                    allocator: &mut allocator,
                };
                if let Err(cleanup) = release_all(&device, &mut deletion, &mut releaser) {
                    log::error!(target: "application", "Cleanup after failed setup: {:#}", cleanup);
                }
                return Err(e);
            }
        };

        log::info!(target: "application", "Renderer ready ({} resources registered)", deletion.len());

        Ok(Self {
            device,
            allocator,
            deletion,
            resources,
            clear_color: config.graphics.clear_color,
            acquire_timeout_ns: config.graphics.acquire_timeout_ns,
            shut_down: false,
        })
    }

    fn create_resources(
        device: &VulkanDevice,
        allocator_slot: &mut Option<Allocator>,
        deletion: &mut DeletionQueue<Resource>,
        config: &Config,
        width: u32,
        height: u32,
    ) -> Result<Resources> {
        let frame_overlap = config.graphics.frame_overlap;

        let allocator = allocator_slot.insert(buffer::create_allocator(device, deletion)?);

        let swapchain = Swapchain::new(
            device,
            config.get_present_mode(),
            width,
            height,
            frame_overlap,
            deletion,
        )?;

        let render_pass = pipeline::create_render_pass(device, swapchain.format, deletion)?;
        let framebuffers = pipeline::create_framebuffers(
            device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
            deletion,
        )?;

        let descriptors = descriptor::create_frame_descriptors(
            device,
            allocator,
            frame_overlap,
            CameraData::SIZE,
            deletion,
        )?;

        let vertex_buffer = buffer::create_host_buffer(
            device,
            allocator,
            "vertex",
            std::mem::size_of_val(&TRIANGLE_VERTICES) as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            deletion,
        )?;
        vertex_buffer.write::<Vertex>(0, &TRIANGLE_VERTICES)?;

        let slots = descriptors
            .sets
            .iter()
            .enumerate()
            .map(|(index, &set)| FrameSlot::create(device, index, set, deletion))
            .collect::<Result<Vec<_>>>()?;
        let ring = FrameRing::new(slots, config.graphics.fence_timeout())?;

        let pipeline = pipeline::create_graphics_pipeline(
            device,
            render_pass,
            swapchain.extent,
            descriptors.set_layout,
            &config.shaders.vertex,
            &config.shaders.fragment,
            deletion,
        )?;

        Ok(Resources {
            swapchain,
            render_pass,
            framebuffers,
            descriptors,
            vertex_buffer,
            ring,
            pipeline,
        })
    }

    /// Frames submitted so far
    pub fn frame(&self) -> u64 {
        self.resources.ring.frame()
    }

    /// Draw one frame.
    ///
    /// Blocks on the selected slot's fence first; its previous submission
    /// must finish before its command buffer and uniform block are reused.
    pub fn render(&mut self) -> Result<()> {
        if self.shut_down {
            anyhow::bail!("Render called after shutdown");
        }

        let res = &mut self.resources;
        let frame = res.ring.frame();

        let slot = res.ring.begin(&self.device)?;
        let slot_index = slot.index;
        let command_pool = slot.command_pool;
        let command_buffer = slot.command_buffer;
        let image_available = slot.image_available;
        let render_finished = slot.render_finished;
        let descriptor_set = slot.descriptor_set;

        let (image_index, suboptimal) =
            res.swapchain
                .acquire_next_image(&self.device, self.acquire_timeout_ns, image_available)?;
        if suboptimal {
            log::trace!(target: "application", "Swapchain suboptimal at frame {}", frame);
        }

        let framebuffer = *res
            .framebuffers
            .get(image_index as usize)
            .with_context(|| format!("No framebuffer for swapchain image {}", image_index))?;

        // Safe to overwrite: this slot's fence was just waited on
        let camera = CameraData::for_frame(frame);
        res.descriptors.uniform_buffer.write(
            descriptor::slot_region(slot_index, res.descriptors.stride),
            &[camera],
        )?;

        let device = &self.device.device;
        unsafe {
            device
                .reset_command_pool(command_pool, vk::CommandPoolResetFlags::empty())
                .context("Failed to reset command pool")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .context("Failed to begin command buffer")?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            }];
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(res.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: res.swapchain.extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                res.pipeline.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                res.pipeline.layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[res.vertex_buffer.buffer], &[0]);

            let push_constants = PushConstants::default();
            device.cmd_push_constants(
                command_buffer,
                res.pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&push_constants),
            );

            device.cmd_draw(command_buffer, TRIANGLE_VERTICES.len() as u32, 1, 0, 0);

            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .context("Failed to end command buffer")?;
        }

        res.ring
            .submit(&self.device, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)?;

        let suboptimal = res
            .swapchain
            .present(&self.device, image_index, &[render_finished])?;
        if suboptimal {
            log::trace!(target: "application", "Present reported suboptimal swapchain");
        }

        Ok(())
    }

    /// Wait for the GPU to go idle and release every registered resource.
    ///
    /// Runs at most once; later calls (and the drop) do nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let ring = &self.resources.ring;
        log::info!(target: "application",
            "Shutting down after {} frames ({} in flight), releasing {} resources",
            self.frame(),
            ring.overlap(),
            self.deletion.len()
        );
        for index in 0..ring.overlap() {
            if let Some(slot) = ring.slot(index) {
                log::debug!(target: "application", "Frame slot {} is {:?}", index, slot.state());
            }
        }
        log::debug!(target: "application", "Release order: {:?}", self.deletion.kinds());

        let mut releaser = VulkanReleaser {
            device: &self.device,
            allocator: &mut self.allocator,
        };
        release_all(&self.device, &mut self.deletion, &mut releaser)?;

        log::info!(target: "application", "Cleanup complete");
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!(target: "application", "Renderer teardown failed: {:#}", e);
        }
    }
}

/// Idle the device, then drain `deletion`. Nothing is released if the
/// device cannot be idled.
fn release_all<D, T, R>(device: &D, deletion: &mut DeletionQueue<T>, releaser: &mut R) -> Result<()>
where
    D: FrameSync,
    R: Release<T>,
{
    device
        .wait_idle()
        .context("Device still busy; resources were not released")?;
    deletion.drain(releaser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sync::Submission;
    use std::cell::RefCell;

    /// Shares one event log with the releaser so ordering can be checked
    struct IdleDevice<'a> {
        events: &'a RefCell<Vec<String>>,
        idle_fails: bool,
    }

    impl FrameSync for IdleDevice<'_> {
        fn wait_for_fence(&self, _fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
            Ok(())
        }

        fn reset_fence(&self, _fence: vk::Fence) -> Result<()> {
            Ok(())
        }

        fn submit(&self, _submission: &Submission) -> Result<()> {
            Ok(())
        }

        fn wait_idle(&self) -> Result<()> {
            self.events.borrow_mut().push("idle".to_string());
            if self.idle_fails {
                anyhow::bail!("device lost");
            }
            Ok(())
        }
    }

    fn queue() -> DeletionQueue<&'static str> {
        let mut queue = DeletionQueue::new();
        queue.push("device");
        queue.push("swapchain");
        queue.push("pipeline");
        queue
    }

    #[test]
    fn test_device_idles_before_any_release() {
        let events = RefCell::new(Vec::new());
        let device = IdleDevice {
            events: &events,
            idle_fails: false,
        };
        let mut deletion = queue();

        release_all(&device, &mut deletion, &mut |entry: &'static str| -> Result<()> {
            events.borrow_mut().push(format!("release {}", entry));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            *events.borrow(),
            vec!["idle", "release pipeline", "release swapchain", "release device"]
        );
        assert!(deletion.is_empty());
    }

    #[test]
    fn test_failed_idle_leaves_queue_untouched() {
        let events = RefCell::new(Vec::new());
        let device = IdleDevice {
            events: &events,
            idle_fails: true,
        };
        let mut deletion = queue();

        let err = release_all(&device, &mut deletion, &mut |entry: &'static str| -> Result<()> {
            events.borrow_mut().push(format!("release {}", entry));
            Ok(())
        })
        .unwrap_err();

        assert!(format!("{:#}", err).contains("device lost"));
        assert_eq!(*events.borrow(), vec!["idle"]);
        assert_eq!(deletion.len(), 3);

        // Nothing real was registered
        deletion
            .drain(&mut |_: &'static str| -> Result<()> { Ok(()) })
            .unwrap();
    }
}
