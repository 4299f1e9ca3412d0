// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync. `FrameSync` is the
// narrow device surface the frame ring drives each iteration.

use anyhow::{Context, Result};
use ash::vk;

use super::{DeletionQueue, Resource, VulkanDevice};

/// One queue submission for a frame slot
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    /// Waited on before `wait_stage` runs (image acquired)
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    /// Signaled when the work completes (rendering finished)
    pub signal_semaphore: vk::Semaphore,
    /// Signaled when the work completes (slot reusable)
    pub fence: vk::Fence,
}

/// Device operations a frame iteration depends on
pub trait FrameSync {
    /// Block until `fence` is signaled. Exceeding `timeout_ns` is an error.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;

    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    fn submit(&self, submission: &Submission) -> Result<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> Result<()>;
}

impl FrameSync for VulkanDevice {
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                anyhow::bail!("Timed out after {} ns waiting for frame fence", timeout_ns)
            }
            Err(e) => Err(e).context("Failed to wait for frame fence"),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.context("Failed to reset frame fence")
    }

    fn submit(&self, submission: &Submission) -> Result<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.queue_submit(
                self.graphics_queue,
                &[submit_info.build()],
                submission.fence,
            )
        }
        .context("Failed to submit frame")
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }
}

pub fn create_semaphore(
    device: &VulkanDevice,
    deletion: &mut DeletionQueue<Resource>,
) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let semaphore = unsafe { device.device.create_semaphore(&semaphore_info, None) }
        .context("Failed to create semaphore")?;
    deletion.push(Resource::Semaphore(semaphore));
    Ok(semaphore)
}

/// Frame fences start signaled so the first wait on a fresh slot returns
pub fn create_fence(
    device: &VulkanDevice,
    signaled: bool,
    deletion: &mut DeletionQueue<Resource>,
) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::builder().flags(flags);
    let fence = unsafe { device.device.create_fence(&fence_info, None) }
        .context("Failed to create fence")?;
    deletion.push(Resource::Fence(fence));
    Ok(fence)
}
