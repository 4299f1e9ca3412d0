// Frame ring - frames in flight
//
// N preallocated slots, each with its own command buffer, semaphores, fence
// and descriptor set. Iteration `f` uses slot `f mod N`; waiting on that
// slot's fence before reuse bounds how far the CPU runs ahead of the GPU.
//
// Per-slot lifecycle:
//
//   Idle --begin (wait fence, reset)--> Recording --submit--> InFlight
//     ^                                                          |
//     +------ fence observed signaled by the next begin ---------+

use anyhow::{Context, Result};
use ash::vk;

use super::sync::{self, FrameSync, Submission};
use super::{DeletionQueue, Resource, VulkanDevice};

/// Slot selected for a given frame counter
pub fn slot_index(frame: u64, overlap: usize) -> usize {
    (frame % overlap as u64) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, resources free to reuse
    Idle,
    /// Fence reset, command buffer being built
    Recording,
    /// Submitted, fence not yet observed signaled
    InFlight,
}

/// Per-frame resource bundle
#[derive(Debug)]
pub struct FrameSlot {
    pub index: usize,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by swapchain acquire
    pub image_available: vk::Semaphore,
    /// Signaled by the submission, waited on by present
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    pub descriptor_set: vk::DescriptorSet,
    state: SlotState,
}

impl FrameSlot {
    pub fn new(
        index: usize,
        command_pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
        in_flight_fence: vk::Fence,
        descriptor_set: vk::DescriptorSet,
    ) -> Self {
        Self {
            index,
            command_pool,
            command_buffer,
            image_available,
            render_finished,
            in_flight_fence,
            descriptor_set,
            state: SlotState::Idle,
        }
    }

    /// Create the Vulkan objects for slot `index` and register them
    pub fn create(
        device: &VulkanDevice,
        index: usize,
        descriptor_set: vk::DescriptorSet,
        deletion: &mut DeletionQueue<Resource>,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;
        deletion.push(Resource::CommandPool(command_pool));

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;

        let image_available = sync::create_semaphore(device, deletion)?;
        let render_finished = sync::create_semaphore(device, deletion)?;
        let in_flight_fence = sync::create_fence(device, true, deletion)?;

        Ok(Self::new(
            index,
            command_pool,
            command_buffer,
            image_available,
            render_finished,
            in_flight_fence,
            descriptor_set,
        ))
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// Fixed-size ring of frame slots driven by a monotonically increasing
/// frame counter.
///
/// Not thread-safe; owned and driven by the render thread.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    frame: u64,
    fence_timeout_ns: u64,
}

impl FrameRing {
    /// Build a ring from preallocated slots. `slots[i].index` must be `i`.
    pub fn new(slots: Vec<FrameSlot>, fence_timeout_ns: u64) -> Result<Self> {
        if slots.is_empty() {
            anyhow::bail!("A frame ring needs at least one slot");
        }
        if let Some(slot) = slots.iter().enumerate().find(|(i, slot)| slot.index != *i) {
            anyhow::bail!("Frame slot {} stored at position {}", slot.1.index, slot.0);
        }

        log::info!(target: "application", "Frame ring created with {} frames in flight", slots.len());

        Ok(Self {
            slots,
            frame: 0,
            fence_timeout_ns,
        })
    }

    /// Number of slots (N)
    pub fn overlap(&self) -> usize {
        self.slots.len()
    }

    /// Frames submitted so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn current_index(&self) -> usize {
        slot_index(self.frame, self.slots.len())
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Wait for the current slot's previous submission, then reset its fence
    /// and move it to `Recording`.
    ///
    /// Blocks for as long as the fence stays unsignaled, up to the ring's
    /// timeout.
    pub fn begin<D: FrameSync>(&mut self, device: &D) -> Result<&FrameSlot> {
        let index = self.current_index();
        let timeout = self.fence_timeout_ns;
        let slot = &mut self.slots[index];

        if slot.state == SlotState::Recording {
            // Its fence is already reset; waiting again would never return
            anyhow::bail!("Frame slot {} is already recording", index);
        }

        device
            .wait_for_fence(slot.in_flight_fence, timeout)
            .with_context(|| format!("Frame slot {} never became reusable", index))?;
        slot.state = SlotState::Idle;

        device.reset_fence(slot.in_flight_fence)?;
        slot.state = SlotState::Recording;

        Ok(&*slot)
    }

    /// Submit the current slot's command buffer and advance the frame
    /// counter.
    ///
    /// The counter moves on submission, not on completion.
    pub fn submit<D: FrameSync>(&mut self, device: &D, wait_stage: vk::PipelineStageFlags) -> Result<()> {
        let index = self.current_index();
        let slot = &mut self.slots[index];

        if slot.state != SlotState::Recording {
            anyhow::bail!("Frame slot {} submitted while {:?}", index, slot.state);
        }

        device.submit(&Submission {
            command_buffer: slot.command_buffer,
            wait_semaphore: slot.image_available,
            wait_stage,
            signal_semaphore: slot.render_finished,
            fence: slot.in_flight_fence,
        })?;
        slot.state = SlotState::InFlight;

        self.frame += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use parking_lot::{Condvar, Mutex};
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

    fn fake_slot(index: usize) -> FrameSlot {
        // Distinct fake handles per slot: 100 * (index + 1) + field
        let base = 100 * (index as u64 + 1);
        FrameSlot::new(
            index,
            vk::CommandPool::from_raw(base + 1),
            vk::CommandBuffer::from_raw(base + 2),
            vk::Semaphore::from_raw(base + 3),
            vk::Semaphore::from_raw(base + 4),
            vk::Fence::from_raw(base + 5),
            vk::DescriptorSet::from_raw(base + 6),
        )
    }

    fn ring(overlap: usize) -> FrameRing {
        FrameRing::new((0..overlap).map(fake_slot).collect(), u64::MAX).unwrap()
    }

    /// Records calls; submitted fences complete immediately unless held.
    #[derive(Default)]
    struct FakeDevice {
        calls: RefCell<Vec<String>>,
        held: RefCell<HashSet<u64>>,
        submissions: RefCell<Vec<Submission>>,
    }

    impl FrameSync for FakeDevice {
        fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
            self.calls.borrow_mut().push(format!("wait {}", fence.as_raw()));
            if self.held.borrow().contains(&fence.as_raw()) {
                anyhow::bail!("Timed out after {} ns waiting for frame fence", timeout_ns);
            }
            Ok(())
        }

        fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
            self.calls.borrow_mut().push(format!("reset {}", fence.as_raw()));
            Ok(())
        }

        fn submit(&self, submission: &Submission) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("submit {}", submission.command_buffer.as_raw()));
            self.submissions.borrow_mut().push(*submission);
            Ok(())
        }

        fn wait_idle(&self) -> Result<()> {
            self.calls.borrow_mut().push("idle".to_string());
            Ok(())
        }
    }

    fn run_frame(ring: &mut FrameRing, device: &FakeDevice) -> usize {
        let index = ring.begin(device).unwrap().index;
        ring.submit(device, STAGE).unwrap();
        index
    }

    #[test]
    fn test_slot_index_is_frame_mod_overlap() {
        for overlap in 1..6 {
            for frame in 0..50u64 {
                assert_eq!(slot_index(frame, overlap), (frame % overlap as u64) as usize);
            }
        }
        assert_eq!(slot_index(u64::MAX, 2), 1);
    }

    #[test]
    fn test_double_buffered_slot_sequence() {
        let mut ring = ring(2);
        let device = FakeDevice::default();

        let slots: Vec<usize> = (0..4).map(|_| run_frame(&mut ring, &device)).collect();

        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert_eq!(ring.frame(), 4);
    }

    #[test]
    fn test_iteration_waits_then_resets_then_submits() {
        let mut ring = ring(2);
        let device = FakeDevice::default();

        run_frame(&mut ring, &device);
        run_frame(&mut ring, &device);

        assert_eq!(
            *device.calls.borrow(),
            vec!["wait 105", "reset 105", "submit 102", "wait 205", "reset 205", "submit 202"]
        );
    }

    #[test]
    fn test_submission_uses_the_slots_own_sync_objects() {
        let mut ring = ring(3);
        let device = FakeDevice::default();

        for _ in 0..3 {
            run_frame(&mut ring, &device);
        }

        let submissions = device.submissions.borrow();
        for (i, submission) in submissions.iter().enumerate() {
            let slot = ring.slot(i).unwrap();
            assert_eq!(submission.command_buffer, slot.command_buffer);
            assert_eq!(submission.wait_semaphore, slot.image_available);
            assert_eq!(submission.signal_semaphore, slot.render_finished);
            assert_eq!(submission.fence, slot.in_flight_fence);
            assert_eq!(submission.wait_stage, STAGE);
        }
    }

    #[test]
    fn test_slot_state_transitions() {
        let mut ring = ring(2);
        let device = FakeDevice::default();

        assert_eq!(ring.slot(ring.current_index()).unwrap().state(), SlotState::Idle);

        ring.begin(&device).unwrap();
        assert_eq!(ring.slot(0).unwrap().state(), SlotState::Recording);

        ring.submit(&device, STAGE).unwrap();
        assert_eq!(ring.slot(0).unwrap().state(), SlotState::InFlight);
        assert_eq!(ring.slot(1).unwrap().state(), SlotState::Idle);
        assert_eq!(ring.current_index(), 1);
    }

    #[test]
    fn test_counter_advances_on_submit_only() {
        let mut ring = ring(2);
        let device = FakeDevice::default();

        ring.begin(&device).unwrap();
        assert_eq!(ring.frame(), 0);
        assert_eq!(ring.current_index(), 0);

        ring.submit(&device, STAGE).unwrap();
        assert_eq!(ring.frame(), 1);
    }

    #[test]
    fn test_submit_without_begin_is_rejected() {
        let mut ring = ring(2);
        let device = FakeDevice::default();

        let err = ring.submit(&device, STAGE).unwrap_err();
        assert!(err.to_string().contains("submitted while Idle"));
        assert_eq!(ring.frame(), 0);
        assert!(device.submissions.borrow().is_empty());
    }

    #[test]
    fn test_double_begin_is_rejected_without_waiting() {
        let mut ring = ring(2);
        let device = FakeDevice::default();

        ring.begin(&device).unwrap();
        let err = ring.begin(&device).unwrap_err();

        assert!(err.to_string().contains("already recording"));
        assert_eq!(device.calls.borrow().len(), 2);
    }

    #[test]
    fn test_fence_timeout_is_fatal() {
        let mut ring = FrameRing::new(vec![fake_slot(0), fake_slot(1)], 1_000).unwrap();
        let device = FakeDevice::default();

        run_frame(&mut ring, &device);
        run_frame(&mut ring, &device);

        // Slot 0's previous submission never completes
        device.held.borrow_mut().insert(105);
        let err = ring.begin(&device).unwrap_err();

        assert!(format!("{:#}", err).contains("Timed out after 1000 ns"));
        assert_eq!(ring.slot(0).unwrap().state(), SlotState::InFlight);
        assert_eq!(ring.frame(), 2);
    }

    #[test]
    fn test_empty_or_misnumbered_slots_are_rejected() {
        assert!(FrameRing::new(Vec::new(), u64::MAX).is_err());
        assert!(FrameRing::new(vec![fake_slot(1), fake_slot(0)], u64::MAX).is_err());
    }

    /// Fence whose signal is controlled by the test
    #[derive(Default)]
    struct GatedFence {
        signaled: Mutex<bool>,
        changed: Condvar,
    }

    struct BlockingDevice {
        fence: Arc<GatedFence>,
    }

    impl FrameSync for BlockingDevice {
        fn wait_for_fence(&self, _fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
            let mut signaled = self.fence.signaled.lock();
            while !*signaled {
                self.fence.changed.wait(&mut signaled);
            }
            Ok(())
        }

        fn reset_fence(&self, _fence: vk::Fence) -> Result<()> {
            *self.fence.signaled.lock() = false;
            Ok(())
        }

        fn submit(&self, _submission: &Submission) -> Result<()> {
            Ok(())
        }

        fn wait_idle(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unsignaled_fence_blocks_the_control_thread() {
        let fence = Arc::new(GatedFence::default());
        let device = BlockingDevice { fence: fence.clone() };

        let worker = thread::spawn(move || {
            let mut ring = FrameRing::new(vec![fake_slot(0)], u64::MAX).unwrap();
            ring.begin(&device).unwrap();
            ring.submit(&device, STAGE).unwrap();
            ring.frame()
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_finished(), "begin returned before the fence was signaled");

        *fence.signaled.lock() = true;
        fence.changed.notify_all();

        assert_eq!(worker.join().unwrap(), 1);
    }
}
