// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Nothing here owns its handles: every object is
// pushed into a `DeletionQueue<Resource>` when created and released from it
// in reverse order at shutdown.

pub mod buffer;
pub mod deletion;
pub mod descriptor;
pub mod device;
pub mod frame;
pub mod pipeline;
pub mod resource;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use deletion::DeletionQueue;
pub use device::VulkanDevice;
pub use frame::{FrameRing, FrameSlot};
pub use resource::{Resource, VulkanReleaser};
pub use swapchain::Swapchain;
