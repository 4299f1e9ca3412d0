// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The swapchain and its image views are released through the deletion queue.

use anyhow::{Context, Result};
use ash::vk;

use super::{DeletionQueue, Resource, VulkanDevice};

/// Number of swapchain images to request.
///
/// At least one more than the frames in flight, and one more than the
/// surface minimum if the surface caps it (`max == 0` means no cap).
pub fn choose_image_count(frame_overlap: usize, min_image_count: u32, max_image_count: u32) -> u32 {
    let overlap = u32::try_from(frame_overlap).unwrap_or(u32::MAX);
    let count = overlap.saturating_add(1).max(min_image_count);

    if max_image_count != 0 {
        count.saturating_add(1).min(max_image_count)
    } else {
        count
    }
}

/// Use the surface's extent when it dictates one, otherwise clamp the
/// window size into the supported range
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The requested mode if supported, FIFO otherwise (always available)
pub fn choose_present_mode(
    requested: vk::PresentModeKHR,
    supported: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if supported.contains(&requested) {
        requested
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        device: &VulkanDevice,
        present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
        frame_overlap: usize,
        deletion: &mut DeletionQueue<Resource>,
    ) -> Result<Self> {
        log::info!(target: "application", "Creating swapchain: {}x{}", width, height);

        let surface_loader = &device.surface_loader;

        // Query surface capabilities
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(
                device.physical_device,
                device.surface,
            )
        }
        .context("Failed to query surface capabilities")?;

        // Query supported formats
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(
                device.physical_device,
                device.surface,
            )
        }
        .context("Failed to query surface formats")?;

        // Query supported present modes
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(
                device.physical_device,
                device.surface,
            )
        }
        .context("Failed to query present modes")?;

        let surface_format = choose_surface_format(&formats).context("No suitable surface format")?;

        let present_mode = choose_present_mode(present_mode, &present_modes);
        log::info!(target: "application", "Present mode: {:?}", present_mode);

        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(
            frame_overlap,
            surface_caps.min_image_count,
            surface_caps.max_image_count,
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        deletion.push(Resource::Swapchain(swapchain));

        // Get swapchain images
        let images = unsafe { device.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        log::info!(target: "application", "Created swapchain with {} images", images.len());

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            deletion.push(Resource::ImageView(view));
            image_views.push(view);
        }

        Ok(Self {
            swapchain,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Acquire next image for rendering.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    pub fn acquire_next_image(
        &self,
        device: &VulkanDevice,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)> {
        let result = unsafe {
            device.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                anyhow::bail!("Swapchain out of date")
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                anyhow::bail!("Timed out after {} ns acquiring a swapchain image", timeout)
            }
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        device: &VulkanDevice,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            device
                .swapchain_loader
                .queue_present(device.graphics_queue, &present_info)
        };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}
