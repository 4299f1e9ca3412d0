// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Window surface creation
// - Physical device selection (rated, picked by index)
// - Logical device + graphics queue creation
//
// Nothing here implements Drop. Every handle is registered into the
// deletion queue as it is created and released from there.

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};

use super::{DeletionQueue, Resource};

/// Vulkan device wrapper
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Extension loaders
    pub debug_utils: DebugUtils,
    pub surface_loader: khr::Surface,
    pub swapchain_loader: khr::Swapchain,

    pub surface: vk::SurfaceKHR,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
}

/// What device selection learns about one physical device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    /// Sum of all DEVICE_LOCAL heap sizes in bytes
    pub device_local_memory: u64,
    /// First queue family with graphics support that can present
    pub graphics_queue_family: Option<u32>,
    pub supports_swapchain: bool,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.graphics_queue_family.is_some() && self.supports_swapchain
    }
}

/// Rate a physical device. Higher is better.
///
/// Discrete beats integrated beats CPU beats virtual; GPUs (and unknown
/// types) get one extra point per 8 MB of device-local memory.
pub fn rate_device(device_type: vk::PhysicalDeviceType, device_local_memory: u64) -> i64 {
    let memory_points = (device_local_memory / 8_000_000) as i64;

    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000 + memory_points,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500 + memory_points,
        vk::PhysicalDeviceType::CPU => 250,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        _ => memory_points,
    }
}

/// Index of the best suitable candidate. Ties keep the earliest.
pub fn pick_best_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.is_suitable() {
            continue;
        }

        let rating = rate_device(candidate.device_type, candidate.device_local_memory);
        if best.map_or(true, |(_, best_rating)| rating > best_rating) {
            best = Some((index, rating));
        }
    }

    best.map(|(index, _)| index)
}

impl VulkanDevice {
    /// Create instance, surface and logical device for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers
    /// * `window` - Window the surface is created for
    /// * `deletion` - Receives every created handle, in creation order
    pub fn new<W>(
        app_name: &str,
        enable_validation: bool,
        window: &W,
        deletion: &mut DeletionQueue<Resource>,
    ) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!(target: "application", "Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, app_name, enable_validation, window)?;
        deletion.push(Resource::Instance);
        log::info!(target: "application", "Created instance");

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = DebugUtils::new(&entry, &instance);
        if enable_validation {
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            deletion.push(Resource::DebugMessenger(messenger));
        }

        // Step 4: Create the window surface
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        deletion.push(Resource::Surface(surface));
        log::info!(target: "application", "Created window surface");

        // Step 5: Pick physical device (GPU)
        let (physical_device, graphics_queue_family) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(target: "application", "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy());
        log::info!(target: "application", "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version));

        // Step 6: Create logical device
        let (device, graphics_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            enable_validation,
        )?;
        deletion.push(Resource::Device);
        log::info!(target: "application", "Created logical device");

        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        Ok(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            debug_utils,
            surface_loader,
            swapchain_loader,
            surface,
            graphics_queue,
            graphics_queue_family,
            properties,
        })
    }

    fn create_instance<W: HasRawDisplayHandle>(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        window: &W,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 0, 1))
            .api_version(vk::API_VERSION_1_1);

        // Surface extensions for this platform's display
        let mut extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())
            .context("Failed to query surface extensions")?
            .to_vec();

        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        // Validation layers
        let layer_names = if enable_validation {
            vec![validation_layer_name().as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> Result<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok(messenger)
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let candidates = devices
            .iter()
            .map(|&device| Self::describe_device(instance, surface_loader, surface, device))
            .collect::<Result<Vec<_>>>()?;

        let index = pick_best_device(&candidates)
            .context("Couldn't find a GPU with a graphics queue that can present")?;

        let graphics_queue_family = candidates[index]
            .graphics_queue_family
            .context("Selected GPU lost its graphics queue family")?;

        Ok((devices[index], graphics_queue_family))
    }

    fn describe_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<DeviceCandidate> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let memory = unsafe { instance.get_physical_device_memory_properties(device) };

        let device_local_memory = memory.memory_heaps[..memory.memory_heap_count as usize]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum();

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_queue_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }?;

            if present && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_queue_family = Some(index);
                break;
            }
        }

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?;
        let supports_swapchain = has_extension(&extensions, khr::Swapchain::name());

        Ok(DeviceCandidate {
            device_type: props.device_type,
            device_local_memory,
            graphics_queue_family,
            supports_swapchain,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        enable_validation: bool,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        // Device layers are deprecated but older loaders still read them
        let layer_names = if enable_validation {
            vec![validation_layer_name().as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        Ok((device, graphics_queue))
    }

    /// Minimum offset alignment for uniform buffer bindings
    pub fn min_uniform_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }
}

/// Whether `wanted` is among the extensions a device reports
pub fn has_extension(extensions: &[vk::ExtensionProperties], wanted: &CStr) -> bool {
    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == wanted
    })
}

fn validation_layer_name() -> &'static CStr {
    c"VK_LAYER_KHRONOS_validation"
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!(target: "validation", "{}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!(target: "validation", "{}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!(target: "validation", "{}", message.to_string_lossy());
        }
        _ => {
            log::debug!(target: "validation", "{}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
