// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Debug messenger routing validation output into `log`
// - Window surface
// - Physical device selection (suitable first, then prefer discrete GPU)
// - Logical device + graphics/present queue creation

use anyhow::{Context, Result};
use ash::{vk, Entry};
use ash::extensions::{ext::DebugUtils, khr::Surface};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use winit::window::Window;

use super::queue::{QueueFamilies, QueueFamilyIndices};
use super::swapchain::SwapchainSupport;

const VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: Surface,

    // Debug utils (if validation enabled)
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub instance: ash::Instance,
    _entry: Entry,
}

impl VulkanDevice {
    /// Create everything from the Vulkan loader up to the logical device.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `window` - Window the surface is created for
    pub fn new(app_name: &str, enable_validation: bool, window: &Window) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        if enable_validation {
            check_validation_layer_support(&entry)?;
        }

        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        let instance = create_instance(&entry, app_name, enable_validation, display_handle)?;
        // Declared before the guard: `Partial` borrows it until it is dropped
        let surface_loader = Surface::new(&entry, &instance);

        // Everything below must be undone by hand if a later step fails,
        // so build the partial state into a guard that knows how.
        let mut partial = Partial {
            instance: &instance,
            debug_utils: None,
            surface: None,
        };

        if enable_validation {
            partial.debug_utils = Some(setup_debug_messenger(&entry, &instance)?);
        }

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        partial.surface = Some((&surface_loader, surface));

        let (physical_device, queue_families) =
            pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) = create_logical_device(
            &instance,
            physical_device,
            queue_families,
            enable_validation,
        )?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            fixed_cstr(&properties.device_name).to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        let debug_utils = partial.disarm();

        Ok(Arc::new(Self {
            device,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            surface,
            surface_loader,
            debug_utils,
            instance,
            _entry: entry,
        }))
    }

    pub fn query_swapchain_support(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::query(&self.surface_loader, self.physical_device, self.surface)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Reverse creation order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Instance-level objects created before the device exists.
///
/// Dropped on an early return; `disarm` hands the debug messenger over to
/// the finished `VulkanDevice` instead.
struct Partial<'a> {
    instance: &'a ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(&'a Surface, vk::SurfaceKHR)>,
}

impl Partial<'_> {
    fn disarm(mut self) -> Option<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        self.surface = None;
        let debug_utils = self.debug_utils.take();
        std::mem::forget(self);
        debug_utils
    }
}

impl Drop for Partial<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn check_validation_layer_support(entry: &Entry) -> Result<()> {
    let available = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?;

    let missing = missing_names(
        VALIDATION_LAYERS,
        available.iter().map(|layer| fixed_cstr(&layer.layer_name)),
    );

    if !missing.is_empty() {
        anyhow::bail!(
            "validation layers requested, but not available: {:?}",
            missing
        );
    }

    Ok(())
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

fn create_instance(
    entry: &Entry,
    app_name: &str,
    enable_validation: bool,
    display_handle: raw_window_handle::RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name_cstr = CString::new(app_name)?;
    let engine_name = c"No Engine";

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    // Surface extensions for whatever window system we are running on
    let mut extensions = ash_window::enumerate_required_extensions(display_handle)
        .context("Failed to query required surface extensions")?
        .to_vec();

    let layer_names: Vec<*const c_char> = if enable_validation {
        extensions.push(DebugUtils::name().as_ptr());
        VALIDATION_LAYERS.iter().map(|layer| layer.as_ptr()).collect()
    } else {
        Vec::new()
    };

    // Chained so instance creation and destruction get validated too
    let mut instance_debug_info = debug_messenger_info();

    let mut create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    if enable_validation {
        create_info = create_info.push_next(&mut instance_debug_info);
    }

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .context("Failed to create Vulkan instance")?;

    Ok(instance)
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);
    let create_info = debug_messenger_info();

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to set up debug messenger")?;

    Ok((debug_utils, messenger))
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    if devices.is_empty() {
        anyhow::bail!("failed to find GPUs with Vulkan support");
    }

    let mut candidates = Vec::new();
    for device in devices {
        if let Some(families) = suitable_queue_families(instance, surface_loader, surface, device)? {
            let props = unsafe { instance.get_physical_device_properties(device) };
            candidates.push(((device, families), device_type_score(props.device_type)));
        }
    }

    pick_best(candidates).context("failed to find a suitable GPU")
}

/// Queue families of `device` if it can run this renderer, `None` otherwise
fn suitable_queue_families(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Result<Option<QueueFamilies>> {
    let props = unsafe { instance.get_physical_device_properties(device) };
    let name = fixed_cstr(&props.device_name).to_string_lossy().into_owned();

    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let indices = QueueFamilyIndices::find(&queue_families, |index| {
        unsafe { surface_loader.get_physical_device_surface_support(device, index, surface) }
            .context("Failed to query surface support")
    })?;

    let Some(families) = indices.resolve() else {
        log::debug!("Skipping {}: missing graphics or present queue", name);
        return Ok(None);
    };

    let available = unsafe { instance.enumerate_device_extension_properties(device) }
        .context("Failed to enumerate device extensions")?;
    let missing = missing_names(
        &required_device_extensions(),
        available.iter().map(|ext| fixed_cstr(&ext.extension_name)),
    );
    if !missing.is_empty() {
        log::debug!("Skipping {}: missing extensions {:?}", name, missing);
        return Ok(None);
    }

    // Only meaningful once the swapchain extension is known to exist
    let support = SwapchainSupport::query(surface_loader, device, surface)?;
    if !support.is_adequate() {
        log::debug!("Skipping {}: no surface formats or present modes", name);
        return Ok(None);
    }

    Ok(Some(families))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilies,
    enable_validation: bool,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<_> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    // Device layers are deprecated, older loaders still read them
    let layer_names: Vec<*const c_char> = if enable_validation {
        VALIDATION_LAYERS.iter().map(|layer| layer.as_ptr()).collect()
    } else {
        Vec::new()
    };

    let features = vk::PhysicalDeviceFeatures::default();

    #[allow(deprecated)]
    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .context("Failed to create logical device")?;

    let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

    Ok((device, graphics_queue, present_queue))
}

/// Prefer discrete GPUs, then integrated ones
fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        _ => 1,
    }
}

/// Highest score wins; ties keep the earliest candidate
fn pick_best<T>(candidates: impl IntoIterator<Item = (T, u32)>) -> Option<T> {
    let mut best: Option<(T, u32)> = None;
    for (candidate, score) in candidates {
        if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Names from `required` that do not appear in `available`
fn missing_names<'r, 'a>(
    required: &[&'r CStr],
    available: impl IntoIterator<Item = &'a CStr>,
) -> Vec<&'r CStr> {
    let available: Vec<&CStr> = available.into_iter().collect();
    required
        .iter()
        .copied()
        .filter(|name| !available.iter().any(|have| have == name))
        .collect()
}

/// View a fixed-size, NUL-padded Vulkan name array as a `CStr`
fn fixed_cstr(raw: &[c_char]) -> &CStr {
    // c_char is i8 or u8 depending on target; same size either way
    let bytes = unsafe { std::slice::from_raw_parts(raw.as_ptr().cast::<u8>(), raw.len()) };
    CStr::from_bytes_until_nul(bytes).unwrap_or(c"")
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[Vulkan] {}", message),
        _ => log::trace!("[Vulkan] {}", message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_array<const N: usize>(name: &CStr) -> [c_char; N] {
        let mut raw = [0 as c_char; N];
        for (dst, &src) in raw.iter_mut().zip(name.to_bytes()) {
            *dst = src as c_char;
        }
        raw
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        vk::ExtensionProperties {
            extension_name: name_array(name),
            spec_version: 1,
        }
    }

    #[test]
    fn fixed_cstr_stops_at_nul() {
        let raw: [c_char; 8] = name_array(c"abc");
        assert_eq!(fixed_cstr(&raw), c"abc");
    }

    #[test]
    fn fixed_cstr_without_nul_is_empty() {
        let raw = [b'x' as c_char; 4];
        assert_eq!(fixed_cstr(&raw), c"");
    }

    #[test]
    fn swapchain_extension_is_found() {
        let available = [
            extension(c"VK_KHR_maintenance1"),
            extension(c"VK_KHR_swapchain"),
        ];
        let missing = missing_names(
            &required_device_extensions(),
            available.iter().map(|ext| fixed_cstr(&ext.extension_name)),
        );
        assert!(missing.is_empty());
    }

    #[test]
    fn missing_extension_is_reported() {
        let available = [extension(c"VK_KHR_maintenance1")];
        let missing = missing_names(
            &required_device_extensions(),
            available.iter().map(|ext| fixed_cstr(&ext.extension_name)),
        );
        assert_eq!(missing, vec![c"VK_KHR_swapchain"]);
    }

    #[test]
    fn validation_layer_lookup() {
        let mut layer = vk::LayerProperties::default();
        layer.layer_name = name_array(c"VK_LAYER_KHRONOS_validation");
        let layers = [layer];

        let missing = missing_names(
            VALIDATION_LAYERS,
            layers.iter().map(|l| fixed_cstr(&l.layer_name)),
        );
        assert!(missing.is_empty());

        let missing = missing_names(VALIDATION_LAYERS, std::iter::empty());
        assert_eq!(missing, VALIDATION_LAYERS.to_vec());
    }

    #[test]
    fn discrete_gpu_beats_integrated() {
        let candidates = [
            ("cpu", device_type_score(vk::PhysicalDeviceType::CPU)),
            ("igpu", device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)),
            ("dgpu", device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)),
        ];
        assert_eq!(pick_best(candidates), Some("dgpu"));
    }

    #[test]
    fn ties_keep_first_enumerated() {
        let candidates = [("first", 100), ("second", 100)];
        assert_eq!(pick_best(candidates), Some("first"));
    }

    #[test]
    fn no_candidates_no_device() {
        assert_eq!(pick_best(Vec::<(u8, u32)>::new()), None);
    }
}
