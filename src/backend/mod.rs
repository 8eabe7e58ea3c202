// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash; every owning type destroys its handles
// on Drop, in reverse creation order.

pub mod command;
pub mod device;
pub mod pipeline;
pub mod queue;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
