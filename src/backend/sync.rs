// Synchronization primitives
//
// image_available: acquire -> submit (GPU-GPU)
// render_finished: submit -> present (GPU-GPU)
// in_flight_fence: submit -> next use of this slot on the CPU

use ash::vk;
use anyhow::{Context, Result};
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the very first wait returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };

        let created = unsafe {
            (|| -> Result<()> {
                sync.image_available = device.device.create_semaphore(&semaphore_info, None)?;
                sync.render_finished = device.device.create_semaphore(&semaphore_info, None)?;
                sync.in_flight_fence = device.device.create_fence(&fence_info, None)?;
                Ok(())
            })()
        };

        if let Err(e) = created {
            sync.destroy(&device.device);
            return Err(e).context("Failed to create synchronization objects");
        }

        Ok(sync)
    }

    /// Destroying null handles is a no-op, so a half-built set is fine here
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
