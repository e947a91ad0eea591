// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The graphics-API entry points this crate consumes.
//!
//! Everything above this module talks to the GPU through the [`DeviceBackend`] trait. Two
//! implementations are provided:
//!
//! - [`VulkanBackend`](vulkan::VulkanBackend) forwards to a real Vulkan device through `ash`.
//! - [`NullBackend`](null::NullBackend) runs on the host only. It hands out fabricated handles,
//!   records what it was asked to do and lets the caller decide when submitted work completes.
//!
//! Window, surface, instance and device creation are not part of this trait: the application
//! creates those and hands the resulting device to a backend.

use crate::{
    command_buffer::{CommandBufferBeginInfo, CommandBufferLevel, SubmitInfo},
    descriptor_set::{DescriptorPoolSize, UpdateTemplateInfo},
    queue::PresentStatus,
    VulkanError,
};
use ash::vk;
use std::{fmt::Debug, time::Duration};

pub mod null;
pub mod vulkan;

/// Properties of the physical device behind a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceProperties {
    /// The vendor id reported by the driver.
    pub vendor_id: u32,

    /// The device id reported by the driver.
    pub device_id: u32,

    /// The UUID that identifies which pipeline cache blobs are compatible with the device.
    pub pipeline_cache_uuid: [u8; vk::UUID_SIZE],

    /// Whether `VK_KHR_push_descriptor` is enabled on the device.
    pub push_descriptor: bool,
}

/// The set of graphics-API operations used by this crate.
///
/// All handles passed to and returned from these functions are raw Vulkan handles. Handles are
/// never dereferenced by the callers, so a backend that doesn't talk to a driver is free to make
/// them up.
///
/// # Safety
///
/// - Implementations must behave like the Vulkan commands they are named after: handles returned
///   by a `create_*`/`allocate_*` function stay valid until the matching `destroy_*`/`free_*`
///   call, and a timeline semaphore never reports a value that the device has not reached.
/// - `wait_*` functions must not return `Ok(true)` before the awaited condition holds.
///
/// The functions themselves are unsafe because the caller is responsible for the external
/// synchronization rules of Vulkan: a command pool, and every command buffer allocated from it,
/// must only be used by one thread at a time, a queue must only be submitted to by one thread at
/// a time, and no object may be destroyed while the device still uses it.
pub unsafe trait DeviceBackend: Debug + Send + Sync {
    /// Returns the properties of the physical device.
    fn properties(&self) -> &DeviceProperties;

    /// Retrieves a queue of the device.
    unsafe fn get_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue;

    unsafe fn create_command_pool(
        &self,
        queue_family_index: u32,
    ) -> Result<vk::CommandPool, VulkanError>;

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, VulkanError>;

    unsafe fn free_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    );

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &CommandBufferBeginInfo,
    ) -> Result<(), VulkanError>;

    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer)
        -> Result<(), VulkanError>;

    /// Resets a command buffer, returning the memory it holds to its pool.
    unsafe fn reset_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError>;

    /// Records the execution of `secondaries` into `primary`.
    unsafe fn cmd_execute_commands(
        &self,
        primary: vk::CommandBuffer,
        secondaries: &[vk::CommandBuffer],
    );

    unsafe fn create_timeline_semaphore(
        &self,
        initial_value: u64,
    ) -> Result<vk::Semaphore, VulkanError>;

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Returns the current counter value of a timeline semaphore.
    unsafe fn semaphore_counter_value(&self, semaphore: vk::Semaphore)
        -> Result<u64, VulkanError>;

    /// Blocks until the timeline semaphore reaches `value`. Returns `Ok(false)` if `timeout`
    /// elapsed first.
    unsafe fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, VulkanError>;

    unsafe fn create_fence(&self) -> Result<vk::Fence, VulkanError>;

    unsafe fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until the fence is signaled. Returns `Ok(false)` if `timeout` elapsed first.
    unsafe fn wait_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<bool, VulkanError>;

    /// Returns whether the fence is signaled, without blocking.
    unsafe fn fence_status(&self, fence: vk::Fence) -> Result<bool, VulkanError>;

    /// Submits work to a queue. `fence`, if not null, is signaled once the work completes.
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submit_info: &SubmitInfo,
        fence: vk::Fence,
    ) -> Result<(), VulkanError>;

    /// Queues an image for presentation. An out-of-date swapchain is reported as
    /// [`PresentStatus::OutOfDate`], not as an error.
    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    ) -> Result<PresentStatus, VulkanError>;

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), VulkanError>;

    unsafe fn device_wait_idle(&self) -> Result<(), VulkanError>;

    unsafe fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, VulkanError>;

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Returns every set allocated from `pool` to it.
    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), VulkanError>;

    unsafe fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, VulkanError>;

    unsafe fn create_update_template(
        &self,
        info: &UpdateTemplateInfo<'_>,
    ) -> Result<vk::DescriptorUpdateTemplate, VulkanError>;

    unsafe fn destroy_update_template(&self, template: vk::DescriptorUpdateTemplate);

    /// Writes every descriptor described by `template` into `set`, reading from `data`.
    unsafe fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        template: vk::DescriptorUpdateTemplate,
        data: &[u8],
    );

    unsafe fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    );

    /// Records the descriptors described by `template` directly into the command buffer.
    unsafe fn cmd_push_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        template: vk::DescriptorUpdateTemplate,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        data: &[u8],
    );

    unsafe fn create_pipeline_cache(
        &self,
        initial_data: &[u8],
    ) -> Result<vk::PipelineCache, VulkanError>;

    unsafe fn pipeline_cache_data(&self, cache: vk::PipelineCache)
        -> Result<Vec<u8>, VulkanError>;

    unsafe fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
}
