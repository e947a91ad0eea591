// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{DeviceBackend, DeviceProperties};
use crate::{
    command_buffer::{CommandBufferBeginInfo, CommandBufferLevel, SubmitInfo},
    descriptor_set::{DescriptorPoolSize, DescriptorType, UpdateTemplateInfo},
    queue::PresentStatus,
    VulkanError,
};
use ash::vk;
use smallvec::SmallVec;
use std::{ffi::CStr, fmt, time::Duration};

/// A [`DeviceBackend`] that forwards to a Vulkan device.
///
/// The device must support Vulkan 1.2, or 1.1 with `VK_KHR_timeline_semaphore`, and the
/// `timelineSemaphore` feature must be enabled. `VK_KHR_swapchain` is needed to present and
/// `VK_KHR_push_descriptor` is used when enabled.
///
/// The backend owns the device and destroys it when dropped. The instance stays owned by the
/// caller and must outlive the backend.
pub struct VulkanBackend {
    device: ash::Device,
    swapchain_fns: Option<ash::khr::swapchain::Device>,
    push_descriptor_fns: Option<ash::khr::push_descriptor::Device>,
    properties: DeviceProperties,
}

impl VulkanBackend {
    /// Creates a new `VulkanBackend` from a device created by the application.
    ///
    /// `enabled_extensions` are the device extensions that `device` was created with.
    ///
    /// # Safety
    ///
    /// - `device` must have been created from `physical_device`, which must belong to
    ///   `instance`.
    /// - `enabled_extensions` must be the extensions `device` was created with.
    /// - The `timelineSemaphore` feature must be enabled on `device`.
    /// - `instance` must outlive the returned backend.
    pub unsafe fn from_raw(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        enabled_extensions: &[&CStr],
    ) -> Self {
        let raw_properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let is_enabled = |name: &CStr| enabled_extensions.contains(&name);

        let swapchain_fns = is_enabled(ash::khr::swapchain::NAME)
            .then(|| ash::khr::swapchain::Device::new(instance, &device));
        let push_descriptor_fns = is_enabled(ash::khr::push_descriptor::NAME)
            .then(|| ash::khr::push_descriptor::Device::new(instance, &device));

        let properties = DeviceProperties {
            vendor_id: raw_properties.vendor_id,
            device_id: raw_properties.device_id,
            pipeline_cache_uuid: raw_properties.pipeline_cache_uuid,
            push_descriptor: push_descriptor_fns.is_some(),
        };

        VulkanBackend {
            device,
            swapchain_fns,
            push_descriptor_fns,
            properties,
        }
    }

    /// Returns the device functions, to record commands with.
    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) };
    }
}

impl fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.device.handle())
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

unsafe impl DeviceBackend for VulkanBackend {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    unsafe fn get_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(queue_family_index, queue_index) }
    }

    unsafe fn create_command_pool(
        &self,
        queue_family_index: u32,
    ) -> Result<vk::CommandPool, VulkanError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        unsafe { self.device.create_command_pool(&create_info, None) }.map_err(VulkanError::from)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, VulkanError> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(level.into())
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&allocate_info) }.map_err(VulkanError::from)
    }

    unsafe fn free_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        unsafe { self.device.free_command_buffers(pool, command_buffers) };
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &CommandBufferBeginInfo,
    ) -> Result<(), VulkanError> {
        let mut flags = vk::CommandBufferUsageFlags::empty();

        if begin_info.one_time_submit {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }

        let mut inheritance_info = vk::CommandBufferInheritanceInfo::default();

        if let Some(inheritance) = &begin_info.inheritance {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
            inheritance_info = inheritance_info
                .render_pass(inheritance.render_pass)
                .subpass(inheritance.subpass)
                .framebuffer(inheritance.framebuffer);
        }

        let begin_info_vk = vk::CommandBufferBeginInfo::default()
            .flags(flags)
            .inheritance_info(&inheritance_info);

        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info_vk) }
            .map_err(VulkanError::from)
    }

    unsafe fn end_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        unsafe { self.device.end_command_buffer(command_buffer) }.map_err(VulkanError::from)
    }

    unsafe fn reset_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        unsafe {
            self.device.reset_command_buffer(
                command_buffer,
                vk::CommandBufferResetFlags::RELEASE_RESOURCES,
            )
        }
        .map_err(VulkanError::from)
    }

    unsafe fn cmd_execute_commands(
        &self,
        primary: vk::CommandBuffer,
        secondaries: &[vk::CommandBuffer],
    ) {
        unsafe { self.device.cmd_execute_commands(primary, secondaries) };
    }

    unsafe fn create_timeline_semaphore(
        &self,
        initial_value: u64,
    ) -> Result<vk::Semaphore, VulkanError> {
        let mut type_create_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_create_info);

        unsafe { self.device.create_semaphore(&create_info, None) }.map_err(VulkanError::from)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    unsafe fn semaphore_counter_value(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<u64, VulkanError> {
        unsafe { self.device.get_semaphore_counter_value(semaphore) }.map_err(VulkanError::from)
    }

    unsafe fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, VulkanError> {
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        match unsafe { self.device.wait_semaphores(&wait_info, timeout_nanos(timeout)) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    unsafe fn create_fence(&self) -> Result<vk::Fence, VulkanError> {
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }
        .map_err(VulkanError::from)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    unsafe fn wait_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<bool, VulkanError> {
        match unsafe {
            self.device
                .wait_for_fences(&[fence], true, timeout_nanos(timeout))
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    unsafe fn fence_status(&self, fence: vk::Fence) -> Result<bool, VulkanError> {
        unsafe { self.device.get_fence_status(fence) }.map_err(VulkanError::from)
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submit_info: &SubmitInfo,
        fence: vk::Fence,
    ) -> Result<(), VulkanError> {
        let (wait_semaphores, (wait_values, wait_stages)): (
            SmallVec<[_; 4]>,
            (SmallVec<[_; 4]>, SmallVec<[_; 4]>),
        ) = submit_info
            .wait_semaphores
            .iter()
            .map(|wait| (wait.semaphore, (wait.value, wait.stages)))
            .unzip();
        let (signal_semaphores, signal_values): (SmallVec<[_; 4]>, SmallVec<[_; 4]>) = submit_info
            .signal_semaphores
            .iter()
            .map(|signal| (signal.semaphore, signal.value))
            .unzip();

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info_vk = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&submit_info.command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .queue_submit(queue, &[submit_info_vk], fence)
        }
        .map_err(VulkanError::from)
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    ) -> Result<PresentStatus, VulkanError> {
        let swapchain_fns = self
            .swapchain_fns
            .as_ref()
            .ok_or(VulkanError::ExtensionNotPresent)?;

        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { swapchain_fns.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), VulkanError> {
        unsafe { self.device.queue_wait_idle(queue) }.map_err(VulkanError::from)
    }

    unsafe fn device_wait_idle(&self) -> Result<(), VulkanError> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::from)
    }

    unsafe fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, VulkanError> {
        let pool_sizes_vk: SmallVec<[_; 8]> = pool_sizes
            .iter()
            .map(|pool_size| vk::DescriptorPoolSize {
                ty: pool_size.descriptor_type.into(),
                descriptor_count: pool_size.descriptor_count,
            })
            .collect();
        let inline_uniform_block_bindings = pool_sizes
            .iter()
            .filter(|pool_size| pool_size.descriptor_type == DescriptorType::InlineUniformBlock)
            .count() as u32;

        let mut inline_create_info = vk::DescriptorPoolInlineUniformBlockCreateInfo::default()
            .max_inline_uniform_block_bindings(inline_uniform_block_bindings * max_sets);
        let mut create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes_vk);

        if inline_uniform_block_bindings != 0 {
            create_info = create_info.push_next(&mut inline_create_info);
        }

        unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .map_err(VulkanError::from)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), VulkanError> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(VulkanError::from)
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, VulkanError> {
        let set_layouts: SmallVec<[_; 32]> = (0..count).map(|_| layout).collect();
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);

        unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .map_err(VulkanError::from)
    }

    unsafe fn create_update_template(
        &self,
        info: &UpdateTemplateInfo<'_>,
    ) -> Result<vk::DescriptorUpdateTemplate, VulkanError> {
        let entries: SmallVec<[_; 8]> = info
            .entries
            .iter()
            .map(|entry| vk::DescriptorUpdateTemplateEntry {
                dst_binding: entry.binding,
                dst_array_element: entry.first_array_element,
                descriptor_count: entry.descriptor_count,
                descriptor_type: entry.descriptor_type.into(),
                offset: entry.offset,
                stride: entry.stride,
            })
            .collect();

        let mut create_info = vk::DescriptorUpdateTemplateCreateInfo::default()
            .descriptor_update_entries(&entries)
            .template_type(vk::DescriptorUpdateTemplateType::DESCRIPTOR_SET)
            .descriptor_set_layout(info.set_layout);

        if let Some(push) = &info.push {
            create_info = create_info
                .template_type(vk::DescriptorUpdateTemplateType::PUSH_DESCRIPTORS_KHR)
                .pipeline_bind_point(push.bind_point)
                .pipeline_layout(push.pipeline_layout)
                .set(push.set_index);
        }

        unsafe {
            self.device
                .create_descriptor_update_template(&create_info, None)
        }
        .map_err(VulkanError::from)
    }

    unsafe fn destroy_update_template(&self, template: vk::DescriptorUpdateTemplate) {
        unsafe { self.device.destroy_descriptor_update_template(template, None) };
    }

    unsafe fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        template: vk::DescriptorUpdateTemplate,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .update_descriptor_set_with_template(set, template, data.as_ptr().cast())
        };
    }

    unsafe fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                bind_point,
                pipeline_layout,
                set_index,
                &[set],
                &[],
            )
        };
    }

    unsafe fn cmd_push_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        template: vk::DescriptorUpdateTemplate,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        data: &[u8],
    ) {
        let push_descriptor_fns = self
            .push_descriptor_fns
            .as_ref()
            .expect("`VK_KHR_push_descriptor` is not enabled on the device");

        unsafe {
            push_descriptor_fns.cmd_push_descriptor_set_with_template(
                command_buffer,
                template,
                pipeline_layout,
                set_index,
                data.as_ptr().cast(),
            )
        };
    }

    unsafe fn create_pipeline_cache(
        &self,
        initial_data: &[u8],
    ) -> Result<vk::PipelineCache, VulkanError> {
        let create_info = vk::PipelineCacheCreateInfo::default().initial_data(initial_data);

        unsafe { self.device.create_pipeline_cache(&create_info, None) }
            .map_err(VulkanError::from)
    }

    unsafe fn pipeline_cache_data(
        &self,
        cache: vk::PipelineCache,
    ) -> Result<Vec<u8>, VulkanError> {
        unsafe { self.device.get_pipeline_cache_data(cache) }.map_err(VulkanError::from)
    }

    unsafe fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) };
    }
}
