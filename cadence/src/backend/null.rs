// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A device that only exists on the host.
//!
//! The [`NullBackend`] implements [`DeviceBackend`] without a driver. Handles are made up, and
//! submitted work does not execute: it stays *in flight* until the owner of the backend
//! completes it with [`complete_next`] or [`complete_all`], or until the host blocks on it.
//! Blocking waits complete in-flight submissions in order until the awaited condition holds, so
//! a wait only times out if nothing that was submitted can satisfy it.
//!
//! The backend checks the usage rules the rest of the crate relies on, and panics when they are
//! broken: for example resetting a command buffer the GPU still executes, or updating a
//! descriptor set that a submission in flight still uses.
//!
//! [`complete_next`]: NullBackend::complete_next
//! [`complete_all`]: NullBackend::complete_all

use super::{DeviceBackend, DeviceProperties};
use crate::{
    command_buffer::{CommandBufferBeginInfo, CommandBufferLevel, SubmitInfo},
    descriptor_set::{DescriptorPoolSize, DescriptorUpdateEntry, UpdateTemplateInfo},
    queue::PresentStatus,
    VulkanError,
};
use ash::vk::{self, Handle};
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// A simulated device, see the [module-level documentation](self).
#[derive(Debug)]
pub struct NullBackend {
    properties: DeviceProperties,
    next_handle: AtomicU64,
    state: Mutex<NullState>,
}

#[derive(Debug, Default)]
struct NullState {
    queues: HashMap<(u32, u32), vk::Queue>,
    command_pools: HashMap<vk::CommandPool, u32>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferRecord>,
    semaphores: HashMap<vk::Semaphore, u64>,
    fences: HashMap<vk::Fence, bool>,
    in_flight: VecDeque<InFlightSubmission>,
    submissions: Vec<SubmissionRecord>,
    presents: Vec<PresentRecord>,
    present_results: VecDeque<Result<PresentStatus, VulkanError>>,
    fence_errors: VecDeque<VulkanError>,
    descriptor_pools: HashMap<vk::DescriptorPool, DescriptorPoolRecord>,
    descriptor_sets: HashMap<vk::DescriptorSet, DescriptorSetRecord>,
    update_templates: HashMap<vk::DescriptorUpdateTemplate, Vec<DescriptorUpdateEntry>>,
    descriptor_updates: Vec<DescriptorUpdateRecord>,
    pipeline_caches: HashMap<vk::PipelineCache, Vec<u8>>,
    auto_complete: bool,
}

#[derive(Debug)]
struct CommandBufferRecord {
    pool: vk::CommandPool,
    level: CommandBufferLevel,
    state: CommandBufferState,
    in_flight: u32,
    executed: Vec<vk::CommandBuffer>,
    bound_sets: Vec<(u32, vk::DescriptorSet)>,
    pushed_sets: Vec<(u32, Vec<u8>)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandBufferState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
struct InFlightSubmission {
    queue: vk::Queue,
    command_buffers: Vec<vk::CommandBuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    signals: Vec<(vk::Semaphore, u64)>,
    fence: vk::Fence,
}

/// A submission as it was received by a [`NullBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub queue: vk::Queue,
    pub info: SubmitInfo,
    pub fence: vk::Fence,
}

/// A present operation as it was received by a [`NullBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    pub queue: vk::Queue,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
}

/// A descriptor set update as it was received by a [`NullBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorUpdateRecord {
    pub set: vk::DescriptorSet,
    pub entries: Vec<DescriptorUpdateEntry>,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct DescriptorPoolRecord {
    max_sets: u32,
    allocated: Vec<vk::DescriptorSet>,
    resets: u32,
}

#[derive(Debug)]
struct DescriptorSetRecord {
    pool: vk::DescriptorPool,
    in_flight: u32,
}

impl NullBackend {
    /// Creates a new `NullBackend` that supports push descriptors.
    pub fn new() -> Self {
        Self::with_properties(DeviceProperties {
            vendor_id: 0x10005,
            device_id: 0,
            pipeline_cache_uuid: *b"cadence-null-dev",
            push_descriptor: true,
        })
    }

    pub fn with_properties(properties: DeviceProperties) -> Self {
        NullBackend {
            properties,
            next_handle: AtomicU64::new(1),
            state: Mutex::new(NullState::default()),
        }
    }

    /// Sets whether submissions complete as soon as they are submitted. This is off by default.
    pub fn set_auto_complete(&self, auto_complete: bool) {
        let mut state = self.state.lock();
        state.auto_complete = auto_complete;

        if auto_complete {
            while state.complete_next() {}
        }
    }

    /// Completes the oldest submission in flight. Returns `false` if there was none.
    pub fn complete_next(&self) -> bool {
        self.state.lock().complete_next()
    }

    /// Completes every submission in flight.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        while state.complete_next() {}
    }

    /// Returns the number of submissions in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Sets a timeline semaphore to `value` as if the GPU had signaled it.
    ///
    /// # Panics
    ///
    /// - Panics if `value` is smaller than the current value of the semaphore.
    pub fn signal_semaphore(&self, semaphore: vk::Semaphore, value: u64) {
        let mut state = self.state.lock();
        let current = state
            .semaphores
            .get_mut(&semaphore)
            .expect("the semaphore was not created by this backend");
        assert!(
            value >= *current,
            "timeline semaphore values must not decrease",
        );
        *current = value;
    }

    /// Returns every submission received so far.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    /// Returns every present operation received so far.
    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.lock().presents.clone()
    }

    /// Makes the next present operation return `result` instead of
    /// [`PresentStatus::Optimal`]. Several results are returned in the order they were queued.
    pub fn queue_present_result(&self, result: Result<PresentStatus, VulkanError>) {
        self.state.lock().present_results.push_back(result);
    }

    /// Makes the next fence creation fail with `err`.
    pub fn fail_fence_creation(&self, err: VulkanError) {
        self.state.lock().fence_errors.push_back(err);
    }

    /// Returns every descriptor set update performed so far.
    pub fn descriptor_updates(&self) -> Vec<DescriptorUpdateRecord> {
        self.state.lock().descriptor_updates.clone()
    }

    /// Returns the descriptor sets bound into a command buffer since it was last begun, together
    /// with their set numbers.
    pub fn bound_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Vec<(u32, vk::DescriptorSet)> {
        self.state.lock().command_buffer(command_buffer).bound_sets.clone()
    }

    /// Returns the data pushed into a command buffer since it was last begun, together with the
    /// set numbers.
    pub fn pushed_descriptor_sets(&self, command_buffer: vk::CommandBuffer) -> Vec<(u32, Vec<u8>)> {
        self.state.lock().command_buffer(command_buffer).pushed_sets.clone()
    }

    /// Returns the secondary command buffers recorded into a primary one since it was last
    /// begun.
    pub fn executed_command_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Vec<vk::CommandBuffer> {
        self.state.lock().command_buffer(command_buffer).executed.clone()
    }

    pub fn is_recording(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.state.lock().command_buffer(command_buffer).state == CommandBufferState::Recording
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state.lock().command_buffers.len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state.lock().semaphores.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    pub fn live_descriptor_pools(&self) -> usize {
        self.state.lock().descriptor_pools.len()
    }

    pub fn live_update_templates(&self) -> usize {
        self.state.lock().update_templates.len()
    }

    /// Returns how many times a descriptor pool has been reset.
    pub fn descriptor_pool_resets(&self, pool: vk::DescriptorPool) -> u32 {
        self.state
            .lock()
            .descriptor_pools
            .get(&pool)
            .map_or(0, |record| record.resets)
    }

    /// Returns the pool a descriptor set was allocated from.
    pub fn descriptor_set_pool(&self, set: vk::DescriptorSet) -> Option<vk::DescriptorPool> {
        self.state
            .lock()
            .descriptor_sets
            .get(&set)
            .map(|record| record.pool)
    }

    fn new_handle<T: Handle>(&self) -> T {
        T::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullState {
    fn command_buffer(&self, command_buffer: vk::CommandBuffer) -> &CommandBufferRecord {
        self.command_buffers
            .get(&command_buffer)
            .expect("the command buffer was not allocated by this backend")
    }

    fn command_buffer_mut(&mut self, command_buffer: vk::CommandBuffer) -> &mut CommandBufferRecord {
        self.command_buffers
            .get_mut(&command_buffer)
            .expect("the command buffer was not allocated by this backend")
    }

    fn complete_next(&mut self) -> bool {
        let Some(submission) = self.in_flight.pop_front() else {
            return false;
        };

        for command_buffer in submission.command_buffers {
            if let Some(record) = self.command_buffers.get_mut(&command_buffer) {
                record.in_flight -= 1;
            }
        }

        for set in submission.descriptor_sets {
            if let Some(record) = self.descriptor_sets.get_mut(&set) {
                record.in_flight -= 1;
            }
        }

        for (semaphore, value) in submission.signals {
            if let Some(current) = self.semaphores.get_mut(&semaphore) {
                *current = (*current).max(value);
            }
        }

        if let Some(signaled) = self.fences.get_mut(&submission.fence) {
            *signaled = true;
        }

        true
    }

    fn complete_until(&mut self, mut condition: impl FnMut(&Self) -> bool) -> bool {
        loop {
            if condition(self) {
                return true;
            }

            if !self.complete_next() {
                return false;
            }
        }
    }

    fn check_not_in_flight(&self, command_buffer: vk::CommandBuffer, action: &str) {
        assert_eq!(
            self.command_buffer(command_buffer).in_flight,
            0,
            "tried to {action} a command buffer that the device is still executing",
        );
    }
}

unsafe impl DeviceBackend for NullBackend {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    unsafe fn get_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        let mut state = self.state.lock();

        *state
            .queues
            .entry((queue_family_index, queue_index))
            .or_insert_with(|| self.new_handle())
    }

    unsafe fn create_command_pool(
        &self,
        queue_family_index: u32,
    ) -> Result<vk::CommandPool, VulkanError> {
        let handle = self.new_handle();
        self.state
            .lock()
            .command_pools
            .insert(handle, queue_family_index);

        Ok(handle)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        assert!(
            state.command_pools.remove(&pool).is_some(),
            "the command pool was not created by this backend",
        );

        let command_buffers: Vec<_> = state
            .command_buffers
            .iter()
            .filter(|(_, record)| record.pool == pool)
            .map(|(&command_buffer, _)| command_buffer)
            .collect();

        for command_buffer in command_buffers {
            state.check_not_in_flight(command_buffer, "destroy the pool of");
            state.command_buffers.remove(&command_buffer);
        }
    }

    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, VulkanError> {
        let mut state = self.state.lock();
        assert!(
            state.command_pools.contains_key(&pool),
            "the command pool was not created by this backend",
        );

        let command_buffers: Vec<vk::CommandBuffer> =
            (0..count).map(|_| self.new_handle()).collect();

        for &command_buffer in &command_buffers {
            state.command_buffers.insert(
                command_buffer,
                CommandBufferRecord {
                    pool,
                    level,
                    state: CommandBufferState::Initial,
                    in_flight: 0,
                    executed: Vec::new(),
                    bound_sets: Vec::new(),
                    pushed_sets: Vec::new(),
                },
            );
        }

        Ok(command_buffers)
    }

    unsafe fn free_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        let mut state = self.state.lock();

        for &command_buffer in command_buffers {
            state.check_not_in_flight(command_buffer, "free");
            assert_eq!(state.command_buffer(command_buffer).pool, pool);
            state.command_buffers.remove(&command_buffer);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &CommandBufferBeginInfo,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        state.check_not_in_flight(command_buffer, "begin");
        let record = state.command_buffer_mut(command_buffer);

        assert_ne!(
            record.state,
            CommandBufferState::Recording,
            "tried to begin a command buffer that is already recording",
        );
        assert!(
            record.level == CommandBufferLevel::Secondary || begin_info.inheritance.is_none(),
            "primary command buffers can't inherit a render pass",
        );

        record.state = CommandBufferState::Recording;
        record.executed.clear();
        record.bound_sets.clear();
        record.pushed_sets.clear();

        Ok(())
    }

    unsafe fn end_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        let record = state.command_buffer_mut(command_buffer);

        assert_eq!(
            record.state,
            CommandBufferState::Recording,
            "tried to end a command buffer that is not recording",
        );

        record.state = CommandBufferState::Executable;

        Ok(())
    }

    unsafe fn reset_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        state.check_not_in_flight(command_buffer, "reset");
        let record = state.command_buffer_mut(command_buffer);

        record.state = CommandBufferState::Initial;
        record.executed.clear();
        record.bound_sets.clear();
        record.pushed_sets.clear();

        Ok(())
    }

    unsafe fn cmd_execute_commands(
        &self,
        primary: vk::CommandBuffer,
        secondaries: &[vk::CommandBuffer],
    ) {
        let mut state = self.state.lock();

        for &secondary in secondaries {
            let record = state.command_buffer(secondary);
            assert_eq!(record.level, CommandBufferLevel::Secondary);
            assert_eq!(
                record.state,
                CommandBufferState::Executable,
                "tried to execute a secondary command buffer that is not executable",
            );
        }

        let record = state.command_buffer_mut(primary);
        assert_eq!(record.level, CommandBufferLevel::Primary);
        assert_eq!(record.state, CommandBufferState::Recording);
        record.executed.extend_from_slice(secondaries);
    }

    unsafe fn create_timeline_semaphore(
        &self,
        initial_value: u64,
    ) -> Result<vk::Semaphore, VulkanError> {
        let handle = self.new_handle();
        self.state.lock().semaphores.insert(handle, initial_value);

        Ok(handle)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    unsafe fn semaphore_counter_value(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<u64, VulkanError> {
        self.state
            .lock()
            .semaphores
            .get(&semaphore)
            .copied()
            .ok_or(VulkanError::Unknown)
    }

    unsafe fn wait_semaphore(
        &self,
        semaphore: vk::Semaphore,
        value: u64,
        _timeout: Duration,
    ) -> Result<bool, VulkanError> {
        let mut state = self.state.lock();

        if !state.semaphores.contains_key(&semaphore) {
            return Err(VulkanError::Unknown);
        }

        Ok(state.complete_until(|state| state.semaphores[&semaphore] >= value))
    }

    unsafe fn create_fence(&self) -> Result<vk::Fence, VulkanError> {
        let mut state = self.state.lock();

        if let Some(err) = state.fence_errors.pop_front() {
            return Err(err);
        }

        let handle = self.new_handle();
        state.fences.insert(handle, false);

        Ok(handle)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        assert!(
            !state.in_flight.iter().any(|submission| submission.fence == fence),
            "tried to destroy a fence that a submission in flight will signal",
        );
        state.fences.remove(&fence);
    }

    unsafe fn wait_fence(&self, fence: vk::Fence, _timeout: Duration) -> Result<bool, VulkanError> {
        let mut state = self.state.lock();

        if !state.fences.contains_key(&fence) {
            return Err(VulkanError::Unknown);
        }

        Ok(state.complete_until(|state| state.fences[&fence]))
    }

    unsafe fn fence_status(&self, fence: vk::Fence) -> Result<bool, VulkanError> {
        self.state
            .lock()
            .fences
            .get(&fence)
            .copied()
            .ok_or(VulkanError::Unknown)
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submit_info: &SubmitInfo,
        fence: vk::Fence,
    ) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        let mut command_buffers = Vec::new();
        let mut descriptor_sets = Vec::new();

        for &command_buffer in &submit_info.command_buffers {
            let record = state.command_buffer(command_buffer);
            assert_eq!(record.level, CommandBufferLevel::Primary);
            assert_eq!(
                record.state,
                CommandBufferState::Executable,
                "tried to submit a command buffer that is not executable",
            );

            command_buffers.push(command_buffer);
            command_buffers.extend_from_slice(&record.executed);
        }

        for &command_buffer in &command_buffers {
            let record = state.command_buffer_mut(command_buffer);
            record.in_flight += 1;
            descriptor_sets.extend(record.bound_sets.iter().map(|&(_, set)| set));
        }

        for &set in &descriptor_sets {
            let record = state
                .descriptor_sets
                .get_mut(&set)
                .expect("tried to submit a command buffer that binds a destroyed descriptor set");
            record.in_flight += 1;
        }

        let mut signals = Vec::new();

        for signal in &submit_info.signal_semaphores {
            if let Some(&current) = state.semaphores.get(&signal.semaphore) {
                assert!(
                    signal.value > current,
                    "tried to signal timeline value {} while the semaphore is at {current}",
                    signal.value,
                );

                let pending = state
                    .in_flight
                    .iter()
                    .flat_map(|submission| &submission.signals)
                    .filter(|&&(semaphore, _)| semaphore == signal.semaphore)
                    .map(|&(_, value)| value)
                    .max();
                if let Some(pending) = pending {
                    assert!(
                        signal.value > pending,
                        "tried to signal timeline value {} while a pending submission already \
                        signals {pending}",
                        signal.value,
                    );
                }

                signals.push((signal.semaphore, signal.value));
            }
        }

        if fence != vk::Fence::null() {
            let signaled = state
                .fences
                .get(&fence)
                .expect("the fence was not created by this backend");
            assert!(!signaled, "tried to submit with a signaled fence");
        }

        state.submissions.push(SubmissionRecord {
            queue,
            info: submit_info.clone(),
            fence,
        });
        state.in_flight.push_back(InFlightSubmission {
            queue,
            command_buffers,
            descriptor_sets,
            signals,
            fence,
        });

        if state.auto_complete {
            state.complete_next();
        }

        Ok(())
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    ) -> Result<PresentStatus, VulkanError> {
        let mut state = self.state.lock();

        state.presents.push(PresentRecord {
            queue,
            wait_semaphores: wait_semaphores.to_vec(),
            swapchain,
            image_index,
        });

        state
            .present_results
            .pop_front()
            .unwrap_or(Ok(PresentStatus::Optimal))
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), VulkanError> {
        let mut state = self.state.lock();

        // Submissions complete in order, so this completes everything up to the last submission
        // on the queue.
        state.complete_until(|state| {
            !state
                .in_flight
                .iter()
                .any(|submission| submission.queue == queue)
        });

        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        while state.complete_next() {}

        Ok(())
    }

    unsafe fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, VulkanError> {
        let handle = self.new_handle();
        self.state.lock().descriptor_pools.insert(
            handle,
            DescriptorPoolRecord {
                max_sets,
                allocated: Vec::new(),
                resets: 0,
            },
        );

        Ok(handle)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        let record = state
            .descriptor_pools
            .remove(&pool)
            .expect("the descriptor pool was not created by this backend");

        for set in record.allocated {
            let set_record = state.descriptor_sets.remove(&set);
            assert!(
                set_record.map_or(true, |record| record.in_flight == 0),
                "tried to destroy a descriptor pool while the device still uses one of its sets",
            );
        }
    }

    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<(), VulkanError> {
        let mut state = self.state.lock();
        let record = state
            .descriptor_pools
            .get_mut(&pool)
            .expect("the descriptor pool was not created by this backend");
        let allocated = std::mem::take(&mut record.allocated);
        record.resets += 1;

        for set in allocated {
            let set_record = state.descriptor_sets.remove(&set);
            assert!(
                set_record.map_or(true, |record| record.in_flight == 0),
                "tried to reset a descriptor pool while the device still uses one of its sets",
            );
        }

        Ok(())
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, VulkanError> {
        let mut state = self.state.lock();
        let record = state
            .descriptor_pools
            .get(&pool)
            .expect("the descriptor pool was not created by this backend");

        if record.allocated.len() + count as usize > record.max_sets as usize {
            return Err(VulkanError::OutOfPoolMemory);
        }

        let sets: Vec<vk::DescriptorSet> = (0..count).map(|_| self.new_handle()).collect();

        for &set in &sets {
            state
                .descriptor_sets
                .insert(set, DescriptorSetRecord { pool, in_flight: 0 });
        }

        if let Some(record) = state.descriptor_pools.get_mut(&pool) {
            record.allocated.extend_from_slice(&sets);
        }

        Ok(sets)
    }

    unsafe fn create_update_template(
        &self,
        info: &UpdateTemplateInfo<'_>,
    ) -> Result<vk::DescriptorUpdateTemplate, VulkanError> {
        assert!(
            !info.entries.is_empty(),
            "an update template must have at least one entry",
        );

        let handle = self.new_handle();
        self.state
            .lock()
            .update_templates
            .insert(handle, info.entries.to_vec());

        Ok(handle)
    }

    unsafe fn destroy_update_template(&self, template: vk::DescriptorUpdateTemplate) {
        self.state.lock().update_templates.remove(&template);
    }

    unsafe fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        template: vk::DescriptorUpdateTemplate,
        data: &[u8],
    ) {
        let mut state = self.state.lock();
        let record = state
            .descriptor_sets
            .get(&set)
            .expect("the descriptor set was not allocated by this backend");
        assert_eq!(
            record.in_flight, 0,
            "tried to update a descriptor set that the device still uses",
        );

        let entries = state
            .update_templates
            .get(&template)
            .expect("the update template was not created by this backend")
            .clone();

        state.descriptor_updates.push(DescriptorUpdateRecord {
            set,
            entries,
            data: data.to_vec(),
        });
    }

    unsafe fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        let mut state = self.state.lock();
        assert!(
            state.descriptor_sets.contains_key(&set),
            "the descriptor set was not allocated by this backend",
        );

        let record = state.command_buffer_mut(command_buffer);
        assert_eq!(record.state, CommandBufferState::Recording);
        record.bound_sets.push((set_index, set));
    }

    unsafe fn cmd_push_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        template: vk::DescriptorUpdateTemplate,
        _pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        data: &[u8],
    ) {
        let mut state = self.state.lock();
        assert!(
            state.update_templates.contains_key(&template),
            "the update template was not created by this backend",
        );

        let record = state.command_buffer_mut(command_buffer);
        assert_eq!(record.state, CommandBufferState::Recording);
        record.pushed_sets.push((set_index, data.to_vec()));
    }

    unsafe fn create_pipeline_cache(
        &self,
        initial_data: &[u8],
    ) -> Result<vk::PipelineCache, VulkanError> {
        let handle = self.new_handle();
        self.state
            .lock()
            .pipeline_caches
            .insert(handle, initial_data.to_vec());

        Ok(handle)
    }

    unsafe fn pipeline_cache_data(
        &self,
        cache: vk::PipelineCache,
    ) -> Result<Vec<u8>, VulkanError> {
        let state = self.state.lock();
        let data = state
            .pipeline_caches
            .get(&cache)
            .ok_or(VulkanError::Unknown)?;

        if !data.is_empty() {
            return Ok(data.clone());
        }

        // A freshly created cache only contains its header.
        let mut header = Vec::with_capacity(32);
        header.extend_from_slice(&32u32.to_le_bytes());
        header.extend_from_slice(&(vk::PipelineCacheHeaderVersion::ONE.as_raw() as u32).to_le_bytes());
        header.extend_from_slice(&self.properties.vendor_id.to_le_bytes());
        header.extend_from_slice(&self.properties.device_id.to_le_bytes());
        header.extend_from_slice(&self.properties.pipeline_cache_uuid);

        Ok(header)
    }

    unsafe fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.state.lock().pipeline_caches.remove(&cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::SemaphoreSubmitInfo;

    #[test]
    fn submissions_complete_in_order() {
        let backend = NullBackend::new();

        unsafe {
            let queue = backend.get_queue(0, 0);
            let semaphore = backend.create_timeline_semaphore(0).unwrap();
            let fence = backend.create_fence().unwrap();

            for value in 1..=3 {
                let mut submit_info = SubmitInfo::default();
                submit_info.signal_semaphores.push(SemaphoreSubmitInfo::timeline(
                    semaphore,
                    value,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                ));
                let fence = if value == 2 { fence } else { vk::Fence::null() };
                backend.queue_submit(queue, &submit_info, fence).unwrap();
            }

            assert_eq!(backend.in_flight(), 3);
            assert_eq!(backend.semaphore_counter_value(semaphore).unwrap(), 0);

            assert!(backend.complete_next());
            assert_eq!(backend.semaphore_counter_value(semaphore).unwrap(), 1);
            assert!(!backend.fence_status(fence).unwrap());

            assert!(backend.wait_fence(fence, Duration::ZERO).unwrap());
            assert_eq!(backend.semaphore_counter_value(semaphore).unwrap(), 2);

            assert!(backend.wait_semaphore(semaphore, 3, Duration::ZERO).unwrap());
            assert!(!backend.wait_semaphore(semaphore, 4, Duration::ZERO).unwrap());
            assert_eq!(backend.in_flight(), 0);

            backend.destroy_fence(fence);
            backend.destroy_semaphore(semaphore);
        }
    }

    #[test]
    #[should_panic = "still executing"]
    fn reset_in_flight_command_buffer() {
        let backend = NullBackend::new();

        unsafe {
            let queue = backend.get_queue(0, 0);
            let pool = backend.create_command_pool(0).unwrap();
            let command_buffer = backend
                .allocate_command_buffers(pool, CommandBufferLevel::Primary, 1)
                .unwrap()[0];
            backend
                .begin_command_buffer(command_buffer, &CommandBufferBeginInfo::default())
                .unwrap();
            backend.end_command_buffer(command_buffer).unwrap();

            let submit_info = SubmitInfo {
                command_buffers: vec![command_buffer],
                ..Default::default()
            };
            backend
                .queue_submit(queue, &submit_info, vk::Fence::null())
                .unwrap();

            let _ = backend.reset_command_buffer(command_buffer);
        }
    }

    #[test]
    #[should_panic = "while the semaphore is at"]
    fn timeline_must_increase() {
        let backend = NullBackend::new();

        unsafe {
            let queue = backend.get_queue(0, 0);
            let semaphore = backend.create_timeline_semaphore(0).unwrap();
            backend.signal_semaphore(semaphore, 5);

            let mut submit_info = SubmitInfo::default();
            submit_info.signal_semaphores.push(SemaphoreSubmitInfo::timeline(
                semaphore,
                5,
                vk::PipelineStageFlags::ALL_COMMANDS,
            ));
            let _ = backend.queue_submit(queue, &submit_info, vk::Fence::null());
        }
    }

    #[test]
    fn queued_present_results() {
        let backend = NullBackend::new();
        backend.queue_present_result(Ok(PresentStatus::Suboptimal));
        backend.queue_present_result(Err(VulkanError::SurfaceLost));

        unsafe {
            let queue = backend.get_queue(0, 0);
            let swapchain = vk::SwapchainKHR::from_raw(99);

            assert_eq!(
                backend.queue_present(queue, &[], swapchain, 0),
                Ok(PresentStatus::Suboptimal),
            );
            assert_eq!(
                backend.queue_present(queue, &[], swapchain, 1),
                Err(VulkanError::SurfaceLost),
            );
            assert_eq!(
                backend.queue_present(queue, &[], swapchain, 2),
                Ok(PresentStatus::Optimal),
            );
        }

        assert_eq!(backend.presents().len(), 3);
    }
}
