// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    batch::{CommandBufferBatch, MAX_BATCH_CAPACITY},
    CommandBufferLevel,
};
use crate::{device::Device, VulkanError};
use ash::vk;
use std::{cell::Cell, marker::PhantomData, sync::Arc};

/// A Vulkan command pool that allocates command buffers in batches.
///
/// Vulkan command pools are externally synchronized, as is every command buffer allocated from
/// them. The pool is therefore `Send` but not `Sync`, and every batch operation borrows the pool.
#[derive(Debug)]
pub struct CommandBufferPool {
    device: Arc<Device>,
    handle: vk::CommandPool,
    queue_family_index: u32,
    batch_capacity: u32,
    _marker: PhantomData<Cell<vk::CommandPool>>,
}

impl CommandBufferPool {
    /// Creates a new `CommandBufferPool` for the given queue family.
    ///
    /// # Panics
    ///
    /// - Panics if `batch_capacity` is 0 or greater than 64.
    pub fn new(
        device: Arc<Device>,
        queue_family_index: u32,
        batch_capacity: u32,
    ) -> Result<Self, VulkanError> {
        assert!(
            (1..=MAX_BATCH_CAPACITY).contains(&batch_capacity),
            "a command buffer batch must hold between 1 and {MAX_BATCH_CAPACITY} command buffers",
        );

        let handle = unsafe { device.backend().create_command_pool(queue_family_index) }
            .inspect_err(|err| tracing::error!("failed to create a command pool: {err}"))?;

        tracing::trace!(?handle, queue_family_index, "created command pool");

        Ok(CommandBufferPool {
            device,
            handle,
            queue_family_index,
            batch_capacity,
            _marker: PhantomData,
        })
    }

    /// Allocates a new batch of command buffers.
    pub fn allocate_batch(
        &self,
        level: CommandBufferLevel,
    ) -> Result<CommandBufferBatch, VulkanError> {
        let command_buffers = unsafe {
            self.device
                .backend()
                .allocate_command_buffers(self.handle, level, self.batch_capacity)
        }
        .inspect_err(|err| tracing::error!("failed to allocate command buffers: {err}"))?;

        tracing::trace!(
            pool = ?self.handle,
            ?level,
            capacity = self.batch_capacity,
            "allocated command buffer batch",
        );

        Ok(CommandBufferBatch::new(self.handle, level, command_buffers))
    }

    /// Frees the command buffers of a batch.
    ///
    /// # Panics
    ///
    /// - Panics if the batch was not allocated from this pool.
    ///
    /// # Safety
    ///
    /// - The GPU must have finished executing every command buffer of the batch.
    pub unsafe fn free_batch(&self, batch: CommandBufferBatch) {
        assert_eq!(
            batch.pool(),
            self.handle,
            "the command buffer batch was not allocated from this pool",
        );

        unsafe {
            self.device
                .backend()
                .free_command_buffers(self.handle, batch.command_buffers())
        };
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the number of command buffers in each batch this pool allocates.
    #[inline]
    pub fn batch_capacity(&self) -> u32 {
        self.batch_capacity
    }
}

impl Drop for CommandBufferPool {
    fn drop(&mut self) {
        // Destroying the pool frees every command buffer that is still allocated from it.
        unsafe { self.device.backend().destroy_command_pool(self.handle) };
    }
}
