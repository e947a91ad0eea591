// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{CommandBufferBeginInfo, CommandBufferLevel, CommandBufferPool};
use crate::VulkanError;
use ash::vk;
use smallvec::SmallVec;

/// The number of command buffers in a batch if not specified otherwise.
pub const DEFAULT_BATCH_CAPACITY: u32 = 16;

/// The largest supported number of command buffers in a batch.
pub const MAX_BATCH_CAPACITY: u32 = u64::BITS;

/// A fixed number of command buffers of the same level, allocated together and reset together.
///
/// Slots are handed out in order. `head` is the index of the next slot that has never been
/// recorded into since the last reset, and a slot is *open* from [`begin`] until [`end`]. Only
/// the most recently begun slot can be open.
///
/// A batch is created by [`CommandBufferPool::allocate_batch`] and must only be used with that
/// pool.
///
/// [`begin`]: Self::begin
/// [`end`]: Self::end
#[derive(Debug)]
pub struct CommandBufferBatch {
    pool: vk::CommandPool,
    level: CommandBufferLevel,
    command_buffers: SmallVec<[vk::CommandBuffer; DEFAULT_BATCH_CAPACITY as usize]>,
    open: u64,
    head: u32,
}

impl CommandBufferBatch {
    pub(super) fn new(
        pool: vk::CommandPool,
        level: CommandBufferLevel,
        command_buffers: Vec<vk::CommandBuffer>,
    ) -> Self {
        debug_assert!(
            !command_buffers.is_empty() && command_buffers.len() <= MAX_BATCH_CAPACITY as usize,
        );

        CommandBufferBatch {
            pool,
            level,
            command_buffers: command_buffers.into_iter().collect(),
            open: 0,
            head: 0,
        }
    }

    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Returns the number of command buffers in the batch.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.command_buffers.len() as u32
    }

    /// Returns the index of the next slot that will be begun.
    #[inline]
    pub fn head(&self) -> u32 {
        self.head
    }

    /// Returns whether every slot has been used since the last reset.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.head == self.capacity()
    }

    /// Returns whether any slot is open for recording.
    #[inline]
    pub fn has_open_slot(&self) -> bool {
        self.open != 0
    }

    #[inline]
    pub fn is_open(&self, slot_index: u32) -> bool {
        slot_index < MAX_BATCH_CAPACITY && self.open & (1 << slot_index) != 0
    }

    /// Returns all the command buffers of the batch.
    #[inline]
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    /// Returns the command buffers that were used since the last reset.
    #[inline]
    pub fn used_command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers[..self.head as usize]
    }

    /// Begins recording into the next slot and returns its index.
    ///
    /// # Panics
    ///
    /// - Panics if the batch is full.
    /// - Panics if the previous slot is still open.
    /// - Panics if the batch was not allocated from `pool`.
    pub fn begin(
        &mut self,
        pool: &CommandBufferPool,
        begin_info: &CommandBufferBeginInfo,
    ) -> Result<u32, VulkanError> {
        self.validate_pool(pool);
        assert!(
            !self.is_full(),
            "tried to begin a slot of a full command buffer batch",
        );
        assert!(
            !self.has_open_slot(),
            "tried to begin a slot of a command buffer batch while slot {} is still open",
            self.head - 1,
        );

        let slot_index = self.head;

        // SAFETY: The slot is not open and `pool` is the pool of the batch, which is not `Sync`.
        unsafe {
            pool.device()
                .backend()
                .begin_command_buffer(self.command_buffers[slot_index as usize], begin_info)
        }
        .inspect_err(|err| tracing::error!("failed to begin a command buffer: {err}"))?;

        self.open |= 1 << slot_index;
        self.head += 1;

        Ok(slot_index)
    }

    /// Ends recording into an open slot.
    ///
    /// # Panics
    ///
    /// - Panics if `slot_index` is not open.
    /// - Panics if the batch was not allocated from `pool`.
    pub fn end(&mut self, pool: &CommandBufferPool, slot_index: u32) -> Result<(), VulkanError> {
        self.validate_pool(pool);
        assert!(
            self.is_open(slot_index),
            "tried to end slot {slot_index} of a command buffer batch, which is not open",
        );

        // Closed even if ending fails, the command buffer is invalid then and is only reset.
        self.open &= !(1 << slot_index);

        // SAFETY: The slot was open.
        unsafe {
            pool.device()
                .backend()
                .end_command_buffer(self.command_buffers[slot_index as usize])
        }
        .inspect_err(|err| tracing::error!("failed to end a command buffer: {err}"))
    }

    /// Resets every used command buffer, releasing their resources, and rewinds the batch.
    ///
    /// # Panics
    ///
    /// - Panics if a slot is open.
    /// - Panics if the batch was not allocated from `pool`.
    ///
    /// # Safety
    ///
    /// - The GPU must have finished executing every command buffer of the batch.
    pub unsafe fn reset(&mut self, pool: &CommandBufferPool) -> Result<(), VulkanError> {
        self.validate_pool(pool);
        assert!(
            !self.has_open_slot(),
            "tried to reset a command buffer batch while a slot is open",
        );

        for &command_buffer in self.used_command_buffers() {
            unsafe { pool.device().backend().reset_command_buffer(command_buffer) }
                .inspect_err(|err| tracing::error!("failed to reset a command buffer: {err}"))?;
        }

        self.head = 0;

        Ok(())
    }

    pub(super) fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    fn validate_pool(&self, pool: &CommandBufferPool) {
        assert_eq!(
            self.pool,
            pool.handle(),
            "the command buffer batch was not allocated from this pool",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_in_order() {
        let (backend, device) = null_device!();
        let pool = CommandBufferPool::new(device, 0, 4).unwrap();
        let mut batch = pool.allocate_batch(CommandBufferLevel::Primary).unwrap();
        let begin_info = CommandBufferBeginInfo::default();

        assert_eq!(batch.capacity(), 4);
        assert_eq!(batch.head(), 0);

        for expected in 0..4 {
            let slot = batch.begin(&pool, &begin_info).unwrap();
            assert_eq!(slot, expected);
            assert!(batch.is_open(slot));
            assert!(backend.is_recording(batch.command_buffers()[slot as usize]));
            batch.end(&pool, slot).unwrap();
            assert!(!batch.is_open(slot));
        }

        assert!(batch.is_full());
        assert_eq!(batch.used_command_buffers().len(), 4);

        unsafe { batch.reset(&pool).unwrap() };
        assert_eq!(batch.head(), 0);
        assert!(!batch.is_full());

        unsafe { pool.free_batch(batch) };
    }

    #[test]
    #[should_panic = "full command buffer batch"]
    fn begin_full() {
        let (_backend, device) = null_device!();
        let pool = CommandBufferPool::new(device, 0, 1).unwrap();
        let mut batch = pool.allocate_batch(CommandBufferLevel::Primary).unwrap();
        let begin_info = CommandBufferBeginInfo::default();

        let slot = batch.begin(&pool, &begin_info).unwrap();
        batch.end(&pool, slot).unwrap();
        let _ = batch.begin(&pool, &begin_info);
    }

    #[test]
    #[should_panic = "is still open"]
    fn begin_while_open() {
        let (_backend, device) = null_device!();
        let pool = CommandBufferPool::new(device, 0, 4).unwrap();
        let mut batch = pool.allocate_batch(CommandBufferLevel::Primary).unwrap();
        let begin_info = CommandBufferBeginInfo::default();

        batch.begin(&pool, &begin_info).unwrap();
        let _ = batch.begin(&pool, &begin_info);
    }

    #[test]
    #[should_panic = "which is not open"]
    fn end_twice() {
        let (_backend, device) = null_device!();
        let pool = CommandBufferPool::new(device, 0, 4).unwrap();
        let mut batch = pool.allocate_batch(CommandBufferLevel::Primary).unwrap();

        let slot = batch.begin(&pool, &CommandBufferBeginInfo::default()).unwrap();
        batch.end(&pool, slot).unwrap();
        let _ = batch.end(&pool, slot);
    }

    #[test]
    #[should_panic = "while a slot is open"]
    fn reset_while_open() {
        let (_backend, device) = null_device!();
        let pool = CommandBufferPool::new(device, 0, 4).unwrap();
        let mut batch = pool.allocate_batch(CommandBufferLevel::Primary).unwrap();

        batch.begin(&pool, &CommandBufferBeginInfo::default()).unwrap();
        let _ = unsafe { batch.reset(&pool) };
    }

    #[test]
    #[should_panic = "not allocated from this pool"]
    fn foreign_pool() {
        let (_backend, device) = null_device!();
        let pool = CommandBufferPool::new(device.clone(), 0, 4).unwrap();
        let other_pool = CommandBufferPool::new(device, 0, 4).unwrap();
        let mut batch = pool.allocate_batch(CommandBufferLevel::Primary).unwrap();

        let _ = batch.begin(&other_pool, &CommandBufferBeginInfo::default());
    }
}
