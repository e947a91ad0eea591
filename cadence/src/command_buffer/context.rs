// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    batch::DEFAULT_BATCH_CAPACITY, CommandBufferAccess, CommandBufferBatch, CommandBufferLevel,
    CommandBufferPool, CompletionHooks, RecordingHandle, SubmitInfo,
};
use crate::{device::Device, VulkanError, NE};
use ash::vk;
use crossbeam_queue::SegQueue;
use smallvec::SmallVec;
use std::{
    fmt,
    sync::{Arc, Weak},
};

/// Index of a batch in the arena of its context.
type BatchId = usize;

/// Records commands on one thread, for one queue family.
///
/// Every batch of the context is in exactly one of these lists, per level:
///
/// - *free*: reset and ready to be recorded into.
/// - *pending*: recorded into, waiting for the next submission.
/// - *recording*: the batch of the open scope, if any. At most one scope per level is open.
/// - *executed*: secondary batches that a primary context executed, waiting for the primary
///   submission to retire.
/// - *submitted*: primary batches that were submitted, tagged with the timeline value of their
///   submission.
///
/// A batch goes back to *free* only after the timeline has reached its tag. The timeline
/// callbacks that notice this only post the batch to the context's inbox, the batch is reset by
/// the context itself the next time it is used, so that the command pool is never accessed from
/// another thread.
pub struct CommandRecordingContext {
    pool: CommandBufferPool,
    batches: Vec<CommandBufferBatch>,
    levels: [BatchLists; 2],
    inbox: Arc<SegQueue<RetiredBatches>>,
}

#[derive(Debug, Default)]
struct BatchLists {
    free: Vec<BatchId>,
    pending: Vec<BatchId>,
    recording: Option<OpenScope>,
    executed: Vec<(BatchId, u64)>,
    submitted: Vec<(BatchId, u64)>,
    hooks: Arc<CompletionHooks>,
}

#[derive(Debug)]
struct OpenScope {
    batch: BatchId,
    slot: u32,
    access: CommandBufferAccess,
    handle: RecordingHandle,
}

#[derive(Debug)]
struct RetiredBatches {
    level: CommandBufferLevel,
    batches: SmallVec<[BatchId; 4]>,
}

impl CommandRecordingContext {
    /// Creates a new `CommandRecordingContext`.
    ///
    /// # Panics
    ///
    /// - Panics if `create_info.batch_capacity` is 0 or greater than 64.
    pub fn new(
        device: Arc<Device>,
        create_info: CommandRecordingContextCreateInfo,
    ) -> Result<Self, VulkanError> {
        let CommandRecordingContextCreateInfo {
            queue_family_index,
            batch_capacity,
            _ne: _,
        } = create_info;

        let pool = CommandBufferPool::new(device, queue_family_index, batch_capacity)?;

        Ok(CommandRecordingContext {
            pool,
            batches: Vec::new(),
            levels: Default::default(),
            inbox: Arc::new(SegQueue::new()),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        self.pool.device()
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.pool.queue_family_index()
    }

    /// Opens a recording scope and returns the command buffer to record into.
    ///
    /// The command buffer is the next slot of the last pending batch of the level if it has room
    /// left, otherwise of a free batch, otherwise of a newly allocated batch.
    ///
    /// # Panics
    ///
    /// - Panics if a scope of the same level is already open.
    pub fn begin_scope(&mut self, access: CommandBufferAccess) -> Result<RecordingHandle, VulkanError> {
        let level = access.level;
        assert!(
            self.levels[level.index()].recording.is_none(),
            "tried to begin a {level:?} recording scope while one is already open",
        );

        self.collect_retired()?;

        let batch_id = self.acquire_batch(level)?;
        let batch = &mut self.batches[batch_id];

        let slot = match batch.begin(&self.pool, &access.begin_info()) {
            Ok(slot) => slot,
            Err(err) => {
                let lists = &mut self.levels[level.index()];

                if batch.head() == 0 {
                    lists.free.push(batch_id);
                } else {
                    lists.pending.push(batch_id);
                }

                return Err(err);
            }
        };

        let lists = &mut self.levels[level.index()];
        let handle = RecordingHandle::new(
            batch.command_buffers()[slot as usize],
            level,
            lists.hooks.clone(),
        );
        lists.recording = Some(OpenScope {
            batch: batch_id,
            slot,
            access,
            handle: handle.clone(),
        });

        Ok(handle)
    }

    /// Closes the open recording scope of a level.
    ///
    /// # Panics
    ///
    /// - Panics if no scope of that level is open.
    pub fn end_scope(&mut self, level: CommandBufferLevel) -> Result<(), VulkanError> {
        let lists = &mut self.levels[level.index()];
        let scope = lists.recording.take().unwrap_or_else(|| {
            panic!("tried to end a {level:?} recording scope, but none is open")
        });

        let result = self.batches[scope.batch].end(&self.pool, scope.slot);
        lists.pending.push(scope.batch);

        result
    }

    /// Returns the open scope if it was opened with the same access, otherwise closes it and
    /// opens a new one.
    pub fn scope(&mut self, access: CommandBufferAccess) -> Result<RecordingHandle, VulkanError> {
        if let Some(open) = &self.levels[access.level.index()].recording {
            if open.access == access {
                return Ok(open.handle.clone());
            }

            self.end_scope(access.level)?;
        }

        self.begin_scope(access)
    }

    /// Returns the command buffer of the open scope of a level.
    ///
    /// # Panics
    ///
    /// - Panics if no scope of that level is open.
    #[inline]
    pub fn commands(&self, level: CommandBufferLevel) -> RecordingHandle {
        match &self.levels[level.index()].recording {
            Some(open) => open.handle.clone(),
            None => panic!("no {level:?} recording scope is open"),
        }
    }

    /// Returns whether a scope of the level is open.
    #[inline]
    pub fn is_recording(&self, level: CommandBufferLevel) -> bool {
        self.levels[level.index()].recording.is_some()
    }

    /// Closes the open primary scope, if any, and returns whether there is anything to submit.
    pub fn has_pending_submission(&mut self) -> Result<bool, VulkanError> {
        if self.is_recording(CommandBufferLevel::Primary) {
            self.end_scope(CommandBufferLevel::Primary)?;
        }

        Ok(!self.levels[CommandBufferLevel::Primary.index()]
            .pending
            .is_empty())
    }

    /// Turns every pending primary batch into the command buffers of `submit_info`.
    ///
    /// The open primary scope, if any, is closed first. If nothing is pending, an empty
    /// `SubmitInfo` is returned and `submit_info` is discarded. Otherwise the batches are tagged
    /// with `submit_info.timeline_value()` and will be recycled once the device's timeline has
    /// reached it, as will the completion hooks registered while recording them run.
    ///
    /// The returned `SubmitInfo` must be submitted, and must signal the device's timeline.
    ///
    /// # Panics
    ///
    /// - Panics if `submit_info` doesn't signal a value greater than 0.
    pub fn prepare_submit(&mut self, mut submit_info: SubmitInfo) -> Result<SubmitInfo, VulkanError> {
        if !self.has_pending_submission()? {
            return Ok(SubmitInfo::default());
        }

        let value = submit_info.timeline_value();
        assert_ne!(
            value, 0,
            "a submission must signal a timeline value greater than 0",
        );

        let lists = &mut self.levels[CommandBufferLevel::Primary.index()];
        let batches: SmallVec<[BatchId; 4]> = lists.pending.drain(..).collect();

        for &batch_id in &batches {
            submit_info
                .command_buffers
                .extend_from_slice(self.batches[batch_id].used_command_buffers());
            lists.submitted.push((batch_id, value));
        }

        tracing::trace!(
            value,
            batches = batches.len(),
            command_buffers = submit_info.command_buffers.len(),
            "prepared submission",
        );

        let timeline = self.pool.device().timeline();
        timeline.add_callback(
            value,
            retirement(&self.inbox, CommandBufferLevel::Primary, batches),
        );

        for hook in lists.hooks.drain() {
            timeline.add_callback(value, hook);
        }

        Ok(submit_info)
    }

    /// Records the execution of every pending secondary batch of `secondary` into the open
    /// primary command buffer of this context.
    ///
    /// The open secondary scope of `secondary`, if any, is closed first. The executed batches,
    /// and the completion hooks registered while recording them, retire with the next
    /// submission of this context. Returns the timeline value at the time of the call.
    ///
    /// # Panics
    ///
    /// - Panics if no primary scope of this context is open.
    /// - Panics if the contexts belong to different devices or queue families.
    pub fn execute(&mut self, secondary: &mut CommandRecordingContext) -> Result<u64, VulkanError> {
        assert!(
            Arc::ptr_eq(self.device(), secondary.device()),
            "the secondary recording context belongs to another device",
        );
        assert_eq!(
            self.queue_family_index(),
            secondary.queue_family_index(),
            "the secondary recording context belongs to another queue family",
        );

        let primary = self.levels[CommandBufferLevel::Primary.index()]
            .recording
            .as_ref()
            .unwrap_or_else(|| {
                panic!("tried to execute secondary command buffers without an open primary scope")
            })
            .handle
            .clone();

        if secondary.is_recording(CommandBufferLevel::Secondary) {
            secondary.end_scope(CommandBufferLevel::Secondary)?;
        }

        let value = self.device().timeline().allocate_value();
        let lists = &mut secondary.levels[CommandBufferLevel::Secondary.index()];

        if lists.pending.is_empty() {
            return Ok(value);
        }

        let batches: SmallVec<[BatchId; 4]> = lists.pending.drain(..).collect();
        let command_buffers: SmallVec<[vk::CommandBuffer; 16]> = batches
            .iter()
            .flat_map(|&batch_id| secondary.batches[batch_id].used_command_buffers())
            .copied()
            .collect();

        // SAFETY: `primary` is open for recording and its pool is only used through `self`.
        unsafe {
            self.pool
                .device()
                .backend()
                .cmd_execute_commands(primary.handle(), &command_buffers)
        };

        tracing::trace!(
            value,
            command_buffers = command_buffers.len(),
            "executed secondary command buffers",
        );

        lists
            .executed
            .extend(batches.iter().map(|&batch_id| (batch_id, value)));
        primary.on_completion(retirement(
            &secondary.inbox,
            CommandBufferLevel::Secondary,
            batches,
        ));

        for hook in lists.hooks.drain() {
            primary.on_completion(hook);
        }

        Ok(value)
    }

    /// Blocks until the oldest submission of this context has completed, then recycles every
    /// batch that retired.
    ///
    /// Returns [`VulkanError::Timeout`] if the device's wait timeout elapsed first.
    pub fn reset(&mut self) -> Result<(), VulkanError> {
        let device = self.device().clone();
        let oldest = self.levels[CommandBufferLevel::Primary.index()]
            .submitted
            .iter()
            .map(|&(_, value)| value)
            .min();

        if let Some(value) = oldest {
            if !device.timeline().wait(value, device.wait_timeout())? {
                tracing::warn!(value, "timed out waiting for a submission to complete");
                return Err(VulkanError::Timeout);
            }
        }

        device.poll_timeline()?;
        self.collect_retired()
    }

    /// Recycles every batch that retired, without blocking.
    pub fn cleanup_finished(&mut self) -> Result<(), VulkanError> {
        self.device().poll_timeline()?;
        self.collect_retired()
    }

    /// Returns the number of batches the context has allocated.
    #[inline]
    pub fn allocated_batches(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub fn free_batches(&self, level: CommandBufferLevel) -> usize {
        self.levels[level.index()].free.len()
    }

    #[inline]
    pub fn pending_batches(&self, level: CommandBufferLevel) -> usize {
        self.levels[level.index()].pending.len()
    }

    /// Returns the number of batches that wait for their submission to retire.
    #[inline]
    pub fn in_flight_batches(&self, level: CommandBufferLevel) -> usize {
        let lists = &self.levels[level.index()];

        match level {
            CommandBufferLevel::Primary => lists.submitted.len(),
            CommandBufferLevel::Secondary => lists.executed.len(),
        }
    }

    /// Returns the batch of the open scope of the level, or else the last pending one.
    pub fn current_batch(&self, level: CommandBufferLevel) -> Option<&CommandBufferBatch> {
        let lists = &self.levels[level.index()];

        lists
            .recording
            .as_ref()
            .map(|open| open.batch)
            .or_else(|| lists.pending.last().copied())
            .map(|batch_id| &self.batches[batch_id])
    }

    fn acquire_batch(&mut self, level: CommandBufferLevel) -> Result<BatchId, VulkanError> {
        let lists = &mut self.levels[level.index()];

        if let Some(&last) = lists.pending.last() {
            if !self.batches[last].is_full() {
                lists.pending.pop();
                return Ok(last);
            }
        }

        if let Some(batch_id) = lists.free.pop() {
            return Ok(batch_id);
        }

        let batch = self.pool.allocate_batch(level)?;
        self.batches.push(batch);

        Ok(self.batches.len() - 1)
    }

    fn collect_retired(&mut self) -> Result<(), VulkanError> {
        let mut result = Ok(());

        while let Some(retired) = self.inbox.pop() {
            let lists = &mut self.levels[retired.level.index()];
            let in_flight = match retired.level {
                CommandBufferLevel::Primary => &mut lists.submitted,
                CommandBufferLevel::Secondary => &mut lists.executed,
            };

            for batch_id in retired.batches {
                let Some(index) = in_flight.iter().position(|&(id, _)| id == batch_id) else {
                    continue;
                };
                in_flight.swap_remove(index);

                // SAFETY: The timeline reached the value of the submission that contained the
                // batch.
                if let Err(err) = unsafe { self.batches[batch_id].reset(&self.pool) } {
                    result = Err(err);
                }

                lists.free.push(batch_id);

                tracing::trace!(batch = batch_id, level = ?retired.level, "recycled batch");
            }
        }

        result
    }
}

fn retirement(
    inbox: &Arc<SegQueue<RetiredBatches>>,
    level: CommandBufferLevel,
    batches: SmallVec<[BatchId; 4]>,
) -> impl FnOnce() + Send + 'static {
    let inbox: Weak<_> = Arc::downgrade(inbox);

    move || {
        if let Some(inbox) = inbox.upgrade() {
            inbox.push(RetiredBatches { level, batches });
        }
    }
}

impl Drop for CommandRecordingContext {
    fn drop(&mut self) {
        for level in [CommandBufferLevel::Primary, CommandBufferLevel::Secondary] {
            if self.is_recording(level) {
                if let Err(err) = self.end_scope(level) {
                    tracing::error!("failed to end a recording scope while dropping: {err}");
                }
            }
        }

        let device = self.device().clone();
        let newest = self.levels[CommandBufferLevel::Primary.index()]
            .submitted
            .iter()
            .map(|&(_, value)| value)
            .max();

        if let Some(value) = newest {
            match device.timeline().wait(value, device.wait_timeout()) {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    value,
                    "timed out waiting for submitted command buffers while dropping a recording \
                    context",
                ),
                Err(err) => tracing::error!(
                    "failed to wait for submitted command buffers while dropping a recording \
                    context: {err}",
                ),
            }
        }

        // There is no telling which submission executes the secondary batches.
        if !self.levels[CommandBufferLevel::Secondary.index()]
            .executed
            .is_empty()
        {
            tracing::warn!(
                "dropping a recording context whose secondary command buffers might still \
                execute, waiting for the device to be idle",
            );

            if let Err(err) = unsafe { device.backend().device_wait_idle() } {
                tracing::error!("failed to wait for the device to be idle: {err}");
            }
        }

        if let Err(err) = device.poll_timeline() {
            tracing::error!("failed to poll the timeline while dropping a recording context: {err}");
        }

        // Whatever was never submitted will never execute.
        for lists in &self.levels {
            lists.hooks.drain().for_each(|hook| hook());
        }
    }
}

impl fmt::Debug for CommandRecordingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRecordingContext")
            .field("pool", &self.pool)
            .field("batches", &self.batches.len())
            .field("levels", &self.levels)
            .finish_non_exhaustive()
    }
}

/// Parameters to create a new `CommandRecordingContext`.
#[derive(Clone, Debug)]
pub struct CommandRecordingContextCreateInfo {
    /// The queue family that the recorded command buffers are submitted to.
    ///
    /// The default value is 0.
    pub queue_family_index: u32,

    /// How many command buffers are allocated together.
    ///
    /// The default value is 16.
    pub batch_capacity: u32,

    pub _ne: crate::NonExhaustive,
}

impl Default for CommandRecordingContextCreateInfo {
    #[inline]
    fn default() -> Self {
        CommandRecordingContextCreateInfo {
            queue_family_index: 0,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            _ne: NE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command_buffer::SemaphoreSubmitInfo, queue::SubmissionQueue};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn context(device: &Arc<Device>) -> CommandRecordingContext {
        CommandRecordingContext::new(device.clone(), Default::default()).unwrap()
    }

    fn signal(device: &Device, value: u64) -> SubmitInfo {
        let mut submit_info = SubmitInfo::default();
        submit_info
            .signal_semaphores
            .push(SemaphoreSubmitInfo::timeline(
                device.timeline().semaphore(),
                value,
                vk::PipelineStageFlags::ALL_COMMANDS,
            ));

        submit_info
    }

    #[test]
    fn scopes_fill_batches() {
        let (_backend, device) = null_device!();
        let mut context = context(&device);

        for _ in 0..20 {
            context.begin_scope(CommandBufferAccess::primary()).unwrap();
            context.end_scope(CommandBufferLevel::Primary).unwrap();
        }

        assert_eq!(context.allocated_batches(), 2);
        assert_eq!(context.pending_batches(CommandBufferLevel::Primary), 2);
        assert_eq!(context.current_batch(CommandBufferLevel::Primary).unwrap().head(), 4);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        assert_eq!(context.allocated_batches(), 2);
        assert_eq!(context.current_batch(CommandBufferLevel::Primary).unwrap().head(), 5);
    }

    #[test]
    fn scope_reuses_matching_access() {
        let (backend, device) = null_device!();
        let mut context = context(&device);

        let first = context.scope(CommandBufferAccess::primary()).unwrap();
        let again = context.scope(CommandBufferAccess::primary()).unwrap();
        assert_eq!(first.handle(), again.handle());
        assert_eq!(context.commands(CommandBufferLevel::Primary).handle(), first.handle());

        let secondary = context.scope(CommandBufferAccess::secondary(None)).unwrap();
        assert_ne!(secondary.handle(), first.handle());
        assert!(context.is_recording(CommandBufferLevel::Primary));

        let reusable = CommandBufferAccess {
            one_time_submit: false,
            ..CommandBufferAccess::primary()
        };
        let other = context.scope(reusable).unwrap();
        assert_ne!(other.handle(), first.handle());
        assert!(!backend.is_recording(first.handle()));
        assert!(backend.is_recording(other.handle()));
    }

    #[test]
    #[should_panic = "already open"]
    fn begin_twice() {
        let (_backend, device) = null_device!();
        let mut context = context(&device);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let _ = context.begin_scope(CommandBufferAccess::primary());
    }

    #[test]
    #[should_panic = "none is open"]
    fn end_without_scope() {
        let (_backend, device) = null_device!();
        let mut context = context(&device);

        let _ = context.end_scope(CommandBufferLevel::Secondary);
    }

    #[test]
    #[should_panic = "no Primary recording scope is open"]
    fn commands_without_scope() {
        let (_backend, device) = null_device!();
        let context = context(&device);

        let _ = context.commands(CommandBufferLevel::Primary);
    }

    #[test]
    fn prepare_empty_submission() {
        let (_backend, device) = null_device!();
        let mut context = context(&device);

        let submit_info = context.prepare_submit(signal(&device, 1)).unwrap();
        assert!(submit_info.is_empty());
        assert_eq!(submit_info, SubmitInfo::default());
        assert_eq!(device.timeline().pending_callbacks(), 0);
    }

    #[test]
    #[should_panic = "greater than 0"]
    fn prepare_without_timeline_value() {
        let (_backend, device) = null_device!();
        let mut context = context(&device);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let _ = context.prepare_submit(SubmitInfo::default());
    }

    #[test]
    fn prepare_tags_batches() {
        let (_backend, device) = null_device!();
        let mut context = CommandRecordingContext::new(
            device.clone(),
            CommandRecordingContextCreateInfo {
                batch_capacity: 2,
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..3 {
            context.begin_scope(CommandBufferAccess::primary()).unwrap();
            context.end_scope(CommandBufferLevel::Primary).unwrap();
        }

        let handle = context.begin_scope(CommandBufferAccess::primary()).unwrap();
        handle.on_completion(|| {});

        let submit_info = context.prepare_submit(signal(&device, 1)).unwrap();
        assert_eq!(submit_info.command_buffers.len(), 4);
        assert_eq!(submit_info.command_buffers[3], handle.handle());
        assert!(!context.is_recording(CommandBufferLevel::Primary));
        assert_eq!(context.pending_batches(CommandBufferLevel::Primary), 0);
        assert_eq!(context.in_flight_batches(CommandBufferLevel::Primary), 2);

        // The retirement of both batches, and the hook.
        assert_eq!(device.timeline().pending_callbacks(), 2);
    }

    #[test]
    fn no_premature_reclamation() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let first = queue.submit(&mut context, &[]).unwrap().unwrap();
        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let second = queue.submit(&mut context, &[]).unwrap().unwrap();
        assert!(second.timeline_value() > first.timeline_value());
        assert_eq!(context.allocated_batches(), 2);

        context.cleanup_finished().unwrap();
        assert_eq!(context.free_batches(CommandBufferLevel::Primary), 0);
        assert_eq!(context.in_flight_batches(CommandBufferLevel::Primary), 2);

        assert!(backend.complete_next());
        context.cleanup_finished().unwrap();
        assert_eq!(context.free_batches(CommandBufferLevel::Primary), 1);
        assert_eq!(context.in_flight_batches(CommandBufferLevel::Primary), 1);

        assert!(backend.complete_next());
        context.cleanup_finished().unwrap();
        assert_eq!(context.free_batches(CommandBufferLevel::Primary), 2);
        assert_eq!(context.in_flight_batches(CommandBufferLevel::Primary), 0);
    }

    #[test]
    fn round_trip_to_fresh_batch() {
        let (_backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);

        let first = context.begin_scope(CommandBufferAccess::primary()).unwrap();
        queue.submit(&mut context, &[]).unwrap().unwrap();

        context.reset().unwrap();
        assert_eq!(context.free_batches(CommandBufferLevel::Primary), 1);
        assert_eq!(context.in_flight_batches(CommandBufferLevel::Primary), 0);

        let again = context.begin_scope(CommandBufferAccess::primary()).unwrap();
        assert_eq!(context.allocated_batches(), 1);
        assert_eq!(again.handle(), first.handle());
        assert_eq!(context.current_batch(CommandBufferLevel::Primary).unwrap().head(), 1);
    }

    #[test]
    fn hooks_run_after_completion() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);
        let counter = Arc::new(AtomicU32::new(0));

        let handle = context.begin_scope(CommandBufferAccess::primary()).unwrap();
        {
            let counter = counter.clone();
            handle.on_completion(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        queue.submit(&mut context, &[]).unwrap().unwrap();
        context.cleanup_finished().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        backend.complete_all();
        context.cleanup_finished().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn drop_runs_unsubmitted_hooks() {
        let (backend, device) = null_device!();
        let counter = Arc::new(AtomicU32::new(0));

        {
            let mut context = context(&device);
            let handle = context.begin_scope(CommandBufferAccess::primary()).unwrap();
            let counter = counter.clone();
            handle.on_completion(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(backend.live_command_buffers(), 0);
    }

    #[test]
    fn drop_waits_for_submissions() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);

        {
            let mut context = context(&device);
            context.begin_scope(CommandBufferAccess::primary()).unwrap();
            queue.submit(&mut context, &[]).unwrap().unwrap();
            assert_eq!(backend.in_flight(), 1);
        }

        assert_eq!(backend.in_flight(), 0);
        assert_eq!(backend.live_command_buffers(), 0);
    }

    #[test]
    fn execute_secondaries() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut primary = context(&device);
        let mut secondary = context(&device);
        let counter = Arc::new(AtomicU32::new(0));

        let mut secondaries = Vec::new();

        for _ in 0..2 {
            let handle = secondary
                .begin_scope(CommandBufferAccess::secondary(None))
                .unwrap();
            let counter = counter.clone();
            handle.on_completion(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
            secondaries.push(handle.handle());
            secondary.end_scope(CommandBufferLevel::Secondary).unwrap();
        }

        let handle = primary.begin_scope(CommandBufferAccess::primary()).unwrap();
        let value = primary.execute(&mut secondary).unwrap();
        assert_eq!(value, device.timeline().allocate_value());
        assert_eq!(backend.executed_command_buffers(handle.handle()), secondaries);
        assert_eq!(secondary.pending_batches(CommandBufferLevel::Secondary), 0);
        assert_eq!(secondary.in_flight_batches(CommandBufferLevel::Secondary), 1);

        let token = queue.submit(&mut primary, &[]).unwrap().unwrap();
        assert!(token.timeline_value() >= value);

        secondary.cleanup_finished().unwrap();
        assert_eq!(secondary.free_batches(CommandBufferLevel::Secondary), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        backend.complete_all();
        secondary.cleanup_finished().unwrap();
        assert_eq!(secondary.free_batches(CommandBufferLevel::Secondary), 1);
        assert_eq!(secondary.in_flight_batches(CommandBufferLevel::Secondary), 0);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    #[should_panic = "without an open primary scope"]
    fn execute_without_primary_scope() {
        let (_backend, device) = null_device!();
        let mut primary = context(&device);
        let mut secondary = context(&device);

        secondary
            .begin_scope(CommandBufferAccess::secondary(None))
            .unwrap();
        let _ = primary.execute(&mut secondary);
    }
}
