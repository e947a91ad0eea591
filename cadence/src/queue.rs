// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Submission of recorded work to hardware queues.
//!
//! A [`SubmissionQueue`] wraps one hardware queue of the device. Submitting a
//! [`CommandRecordingContext`] bundles everything the context has pending into a single
//! submission, which signals the next value of the device's timeline.

use crate::{
    command_buffer::{CommandRecordingContext, SemaphoreSubmitInfo, SubmitInfo},
    device::Device,
    sync::SubmitToken,
    VulkanError,
};
use ash::vk;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

/// One hardware queue of a device.
///
/// A hardware queue can only be wrapped by one `SubmissionQueue` at a time. Submissions are
/// serialized internally, so the queue can be shared between threads.
pub struct SubmissionQueue {
    device: Arc<Device>,
    handle: vk::Queue,
    queue_family_index: u32,
    queue_index: u32,
    state: Mutex<QueueState>,
}

impl SubmissionQueue {
    /// Claims a hardware queue of the device.
    ///
    /// # Panics
    ///
    /// - Panics if the queue is already wrapped by another `SubmissionQueue`.
    pub fn new(device: Arc<Device>, queue_family_index: u32, queue_index: u32) -> Self {
        device.claim_queue(queue_family_index, queue_index);
        let handle = unsafe { device.backend().get_queue(queue_family_index, queue_index) };

        SubmissionQueue {
            device,
            handle,
            queue_family_index,
            queue_index,
            state: Mutex::new(QueueState::Idle),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    #[inline]
    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    /// Returns whether work submitted to the queue is still executing.
    pub fn state(&self) -> Result<QueueState, VulkanError> {
        let mut state = self.state.lock();

        if let QueueState::Submitted { value } = *state {
            if self.device.timeline().observed_value()? >= value {
                *state = QueueState::Idle;
            }
        }

        Ok(*state)
    }

    /// Submits everything `context` has pending.
    ///
    /// The submission waits on `wait_semaphores` and signals the next value of the device's
    /// timeline. Returns `None`, without submitting anything, if nothing is pending.
    ///
    /// # Panics
    ///
    /// - Panics if `context` belongs to another device or queue family.
    pub fn submit(
        &self,
        context: &mut CommandRecordingContext,
        wait_semaphores: &[SemaphoreSubmitInfo],
    ) -> Result<Option<SubmitToken>, VulkanError> {
        self.validate_context(context);

        let mut state = self.state.lock();

        if !context.has_pending_submission()? {
            return Ok(None);
        }

        self.submit_locked(&mut state, context, wait_semaphores, &[])
            .map(Some)
    }

    /// Submits everything `context` has pending, then presents a swapchain image once the
    /// submission has completed.
    ///
    /// A submission is made even if nothing is pending, so that `present_info.render_finished`
    /// is signaled after `present_info.wait_semaphores`.
    ///
    /// An out-of-date or suboptimal swapchain is not an error, it is reported in the returned
    /// [`PresentOutcome`].
    ///
    /// # Panics
    ///
    /// - Panics if `context` belongs to another device or queue family.
    pub fn present(
        &self,
        context: &mut CommandRecordingContext,
        present_info: PresentInfo,
    ) -> Result<PresentOutcome, VulkanError> {
        self.validate_context(context);

        let PresentInfo {
            swapchain,
            image_index,
            wait_semaphores,
            render_finished,
            _ne: _,
        } = present_info;

        let mut state = self.state.lock();
        let token = self.submit_locked(
            &mut state,
            context,
            &wait_semaphores,
            &[SemaphoreSubmitInfo::binary(
                render_finished,
                vk::PipelineStageFlags::ALL_COMMANDS,
            )],
        )?;

        let status = unsafe {
            self.device.backend().queue_present(
                self.handle,
                &[render_finished],
                swapchain,
                image_index,
            )
        }
        .inspect_err(|err| tracing::error!("failed to present: {err}"))?;

        match status {
            PresentStatus::Optimal => {
                tracing::trace!(image_index, "presented");
            }
            PresentStatus::Suboptimal => {
                tracing::warn!(image_index, "presented to a suboptimal swapchain");
            }
            PresentStatus::OutOfDate => {
                tracing::warn!(image_index, "the swapchain is out of date");
            }
        }

        Ok(PresentOutcome { token, status })
    }

    /// Blocks until the queue is idle, then runs the timeline callbacks the GPU has reached.
    pub fn wait_idle(&self) -> Result<(), VulkanError> {
        let mut state = self.state.lock();

        unsafe { self.device.backend().queue_wait_idle(self.handle) }
            .inspect_err(|err| tracing::error!("failed to wait for the queue to be idle: {err}"))?;

        *state = QueueState::Idle;
        drop(state);

        self.device.poll_timeline()?;

        Ok(())
    }

    fn submit_locked(
        &self,
        state: &mut QueueState,
        context: &mut CommandRecordingContext,
        wait_semaphores: &[SemaphoreSubmitInfo],
        extra_signals: &[SemaphoreSubmitInfo],
    ) -> Result<SubmitToken, VulkanError> {
        let backend = self.device.backend();
        let timeline = self.device.timeline();

        // Created first, so that a failure leaves the context's pending work untouched.
        let fence = unsafe { backend.create_fence() }
            .inspect_err(|err| tracing::error!("failed to create a fence: {err}"))?;

        // Every queue of the device signals the same timeline. Reserving the value and
        // submitting under one lock keeps the values in submission order across queues.
        let submissions = self.device.lock_submissions();
        let value = timeline.next_signal_value();

        let mut signal_semaphores: SmallVec<[SemaphoreSubmitInfo; 4]> =
            SmallVec::from_slice(extra_signals);
        signal_semaphores.push(SemaphoreSubmitInfo::timeline(
            timeline.semaphore(),
            value,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ));

        let submit_info = SubmitInfo {
            wait_semaphores: SmallVec::from_slice(wait_semaphores),
            signal_semaphores: signal_semaphores.clone(),
            command_buffers: Vec::new(),
        };

        let mut submit_info = match context.prepare_submit(submit_info) {
            Ok(submit_info) => submit_info,
            Err(err) => {
                unsafe { backend.destroy_fence(fence) };

                return Err(err);
            }
        };

        if submit_info.is_empty() {
            submit_info.wait_semaphores = SmallVec::from_slice(wait_semaphores);
            submit_info.signal_semaphores = signal_semaphores;
        }

        if let Err(err) = unsafe { backend.queue_submit(self.handle, &submit_info, fence) } {
            tracing::error!(value, "failed to submit: {err}");
            unsafe { backend.destroy_fence(fence) };

            return Err(err);
        }

        drop(submissions);

        tracing::debug!(
            value,
            command_buffers = submit_info.command_buffers.len(),
            waits = submit_info.wait_semaphores.len(),
            "submitted",
        );

        *state = QueueState::Submitted { value };

        Ok(SubmitToken::new(self.device.clone(), fence, value))
    }

    fn validate_context(&self, context: &CommandRecordingContext) {
        assert!(
            Arc::ptr_eq(&self.device, context.device()),
            "the recording context belongs to another device",
        );
        assert_eq!(
            self.queue_family_index,
            context.queue_family_index(),
            "the recording context records for another queue family",
        );
    }
}

impl Drop for SubmissionQueue {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.device.backend().queue_wait_idle(self.handle) } {
            tracing::error!("failed to wait for the queue to be idle while dropping it: {err}");
        }

        self.device
            .release_queue(self.queue_family_index, self.queue_index);
    }
}

impl fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("handle", &self.handle)
            .field("queue_family_index", &self.queue_family_index)
            .field("queue_index", &self.queue_index)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// Whether a queue is executing work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Everything submitted to the queue has completed.
    Idle,

    /// The last submission to the queue, which signals `value`, might still execute.
    Submitted { value: u64 },
}

/// Parameters to present a swapchain image.
#[derive(Clone, Debug)]
pub struct PresentInfo {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,

    /// Semaphores the submission waits on, usually the one that signals that the image was
    /// acquired.
    pub wait_semaphores: SmallVec<[SemaphoreSubmitInfo; 2]>,

    /// A binary semaphore that the submission signals and the present operation waits on.
    pub render_finished: vk::Semaphore,

    pub _ne: crate::NonExhaustive,
}

impl PresentInfo {
    /// Returns a `PresentInfo` with the specified `swapchain`, `image_index` and
    /// `render_finished` semaphore.
    #[inline]
    pub fn new(
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        render_finished: vk::Semaphore,
    ) -> Self {
        PresentInfo {
            swapchain,
            image_index,
            wait_semaphores: SmallVec::new(),
            render_finished,
            _ne: crate::NE,
        }
    }
}

/// How a swapchain took a present operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentStatus {
    /// The image was presented and the swapchain matches the surface.
    Optimal,

    /// The image was presented, but the swapchain no longer matches the surface exactly. It
    /// should be recreated when convenient.
    Suboptimal,

    /// The swapchain no longer matches the surface and can't be presented to. It must be
    /// recreated before the next frame.
    OutOfDate,
}

impl PresentStatus {
    /// Returns whether the swapchain should be recreated.
    #[inline]
    pub fn needs_recreation(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

/// The result of [`SubmissionQueue::present`].
#[derive(Debug)]
pub struct PresentOutcome {
    /// The submission that preceded the present operation.
    pub token: SubmitToken,
    pub status: PresentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::{CommandBufferAccess, CommandRecordingContextCreateInfo};
    use ash::vk::Handle;
    use std::time::Duration;

    fn context(device: &Arc<Device>) -> CommandRecordingContext {
        CommandRecordingContext::new(device.clone(), Default::default()).unwrap()
    }

    #[test]
    fn second_submit_is_skipped() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let token = queue.submit(&mut context, &[]).unwrap();
        assert!(token.is_some());
        assert!(queue.submit(&mut context, &[]).unwrap().is_none());
        assert_eq!(backend.submissions().len(), 1);
        assert_eq!(device.timeline().allocate_value(), 2);
    }

    #[test]
    fn submission_contents() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);
        let acquired = vk::Semaphore::from_raw(0xacc);
        let wait = SemaphoreSubmitInfo::binary(
            acquired,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        );

        let handle = context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let token = queue.submit(&mut context, &[wait]).unwrap().unwrap();

        let submissions = backend.submissions();
        let submission = &submissions[0];
        assert_eq!(submission.queue, queue.handle());
        assert_eq!(submission.fence, token.fence());
        assert_eq!(submission.info.command_buffers, [handle.handle()]);
        assert_eq!(submission.info.wait_semaphores.as_slice(), [wait]);
        assert_eq!(submission.info.timeline_value(), token.timeline_value());
        assert_eq!(
            submission.info.signal_semaphores[0].semaphore,
            device.timeline().semaphore(),
        );
    }

    #[test]
    fn signal_values_increase() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);
        let mut previous = 0;

        for _ in 0..40 {
            context.begin_scope(CommandBufferAccess::primary()).unwrap();
            let token = queue.submit(&mut context, &[]).unwrap().unwrap();
            assert!(token.timeline_value() > previous);
            previous = token.timeline_value();
        }

        backend.complete_all();
        context.reset().unwrap();
        assert_eq!(device.timeline().observed_value().unwrap(), previous);
    }

    #[test]
    fn queues_signal_in_submission_order() {
        let (backend, device) = null_device!();
        let queues = [
            SubmissionQueue::new(device.clone(), 0, 0),
            SubmissionQueue::new(device.clone(), 0, 1),
        ];

        // The backend panics if a submission signals a value that isn't above every value
        // signaled by the submissions still pending.
        std::thread::scope(|scope| {
            for queue in &queues {
                let device = &device;

                scope.spawn(move || {
                    let mut context = context(device);

                    for _ in 0..32 {
                        context.begin_scope(CommandBufferAccess::primary()).unwrap();
                        queue.submit(&mut context, &[]).unwrap().unwrap();
                    }
                });
            }
        });

        let values: Vec<_> = backend
            .submissions()
            .iter()
            .map(|submission| submission.info.timeline_value())
            .collect();
        assert_eq!(values.len(), 64);
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn failed_fence_creation_keeps_pending_work() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);

        let cb = context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let handle = cb.handle();
        drop(cb);

        backend.fail_fence_creation(VulkanError::OutOfHostMemory);
        assert_eq!(
            queue.submit(&mut context, &[]).unwrap_err(),
            VulkanError::OutOfHostMemory,
        );
        assert!(backend.submissions().is_empty());

        let token = queue.submit(&mut context, &[]).unwrap().unwrap();
        let submissions = backend.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].info.command_buffers, [handle]);
        assert_eq!(submissions[0].info.timeline_value(), token.timeline_value());
    }

    #[test]
    fn state_transitions() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);
        assert_eq!(queue.state().unwrap(), QueueState::Idle);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let token = queue.submit(&mut context, &[]).unwrap().unwrap();
        assert_eq!(
            queue.state().unwrap(),
            QueueState::Submitted {
                value: token.timeline_value(),
            },
        );

        backend.complete_all();
        assert_eq!(queue.state().unwrap(), QueueState::Idle);
    }

    #[test]
    fn wait_idle_runs_callbacks() {
        let (_backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let token = queue.submit(&mut context, &[]).unwrap().unwrap();
        assert!(!token.is_complete().unwrap());

        queue.wait_idle().unwrap();
        assert!(token.is_complete().unwrap());
        assert_eq!(queue.state().unwrap(), QueueState::Idle);

        context.cleanup_finished().unwrap();
        assert_eq!(context.free_batches(crate::CommandBufferLevel::Primary), 1);
    }

    #[test]
    fn present_classification() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);
        let swapchain = vk::SwapchainKHR::from_raw(0x5c);
        let render_finished = vk::Semaphore::from_raw(0xf1);

        backend.queue_present_result(Ok(PresentStatus::Suboptimal));
        backend.queue_present_result(Ok(PresentStatus::OutOfDate));
        backend.queue_present_result(Err(VulkanError::SurfaceLost));

        let mut statuses = Vec::new();

        for image_index in 0..3 {
            context.begin_scope(CommandBufferAccess::primary()).unwrap();
            let outcome = queue.present(
                &mut context,
                PresentInfo::new(swapchain, image_index, render_finished),
            );
            statuses.push(outcome.map(|outcome| outcome.status));
        }

        assert_eq!(
            statuses,
            [
                Ok(PresentStatus::Suboptimal),
                Ok(PresentStatus::OutOfDate),
                Err(VulkanError::SurfaceLost),
            ],
        );
        assert!(statuses[0].unwrap().needs_recreation());

        let outcome = queue
            .present(&mut context, PresentInfo::new(swapchain, 0, render_finished))
            .unwrap();
        assert_eq!(outcome.status, PresentStatus::Optimal);
        assert!(!outcome.status.needs_recreation());

        let presents = backend.presents();
        assert_eq!(presents.len(), 4);
        assert_eq!(presents[1].image_index, 1);
        assert_eq!(presents[1].wait_semaphores, [render_finished]);

        // Presenting with nothing recorded still signals `render_finished`.
        let submissions = backend.submissions();
        assert_eq!(submissions.len(), 4);
        assert!(submissions[3].info.command_buffers.is_empty());
        assert_eq!(submissions[3].info.signal_semaphores[0].semaphore, render_finished);
    }

    #[test]
    fn claims_are_released() {
        let (_backend, device) = null_device!();

        drop(SubmissionQueue::new(device.clone(), 0, 0));
        let _queue = SubmissionQueue::new(device.clone(), 0, 0);
        let _other = SubmissionQueue::new(device, 1, 0);
    }

    #[test]
    #[should_panic = "already in use"]
    fn claim_twice() {
        let (_backend, device) = null_device!();

        let _queue = SubmissionQueue::new(device.clone(), 0, 0);
        let _ = SubmissionQueue::new(device, 0, 0);
    }

    #[test]
    #[should_panic = "another queue family"]
    fn foreign_queue_family() {
        let (_backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 1, 0);
        let mut context = CommandRecordingContext::new(
            device,
            CommandRecordingContextCreateInfo {
                queue_family_index: 0,
                ..Default::default()
            },
        )
        .unwrap();

        let _ = queue.submit(&mut context, &[]);
    }

    #[test]
    fn token_wait() {
        let (_backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = context(&device);

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let token = queue.submit(&mut context, &[]).unwrap().unwrap();
        assert!(token.wait(Some(Duration::from_secs(1))).unwrap());
        assert!(token.is_complete().unwrap());
        assert!(device.timeline().observed_value().unwrap() >= token.timeline_value());
    }
}
