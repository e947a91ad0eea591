// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{device::Device, VulkanError};
use ash::vk;
use std::{sync::Arc, time::Duration};

/// Proof of a submission, returned by [`SubmissionQueue::submit`].
///
/// The token owns a fence that the submission signals. The fence is only there for the host to
/// wait on this particular submission: once the device's timeline has reached
/// [`timeline_value`], the submission has completed as well.
///
/// Dropping the token doesn't wait. If the submission is still executing, destroying the fence
/// is deferred until the timeline reaches the submission's value.
///
/// [`SubmissionQueue::submit`]: crate::queue::SubmissionQueue::submit
/// [`timeline_value`]: Self::timeline_value
#[derive(Debug)]
#[must_use = "dropping the token doesn't wait for the submission to complete"]
pub struct SubmitToken {
    device: Arc<Device>,
    fence: vk::Fence,
    timeline_value: u64,
}

impl SubmitToken {
    pub(crate) fn new(device: Arc<Device>, fence: vk::Fence, timeline_value: u64) -> Self {
        SubmitToken {
            device,
            fence,
            timeline_value,
        }
    }

    #[inline]
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Returns the timeline value the submission signals.
    #[inline]
    pub fn timeline_value(&self) -> u64 {
        self.timeline_value
    }

    /// Blocks until the submission has completed. Returns `false` if `timeout` elapsed first.
    ///
    /// If `timeout` is `None`, the device's wait timeout is used.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool, VulkanError> {
        let timeout = timeout.unwrap_or_else(|| self.device.wait_timeout());

        unsafe { self.device.backend().wait_fence(self.fence, timeout) }
            .inspect_err(|err| tracing::error!("failed to wait for a fence: {err}"))
    }

    /// Returns whether the submission has completed, without blocking.
    pub fn is_complete(&self) -> Result<bool, VulkanError> {
        unsafe { self.device.backend().fence_status(self.fence) }
            .inspect_err(|err| tracing::error!("failed to query a fence: {err}"))
    }
}

impl Drop for SubmitToken {
    fn drop(&mut self) {
        let backend = self.device.backend_arc();

        match self.is_complete() {
            Ok(true) => unsafe { backend.destroy_fence(self.fence) },
            // The fence outlives the token. The callback only keeps the backend alive, not the
            // device, which would otherwise be kept alive by its own timeline.
            _ => {
                let backend = backend.clone();
                let fence = self.fence;
                self.device
                    .add_timeline_callback(self.timeline_value, move || unsafe {
                        backend.destroy_fence(fence)
                    });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command_buffer::{CommandBufferAccess, CommandRecordingContext},
        queue::SubmissionQueue,
    };

    #[test]
    fn drop_completed_token() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = CommandRecordingContext::new(device.clone(), Default::default()).unwrap();

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let token = queue.submit(&mut context, &[]).unwrap().unwrap();
        assert!(token.wait(None).unwrap());
        assert_eq!(backend.live_fences(), 1);

        drop(token);
        assert_eq!(backend.live_fences(), 0);
    }

    #[test]
    fn drop_pending_token() {
        let (backend, device) = null_device!();
        let queue = SubmissionQueue::new(device.clone(), 0, 0);
        let mut context = CommandRecordingContext::new(device.clone(), Default::default()).unwrap();

        context.begin_scope(CommandBufferAccess::primary()).unwrap();
        let token = queue.submit(&mut context, &[]).unwrap().unwrap();
        drop(token);
        assert_eq!(backend.live_fences(), 1);

        device.poll_timeline().unwrap();
        assert_eq!(backend.live_fences(), 1);

        backend.complete_all();
        device.poll_timeline().unwrap();
        assert_eq!(backend.live_fences(), 0);
    }
}
