// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{backend::DeviceBackend, VulkanError};
use ash::vk;
use crossbeam_queue::SegQueue;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Passing this to [`TimelineRegistry::process_callbacks`] runs every callback regardless of its
/// value. This must only be done once the device is idle.
pub const DRAIN_ALL: u64 = u64::MAX;

/// The timeline of a device: a monotonic counter mirrored by a timeline semaphore, and the work
/// that waits for the GPU to reach a given value of it.
///
/// Every submission signals the semaphore with a value obtained from [`next_signal_value`], so
/// once the semaphore has reached a value, every submission that signaled a smaller value has
/// completed as well.
///
/// [`next_signal_value`]: Self::next_signal_value
pub struct TimelineRegistry {
    backend: Arc<dyn DeviceBackend>,
    semaphore: vk::Semaphore,
    next_value: AtomicU64,
    callbacks: SegQueue<TimelineCallback>,
}

struct TimelineCallback {
    value: u64,
    callback: Box<dyn FnOnce() + Send>,
}

impl TimelineRegistry {
    pub(crate) fn new(backend: Arc<dyn DeviceBackend>) -> Result<Self, VulkanError> {
        let semaphore = unsafe { backend.create_timeline_semaphore(0) }
            .inspect_err(|err| tracing::error!("failed to create the timeline semaphore: {err}"))?;

        Ok(TimelineRegistry {
            backend,
            semaphore,
            next_value: AtomicU64::new(1),
            callbacks: SegQueue::new(),
        })
    }

    /// Returns the timeline semaphore.
    #[inline]
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Returns the value that the next submission will signal, without reserving it.
    ///
    /// Work that is registered at this value runs no earlier than after the next submission.
    #[inline]
    pub fn allocate_value(&self) -> u64 {
        self.next_value.load(Ordering::Acquire)
    }

    /// Reserves the next value to signal. Every call returns a value larger than all previous
    /// ones.
    #[inline]
    pub fn next_signal_value(&self) -> u64 {
        self.next_value.fetch_add(1, Ordering::AcqRel)
    }

    /// Registers a function to run once the GPU has reached `value`.
    ///
    /// The function runs from whichever thread next processes callbacks with a value of at least
    /// `value`, which might be a different thread than the calling one.
    #[inline]
    pub fn add_callback(&self, value: u64, callback: impl FnOnce() + Send + 'static) {
        self.callbacks.push(TimelineCallback {
            value,
            callback: Box::new(callback),
        });
    }

    /// Returns the number of callbacks that haven't run yet.
    #[inline]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// Blocks the current thread until the GPU has reached `value`. Returns `false` if `timeout`
    /// elapsed first.
    ///
    /// Callbacks are not run, see [`poll`](Self::poll).
    pub fn wait(&self, value: u64, timeout: Duration) -> Result<bool, VulkanError> {
        if value == 0 {
            return Ok(true);
        }

        unsafe { self.backend.wait_semaphore(self.semaphore, value, timeout) }
            .inspect_err(|err| tracing::error!("failed to wait for the timeline semaphore: {err}"))
    }

    /// Returns the value the GPU has reached.
    pub fn observed_value(&self) -> Result<u64, VulkanError> {
        unsafe { self.backend.semaphore_counter_value(self.semaphore) }
            .inspect_err(|err| tracing::error!("failed to query the timeline semaphore: {err}"))
    }

    /// Runs every callback registered at a value of at most `up_to`, as long as it was
    /// registered before this call.
    ///
    /// `up_to` must not exceed the value the GPU has reached, except for [`DRAIN_ALL`] once the
    /// device is idle. Each callback runs exactly once even if several threads process callbacks
    /// concurrently.
    pub fn process_callbacks(&self, up_to: u64) {
        // Callbacks that are not ready are requeued, so only visit what was there to begin with.
        let count = self.callbacks.len();
        let mut invoked = 0;

        for _ in 0..count {
            let Some(entry) = self.callbacks.pop() else {
                break;
            };

            if entry.value <= up_to {
                (entry.callback)();
                invoked += 1;
            } else {
                self.callbacks.push(entry);
            }
        }

        if invoked != 0 {
            tracing::trace!(up_to, invoked, "ran timeline callbacks");
        }
    }

    /// Queries the value the GPU has reached and runs the callbacks registered up to it. Returns
    /// the value.
    pub fn poll(&self) -> Result<u64, VulkanError> {
        let observed = self.observed_value()?;
        self.process_callbacks(observed);

        Ok(observed)
    }
}

impl Drop for TimelineRegistry {
    fn drop(&mut self) {
        unsafe { self.backend.destroy_semaphore(self.semaphore) };
    }
}

impl fmt::Debug for TimelineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineRegistry")
            .field("semaphore", &self.semaphore)
            .field("next_value", &self.next_value)
            .field("pending_callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}
