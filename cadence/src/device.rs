// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The top-level object: a device with its timeline.
//!
//! A [`Device`] owns the [`DeviceBackend`] and the [`TimelineRegistry`] of the device. Every
//! other object of this crate keeps an `Arc<Device>`, the device keeps none of them, so the
//! device is destroyed after everything that was created from it.
//!
//! ```no_run
//! use cadence::{backend::null::NullBackend, Device, DeviceCreateInfo};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(NullBackend::new());
//! let device = Device::new(backend, DeviceCreateInfo::default()).unwrap();
//!
//! // Keep a buffer alive until everything submitted so far has completed.
//! let staging = vec![0u8; 1024];
//! device.destroy_after(device.timeline().allocate_value(), staging);
//! ```

use crate::{
    backend::{DeviceBackend, DeviceProperties},
    sync::timeline::{TimelineRegistry, DRAIN_ALL},
    VulkanError, NE,
};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use std::{fmt, sync::Arc, time::Duration};

/// A device and its timeline.
pub struct Device {
    backend: Arc<dyn DeviceBackend>,
    timeline: TimelineRegistry,
    claimed_queues: Mutex<SmallVec<[(u32, u32); 8]>>,
    // Held from reserving a signal value until the submission that signals it is made.
    submissions: Mutex<()>,
    wait_timeout: Duration,
}

impl Device {
    /// Creates a new `Device` on top of a backend, creating the timeline semaphore.
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        create_info: DeviceCreateInfo,
    ) -> Result<Arc<Device>, VulkanError> {
        let DeviceCreateInfo {
            wait_timeout,
            _ne: _,
        } = create_info;

        let timeline = TimelineRegistry::new(backend.clone())?;

        tracing::debug!(properties = ?backend.properties(), "created device");

        Ok(Arc::new(Device {
            backend,
            timeline,
            claimed_queues: Mutex::new(SmallVec::new()),
            submissions: Mutex::new(()),
            wait_timeout,
        }))
    }

    #[inline]
    pub fn backend(&self) -> &dyn DeviceBackend {
        &*self.backend
    }

    pub(crate) fn backend_arc(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    #[inline]
    pub fn properties(&self) -> &DeviceProperties {
        self.backend.properties()
    }

    #[inline]
    pub fn timeline(&self) -> &TimelineRegistry {
        &self.timeline
    }

    /// Returns how long blocking operations wait when no timeout is given explicitly.
    #[inline]
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Registers a function to run once the GPU has reached `value` on the device's timeline.
    #[inline]
    pub fn add_timeline_callback(&self, value: u64, callback: impl FnOnce() + Send + 'static) {
        self.timeline.add_callback(value, callback);
    }

    /// Runs the timeline callbacks registered at a value of at most `up_to`.
    ///
    /// `up_to` must not exceed the value the GPU has reached. Usually you want
    /// [`poll_timeline`](Self::poll_timeline) instead.
    #[inline]
    pub fn process_timeline_callbacks(&self, up_to: u64) {
        self.timeline.process_callbacks(up_to);
    }

    /// Runs the timeline callbacks the GPU has reached, returning the value it reached.
    #[inline]
    pub fn poll_timeline(&self) -> Result<u64, VulkanError> {
        self.timeline.poll()
    }

    /// Blocks until the GPU has reached `value`, then runs the callbacks it reached. Returns
    /// `false` if `timeout` elapsed first.
    pub fn wait_timeline(&self, value: u64, timeout: Duration) -> Result<bool, VulkanError> {
        if !self.timeline.wait(value, timeout)? {
            return Ok(false);
        }

        self.timeline.poll()?;

        Ok(true)
    }

    /// Keeps `object` alive until the GPU has reached `value`, then drops it.
    ///
    /// This is meant for objects that submitted work may still use, such as buffers that are
    /// replaced while a frame is in flight.
    #[inline]
    pub fn destroy_after<T: Send + 'static>(&self, value: u64, object: T) {
        self.timeline.add_callback(value, move || drop(object));
    }

    /// Waits until the device is idle, then runs every timeline callback the GPU has reached.
    pub fn wait_idle(&self) -> Result<(), VulkanError> {
        unsafe { self.backend.device_wait_idle() }
            .inspect_err(|err| tracing::error!("failed to wait for the device to be idle: {err}"))?;

        self.timeline.poll()?;

        Ok(())
    }

    pub(crate) fn lock_submissions(&self) -> MutexGuard<'_, ()> {
        self.submissions.lock()
    }

    /// # Panics
    ///
    /// - Panics if the queue is already claimed.
    pub(crate) fn claim_queue(&self, queue_family_index: u32, queue_index: u32) {
        let mut claimed_queues = self.claimed_queues.lock();
        let key = (queue_family_index, queue_index);

        assert!(
            !claimed_queues.contains(&key),
            "queue {queue_index} of queue family {queue_family_index} is already in use by \
            another `SubmissionQueue`",
        );

        claimed_queues.push(key);
    }

    pub(crate) fn release_queue(&self, queue_family_index: u32, queue_index: u32) {
        self.claimed_queues
            .lock()
            .retain(|&mut key| key != (queue_family_index, queue_index));
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.backend.device_wait_idle() } {
            tracing::error!("failed to wait for the device to be idle while dropping it: {err}");
        }

        // Everything that was submitted has completed, or the device is lost. Either way nothing
        // is going to signal the timeline anymore.
        self.timeline.process_callbacks(DRAIN_ALL);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend)
            .field("timeline", &self.timeline)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

/// Parameters to create a new `Device`.
#[derive(Clone, Debug)]
pub struct DeviceCreateInfo {
    /// How long blocking operations such as [`CommandRecordingContext::reset`] wait before
    /// reporting a timeout.
    ///
    /// The default value is 10 seconds.
    ///
    /// [`CommandRecordingContext::reset`]: crate::command_buffer::CommandRecordingContext::reset
    pub wait_timeout: Duration,

    pub _ne: crate::NonExhaustive,
}

impl Default for DeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        DeviceCreateInfo {
            wait_timeout: Duration::from_secs(10),
            _ne: NE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn destroy_after() {
        let (backend, device) = null_device!();

        struct Flag(Arc<AtomicBool>);

        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::Relaxed);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        device.destroy_after(2, Flag(dropped.clone()));

        backend.signal_semaphore(device.timeline().semaphore(), 1);
        device.poll_timeline().unwrap();
        assert!(!dropped.load(Ordering::Relaxed));

        backend.signal_semaphore(device.timeline().semaphore(), 2);
        device.poll_timeline().unwrap();
        assert!(dropped.load(Ordering::Relaxed));
    }

    #[test]
    fn drop_drains_callbacks() {
        let (backend, device) = null_device!();
        let ran = Arc::new(AtomicBool::new(false));

        {
            let ran = ran.clone();
            device.add_timeline_callback(1000, move || ran.store(true, Ordering::Relaxed));
        }

        drop(device);
        assert!(ran.load(Ordering::Relaxed));
        assert_eq!(backend.live_semaphores(), 0);
    }

    #[test]
    fn wait_timeline_runs_callbacks() {
        let (backend, device) = null_device!();
        let ran = Arc::new(AtomicBool::new(false));

        {
            let ran = ran.clone();
            device.add_timeline_callback(1, move || ran.store(true, Ordering::Relaxed));
        }

        assert!(!device.wait_timeline(1, Duration::ZERO).unwrap());
        assert!(!ran.load(Ordering::Relaxed));

        backend.signal_semaphore(device.timeline().semaphore(), 1);
        assert!(device.wait_timeline(1, Duration::ZERO).unwrap());
        assert!(ran.load(Ordering::Relaxed));
    }

    #[test]
    #[should_panic = "already in use"]
    fn claim_twice() {
        let (_backend, device) = null_device!();
        device.claim_queue(0, 0);
        device.claim_queue(0, 1);
        device.claim_queue(0, 0);
    }

    #[test]
    fn release_claim() {
        let (_backend, device) = null_device!();
        device.claim_queue(0, 0);
        device.release_queue(0, 0);
        device.claim_queue(0, 0);
    }
}
