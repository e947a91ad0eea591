// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::SubmitToken;
use crate::VulkanError;
use std::time::Duration;

/// Limits how many frames the host can record ahead of the GPU.
///
/// The pacer keeps the token of the last submission of each of the frames in flight. Before a
/// frame slot is reused, [`next_frame`] waits for the submission that last used it, so that the
/// per-frame resources of the slot can be overwritten.
///
/// ```
/// use cadence::sync::FramePacer;
/// use std::time::Duration;
///
/// let mut pacer = FramePacer::new(2, Duration::from_secs(1));
/// assert_eq!(pacer.next_frame().unwrap(), 1);
/// assert_eq!(pacer.next_frame().unwrap(), 0);
/// ```
///
/// [`next_frame`]: Self::next_frame
#[derive(Debug)]
pub struct FramePacer {
    frames: Box<[Option<SubmitToken>]>,
    current_frame: usize,
    timeout: Duration,
}

impl FramePacer {
    /// Creates a new `FramePacer`. Waits for a previous frame give up after `timeout`.
    ///
    /// # Panics
    ///
    /// - Panics if `frames_in_flight` is 0.
    pub fn new(frames_in_flight: u32, timeout: Duration) -> Self {
        assert_ne!(frames_in_flight, 0, "at least one frame must be in flight");

        FramePacer {
            frames: (0..frames_in_flight).map(|_| None).collect(),
            current_frame: 0,
            timeout,
        }
    }

    #[inline]
    pub fn frames_in_flight(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Returns the index of the current frame slot.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Moves on to the next frame slot and waits until the GPU has finished the frame that last
    /// used it. Returns the index of the slot.
    ///
    /// Returns [`VulkanError::Timeout`] if the wait timed out. The slot is current anyway, and
    /// the next call waits for the same frame again.
    pub fn next_frame(&mut self) -> Result<usize, VulkanError> {
        self.current_frame = (self.current_frame + 1) % self.frames.len();

        if let Some(token) = &self.frames[self.current_frame] {
            if !token.wait(Some(self.timeout))? {
                tracing::warn!(
                    frame = self.current_frame,
                    value = token.timeline_value(),
                    "timed out waiting for a frame in flight",
                );
                self.current_frame =
                    (self.current_frame + self.frames.len() - 1) % self.frames.len();

                return Err(VulkanError::Timeout);
            }

            self.frames[self.current_frame] = None;
        }

        Ok(self.current_frame)
    }

    /// Records the submission of the current frame. A frame can be submitted in several parts,
    /// the last one is waited on.
    pub fn submitted(&mut self, token: SubmitToken) {
        self.frames[self.current_frame] = Some(token);
    }

    /// Waits until every frame in flight has completed.
    pub fn wait_all(&mut self) -> Result<(), VulkanError> {
        for frame in self.frames.iter_mut() {
            if let Some(token) = frame {
                if !token.wait(Some(self.timeout))? {
                    return Err(VulkanError::Timeout);
                }

                *frame = None;
            }
        }

        Ok(())
    }
}
