// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Synchronization between the host and the GPU.
//!
//! All GPU work submitted through this crate signals a single per-device timeline semaphore.
//! The [`TimelineRegistry`] hands out the values it signals and runs deferred work once the GPU
//! has reached them. Host fences only exist for the benefit of code that wants to wait on one
//! particular submission, see [`SubmitToken`].

pub use self::{
    fence::SubmitToken,
    flight::FramePacer,
    timeline::{TimelineRegistry, DRAIN_ALL},
};

pub mod fence;
pub mod flight;
pub mod timeline;
