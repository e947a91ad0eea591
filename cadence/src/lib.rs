// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Command-buffer batching and timeline-synchronized submission on top of Vulkan.
//!
//! # Brief summary
//!
//! - A [`DeviceBackend`](crate::backend::DeviceBackend) is the set of graphics-API entry points
//!   this crate consumes. [`VulkanBackend`](crate::backend::vulkan::VulkanBackend) implements it
//!   with `ash`, [`NullBackend`](crate::backend::null::NullBackend) simulates a device on the host
//!   so that the submission machinery can be exercised without a GPU.
//!
//! - The [`Device`](crate::device::Device) is the top-level object. It owns the backend and the
//!   device's [`TimelineRegistry`](crate::sync::timeline::TimelineRegistry): a single counter
//!   mirrored by a GPU timeline semaphore, plus a queue of callbacks that become safe to run once
//!   the GPU has reached a given counter value.
//!
//! - Work is recorded through a
//!   [`CommandRecordingContext`](crate::command_buffer::CommandRecordingContext). A context hands
//!   out command buffers from reusable [batches](crate::command_buffer::CommandBufferBatch) and
//!   only recycles a batch once the submission that used it has retired. Each recording thread
//!   owns its own context.
//!
//! - A [`SubmissionQueue`](crate::queue::SubmissionQueue) bundles everything a context has
//!   pending into one submission that signals the next timeline value, and returns a
//!   [`SubmitToken`](crate::sync::SubmitToken) the host can wait on.
//!
//! - A [`Pipeline`](crate::pipeline::Pipeline) keeps the descriptor bindings of every set it
//!   uses. Before a draw, [`bind_descriptor_set_auto`] rebuilds a descriptor set only if bindings
//!   changed, and keeps replaced sets alive until the GPU is done with them.
//!
//! [`bind_descriptor_set_auto`]: crate::pipeline::Pipeline::bind_descriptor_set_auto

pub use ash::vk;
use std::{error::Error, fmt};

#[macro_use]
mod tests;
pub mod backend;
pub mod command_buffer;
pub mod descriptor_set;
pub mod device;
pub mod pipeline;
pub mod queue;
pub mod sync;

pub use crate::{
    backend::DeviceBackend,
    command_buffer::{CommandBufferLevel, CommandRecordingContext, RecordingHandle},
    device::{Device, DeviceCreateInfo},
    pipeline::Pipeline,
    queue::SubmissionQueue,
};

/// Error type returned by most graphics-API calls.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VulkanError {
    NotReady,
    Timeout,
    OutOfHostMemory,
    OutOfDeviceMemory,
    InitializationFailed,
    DeviceLost,
    MemoryMapFailed,
    ExtensionNotPresent,
    FeatureNotPresent,
    TooManyObjects,
    FragmentedPool,
    OutOfPoolMemory,
    Fragmentation,
    SurfaceLost,
    OutOfDate,
    ValidationFailed,
    Unknown,
    Unnamed(ash::vk::Result),
}

impl VulkanError {
    /// Returns whether the error leaves the device usable, as opposed to errors after which the
    /// device, or the process, has to be torn down.
    #[inline]
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::NotReady | Self::Timeout | Self::OutOfDate)
    }
}

impl From<ash::vk::Result> for VulkanError {
    fn from(val: ash::vk::Result) -> VulkanError {
        match val {
            ash::vk::Result::NOT_READY => Self::NotReady,
            ash::vk::Result::TIMEOUT => Self::Timeout,
            ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            ash::vk::Result::ERROR_INITIALIZATION_FAILED => Self::InitializationFailed,
            ash::vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            ash::vk::Result::ERROR_MEMORY_MAP_FAILED => Self::MemoryMapFailed,
            ash::vk::Result::ERROR_EXTENSION_NOT_PRESENT => Self::ExtensionNotPresent,
            ash::vk::Result::ERROR_FEATURE_NOT_PRESENT => Self::FeatureNotPresent,
            ash::vk::Result::ERROR_TOO_MANY_OBJECTS => Self::TooManyObjects,
            ash::vk::Result::ERROR_FRAGMENTED_POOL => Self::FragmentedPool,
            ash::vk::Result::ERROR_OUT_OF_POOL_MEMORY => Self::OutOfPoolMemory,
            ash::vk::Result::ERROR_FRAGMENTATION => Self::Fragmentation,
            ash::vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            ash::vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            ash::vk::Result::ERROR_VALIDATION_FAILED_EXT => Self::ValidationFailed,
            ash::vk::Result::ERROR_UNKNOWN => Self::Unknown,
            _ => Self::Unnamed(val),
        }
    }
}

impl Error for VulkanError {}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VulkanError::NotReady => "a resource is not yet ready",
            VulkanError::Timeout => "an operation has not completed in the specified time",
            VulkanError::OutOfHostMemory => "a host memory allocation has failed",
            VulkanError::OutOfDeviceMemory => "a device memory allocation has failed",
            VulkanError::InitializationFailed => {
                "initialization of an object could not be completed for \
                implementation-specific reasons"
            }
            VulkanError::DeviceLost => "the logical or physical device has been lost",
            VulkanError::MemoryMapFailed => "mapping of a memory object has failed",
            VulkanError::ExtensionNotPresent => "a requested extension is not supported",
            VulkanError::FeatureNotPresent => "a requested feature is not supported",
            VulkanError::TooManyObjects => {
                "too many objects of the type have already been created"
            }
            VulkanError::FragmentedPool => {
                "a pool allocation has failed due to fragmentation of the pool's memory"
            }
            VulkanError::OutOfPoolMemory => "a pool memory allocation has failed",
            VulkanError::Fragmentation => {
                "a descriptor pool creation has failed due to fragmentation"
            }
            VulkanError::SurfaceLost => "a surface is no longer available",
            VulkanError::OutOfDate => {
                "a surface has changed in such a way that it is no longer compatible with the \
                swapchain"
            }
            VulkanError::ValidationFailed => "validation failed",
            VulkanError::Unknown => {
                "an unknown error has occurred; either the application has provided invalid \
                input, or an implementation failure has occurred"
            }
            VulkanError::Unnamed(result) => {
                return write!(f, "unnamed error, VkResult value {}", result.as_raw());
            }
        };

        f.write_str(msg)
    }
}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)] // add traits as needed
pub struct NonExhaustive(pub(crate) ());

pub(crate) const NE: NonExhaustive = NonExhaustive(());
