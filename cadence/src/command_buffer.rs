// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Recording of commands into reusable command buffers.
//!
//! Command buffers are never allocated one by one. A [`CommandBufferPool`] allocates them in
//! fixed-size [`CommandBufferBatch`]es, and a [`CommandRecordingContext`] hands out the slots of
//! those batches to recording scopes. A batch is only reset and reused once the submission that
//! contained it has retired, which the context learns through the device's timeline.
//!
//! A context is bound to one queue family and to the thread that records with it. To record on
//! several threads, create one context per thread and either submit each of them, or record
//! secondary command buffers and [`execute`] them from a primary context.
//!
//! [`execute`]: CommandRecordingContext::execute

pub use self::{
    batch::CommandBufferBatch,
    context::{CommandRecordingContext, CommandRecordingContextCreateInfo},
    pool::CommandBufferPool,
};
use ash::vk;
use crossbeam_queue::SegQueue;
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

pub mod batch;
pub mod context;
pub mod pool;

/// The level of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CommandBufferLevel {
    /// A primary command buffer can be submitted to a queue.
    Primary = vk::CommandBufferLevel::PRIMARY.as_raw(),

    /// A secondary command buffer can only be executed from a primary command buffer.
    Secondary = vk::CommandBufferLevel::SECONDARY.as_raw(),
}

impl CommandBufferLevel {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

impl From<CommandBufferLevel> for vk::CommandBufferLevel {
    #[inline]
    fn from(val: CommandBufferLevel) -> Self {
        Self::from_raw(val as i32)
    }
}

/// The render pass that a secondary command buffer is recorded to be executed within.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommandBufferInheritance {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    /// May be null if the framebuffer is not known at recording time.
    pub framebuffer: vk::Framebuffer,
}

/// Parameters to begin recording a command buffer with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandBufferBeginInfo {
    /// The command buffer will be submitted once, then reset.
    pub one_time_submit: bool,

    /// For secondary command buffers, the render pass they continue.
    pub inheritance: Option<CommandBufferInheritance>,
}

/// Describes how a recording scope wants to access a command buffer.
///
/// Two accesses are equal if they can share a recording scope: they must have the same level
/// and the same one-time-submit flag and, for secondary command buffers, continue the same render
/// pass.
#[derive(Clone, Copy, Debug)]
pub struct CommandBufferAccess {
    pub level: CommandBufferLevel,
    pub one_time_submit: bool,
    /// Ignored for primary command buffers.
    pub inheritance: Option<CommandBufferInheritance>,
}

impl CommandBufferAccess {
    /// Returns an access to a primary command buffer that is submitted once.
    #[inline]
    pub const fn primary() -> Self {
        CommandBufferAccess {
            level: CommandBufferLevel::Primary,
            one_time_submit: true,
            inheritance: None,
        }
    }

    /// Returns an access to a secondary command buffer that is executed once.
    #[inline]
    pub const fn secondary(inheritance: Option<CommandBufferInheritance>) -> Self {
        CommandBufferAccess {
            level: CommandBufferLevel::Secondary,
            one_time_submit: true,
            inheritance,
        }
    }

    pub(crate) fn begin_info(&self) -> CommandBufferBeginInfo {
        CommandBufferBeginInfo {
            one_time_submit: self.one_time_submit,
            inheritance: match self.level {
                CommandBufferLevel::Primary => None,
                CommandBufferLevel::Secondary => self.inheritance,
            },
        }
    }
}

impl PartialEq for CommandBufferAccess {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
            && self.one_time_submit == other.one_time_submit
            && (self.level == CommandBufferLevel::Primary || self.inheritance == other.inheritance)
    }
}

impl Eq for CommandBufferAccess {}

/// A command buffer that is open for recording.
///
/// The handle is returned by [`CommandRecordingContext::begin_scope`] and stays valid until the
/// scope is ended. Commands are recorded into [`handle`] with the application's own device
/// functions.
///
/// [`handle`]: Self::handle
#[derive(Clone, Debug)]
pub struct RecordingHandle {
    command_buffer: vk::CommandBuffer,
    level: CommandBufferLevel,
    hooks: Arc<CompletionHooks>,
}

impl RecordingHandle {
    pub(crate) fn new(
        command_buffer: vk::CommandBuffer,
        level: CommandBufferLevel,
        hooks: Arc<CompletionHooks>,
    ) -> Self {
        RecordingHandle {
            command_buffer,
            level,
            hooks,
        }
    }

    /// Returns the raw command buffer.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Registers a function to run once the GPU has finished executing the commands recorded
    /// into this command buffer.
    ///
    /// If the command buffer is never submitted, the function runs when the recording context
    /// is dropped.
    #[inline]
    pub fn on_completion(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }
}

pub(crate) type CompletionHook = Box<dyn FnOnce() + Send>;

/// Functions to run when a command buffer retires, collected while recording.
#[derive(Default)]
pub(crate) struct CompletionHooks {
    queue: SegQueue<CompletionHook>,
}

impl CompletionHooks {
    pub(crate) fn push(&self, hook: CompletionHook) {
        self.queue.push(hook);
    }

    pub(crate) fn drain(&self) -> impl Iterator<Item = CompletionHook> + '_ {
        std::iter::from_fn(|| self.queue.pop())
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for CompletionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHooks")
            .field("len", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// A semaphore operation of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreSubmitInfo {
    pub semaphore: vk::Semaphore,

    /// The value to wait for or to signal. Must be 0 for binary semaphores.
    pub value: u64,

    /// For waits, the stages that wait. Ignored for signals.
    pub stages: vk::PipelineStageFlags,
}

impl SemaphoreSubmitInfo {
    /// Returns a wait on or a signal of a binary semaphore.
    #[inline]
    pub fn binary(semaphore: vk::Semaphore, stages: vk::PipelineStageFlags) -> Self {
        SemaphoreSubmitInfo {
            semaphore,
            value: 0,
            stages,
        }
    }

    /// Returns a wait on or a signal of a timeline semaphore.
    #[inline]
    pub fn timeline(semaphore: vk::Semaphore, value: u64, stages: vk::PipelineStageFlags) -> Self {
        SemaphoreSubmitInfo {
            semaphore,
            value,
            stages,
        }
    }
}

/// Everything a single queue submission consists of.
///
/// Built right before the submission and consumed by it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Semaphores to wait on before executing, in order.
    pub wait_semaphores: SmallVec<[SemaphoreSubmitInfo; 4]>,

    /// Semaphores to signal once execution is complete, in order.
    pub signal_semaphores: SmallVec<[SemaphoreSubmitInfo; 4]>,

    /// The primary command buffers to execute, in order.
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl SubmitInfo {
    /// Returns the largest value that the submission signals, which is the timeline value the
    /// submission completes at. Returns 0 if nothing is signaled.
    #[inline]
    pub fn timeline_value(&self) -> u64 {
        self.signal_semaphores
            .iter()
            .map(|signal| signal.value)
            .max()
            .unwrap_or(0)
    }

    /// Returns whether the submission has no command buffers to execute.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn access_equality() {
        let inheritance = CommandBufferInheritance {
            render_pass: vk::RenderPass::from_raw(1),
            subpass: 0,
            framebuffer: vk::Framebuffer::null(),
        };
        let other_subpass = CommandBufferInheritance {
            subpass: 1,
            ..inheritance
        };

        assert_eq!(CommandBufferAccess::primary(), CommandBufferAccess::primary());
        assert_eq!(
            CommandBufferAccess::primary(),
            CommandBufferAccess {
                inheritance: Some(inheritance),
                ..CommandBufferAccess::primary()
            },
        );
        assert_ne!(
            CommandBufferAccess::primary(),
            CommandBufferAccess {
                one_time_submit: false,
                ..CommandBufferAccess::primary()
            },
        );
        assert_ne!(
            CommandBufferAccess::primary(),
            CommandBufferAccess::secondary(None),
        );
        assert_ne!(
            CommandBufferAccess::secondary(Some(inheritance)),
            CommandBufferAccess::secondary(Some(other_subpass)),
        );
    }

    #[test]
    fn timeline_value_is_largest_signal() {
        let mut submit_info = SubmitInfo::default();
        assert_eq!(submit_info.timeline_value(), 0);
        assert!(submit_info.is_empty());

        submit_info.signal_semaphores.extend([
            SemaphoreSubmitInfo::binary(
                vk::Semaphore::from_raw(1),
                vk::PipelineStageFlags::empty(),
            ),
            SemaphoreSubmitInfo::timeline(
                vk::Semaphore::from_raw(2),
                7,
                vk::PipelineStageFlags::empty(),
            ),
        ]);
        assert_eq!(submit_info.timeline_value(), 7);
    }

    #[test]
    fn hooks_run_once() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let counter = Arc::new(AtomicU32::new(0));
        let hooks = Arc::new(CompletionHooks::default());
        let handle = RecordingHandle::new(
            vk::CommandBuffer::from_raw(1),
            CommandBufferLevel::Primary,
            hooks.clone(),
        );

        for _ in 0..3 {
            let counter = counter.clone();
            handle.on_completion(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(hooks.len(), 3);

        hooks.drain().for_each(|hook| hook());
        hooks.drain().for_each(|hook| hook());
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }
}
