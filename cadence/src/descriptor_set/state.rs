// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    ring::DescriptorSetRing, BindTarget, DescriptorData, DescriptorSetLayoutInfo,
    DescriptorType, DescriptorUpdateEntry, UpdateTemplateInfo,
};
use crate::{backend::DeviceBackend, command_buffer::RecordingHandle, VulkanError};
use ash::vk;
use rangemap::RangeSet;
use smallvec::SmallVec;
use std::sync::Arc;

/// Whether the bindings of a [`DescriptorSetState`] were written since it was last rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingStatus {
    /// The current descriptor set, or the pushed data, matches the bindings.
    Ready,
    /// Bindings changed, the next bind rebuilds the set.
    Dirty,
}

/// The bindings of one instance of a descriptor set of a pipeline.
///
/// Writes go to a flattened buffer laid out the way a descriptor update template reads it, one
/// slot per binding. Which array elements have been written is tracked per binding, and the
/// update template covers exactly those elements. The template is recompiled only when an
/// element is written for the first time.
#[derive(Debug)]
pub struct DescriptorSetState {
    backend: Arc<dyn DeviceBackend>,
    layout: Arc<DescriptorSetLayoutInfo>,
    target: BindTarget,
    status: BindingStatus,
    slots: SmallVec<[BindingSlot; 8]>,
    data: Vec<u8>,
    // Command buffers that pushed with the template keep it alive until they retire.
    template: Option<Arc<UpdateTemplate>>,
    template_stale: bool,
    // `None` for push descriptor layouts.
    ring: Option<DescriptorSetRing>,
}

#[derive(Debug)]
struct UpdateTemplate {
    backend: Arc<dyn DeviceBackend>,
    handle: vk::DescriptorUpdateTemplate,
}

impl Drop for UpdateTemplate {
    fn drop(&mut self) {
        unsafe { self.backend.destroy_update_template(self.handle) };
    }
}

#[derive(Debug)]
struct BindingSlot {
    binding: u32,
    descriptor_type: DescriptorType,
    count: u32,
    offset: usize,
    stride: usize,
    occupied: RangeSet<u32>,
}

impl DescriptorSetState {
    pub(crate) fn new(
        backend: Arc<dyn DeviceBackend>,
        layout: Arc<DescriptorSetLayoutInfo>,
        target: BindTarget,
    ) -> Self {
        let mut size = 0usize;
        let slots = layout
            .bindings
            .iter()
            .map(|binding| {
                let stride = binding.descriptor_type.stride();
                let offset = size.next_multiple_of(8);
                size = offset + stride * binding.descriptor_count as usize;

                BindingSlot {
                    binding: binding.binding,
                    descriptor_type: binding.descriptor_type,
                    count: binding.descriptor_count,
                    offset,
                    stride,
                    occupied: RangeSet::new(),
                }
            })
            .collect();

        let ring =
            (!layout.push_descriptor).then(|| DescriptorSetRing::new(backend.clone(), &layout));

        DescriptorSetState {
            backend,
            layout,
            target,
            status: BindingStatus::Dirty,
            slots,
            data: vec![0; size],
            template: None,
            template_stale: false,
            ring,
        }
    }

    #[inline]
    pub fn status(&self) -> BindingStatus {
        self.status
    }

    #[inline]
    pub fn layout(&self) -> &Arc<DescriptorSetLayoutInfo> {
        &self.layout
    }

    /// Returns the flattened bindings, as the update template reads them.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the descriptor set the next draw binds, if the set isn't a push descriptor set
    /// and has been built.
    #[inline]
    pub fn current_set(&self) -> Option<vk::DescriptorSet> {
        self.ring.as_ref()?.current().map(|(set, _)| set)
    }

    /// Writes consecutive array elements of the binding at `position` in the layout, starting at
    /// `first_element`. For inline uniform blocks, elements are bytes.
    ///
    /// # Panics
    ///
    /// - Panics if an element of `data` can't be written to the binding's descriptor type.
    /// - Panics if the elements go past the end of the binding.
    pub(crate) fn write(&mut self, position: usize, first_element: u32, data: &[DescriptorData]) {
        let slot = &mut self.slots[position];
        let name = &self.layout.bindings[position].name;
        let mut element = first_element;

        for datum in data {
            assert!(
                datum.is_compatible_with(slot.descriptor_type),
                "binding `{name}` has type {:?}, which {datum:?} can't be written to",
                slot.descriptor_type,
            );

            let count = datum.element_count();
            let end = element
                .checked_add(count)
                .filter(|&end| end <= slot.count)
                .unwrap_or_else(|| {
                    panic!(
                        "binding `{name}` has {} elements, but element {} was written",
                        slot.count,
                        element as u64 + count as u64 - 1,
                    )
                });

            let start = slot.offset + element as usize * slot.stride;
            datum.write_to(&mut self.data[start..start + count as usize * slot.stride]);

            let range = element..end;
            if !range.is_empty() {
                if slot.occupied.gaps(&range).next().is_some() {
                    self.template_stale = true;
                }

                slot.occupied.insert(range);
            }

            element = end;
        }

        self.status = BindingStatus::Dirty;
    }

    /// Writes the bindings to a descriptor set that the GPU doesn't use, which becomes the
    /// current set. For push descriptor sets, only the template is brought up to date.
    pub(crate) fn rebuild(&mut self) -> Result<(), VulkanError> {
        if self.template_stale {
            self.compile_template()?;
        }

        if let Some(ring) = &mut self.ring {
            let set = ring.next_set()?;

            if let Some(template) = &self.template {
                // SAFETY: The set was never written since its pool was last reset, so no command
                // buffer references it.
                unsafe {
                    self.backend
                        .update_descriptor_set(set, template.handle, &self.data)
                };
            }
        }

        self.status = BindingStatus::Ready;

        Ok(())
    }

    fn compile_template(&mut self) -> Result<(), VulkanError> {
        let entries: SmallVec<[DescriptorUpdateEntry; 8]> = self
            .slots
            .iter()
            .flat_map(|slot| {
                slot.occupied.iter().map(move |range| DescriptorUpdateEntry {
                    binding: slot.binding,
                    first_array_element: range.start,
                    descriptor_count: range.end - range.start,
                    descriptor_type: slot.descriptor_type,
                    offset: slot.offset + range.start as usize * slot.stride,
                    stride: slot.stride,
                })
            })
            .collect();

        self.template = None;

        if !entries.is_empty() {
            let push = self.ring.is_none().then_some(self.target);
            let create_info = UpdateTemplateInfo {
                entries: &entries,
                set_layout: self.layout.handle,
                push,
            };
            let handle = unsafe { self.backend.create_update_template(&create_info) }?;
            self.template = Some(Arc::new(UpdateTemplate {
                backend: self.backend.clone(),
                handle,
            }));

            tracing::trace!(
                set = self.target.set_index,
                entries = entries.len(),
                "compiled descriptor update template",
            );
        }

        self.template_stale = false;

        Ok(())
    }

    /// Binds the current set to the command buffer, or pushes the bindings into it.
    ///
    /// The set's generation, or the pushed template, stays alive until the command buffer's
    /// submission retires, even if the state is dropped before that.
    pub(crate) fn bind(&self, command_buffer: &RecordingHandle) {
        debug_assert_eq!(self.status, BindingStatus::Ready);

        let BindTarget {
            bind_point,
            pipeline_layout,
            set_index,
        } = self.target;

        match &self.ring {
            Some(ring) => {
                let Some((set, pool)) = ring.current() else {
                    return;
                };

                let reference = pool.acquire();
                command_buffer.on_completion(move || reference.release());

                // SAFETY: The command buffer is recording, and the set stays valid until the
                // completion hook runs.
                unsafe {
                    self.backend.cmd_bind_descriptor_set(
                        command_buffer.handle(),
                        bind_point,
                        pipeline_layout,
                        set_index,
                        set,
                    )
                };
            }
            None => {
                if let Some(template) = &self.template {
                    unsafe {
                        self.backend.cmd_push_descriptor_set(
                            command_buffer.handle(),
                            template.handle,
                            pipeline_layout,
                            set_index,
                            &self.data,
                        )
                    };

                    let template = template.clone();
                    command_buffer.on_completion(move || drop(template));
                }
            }
        }
    }
}
