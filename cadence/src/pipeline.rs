// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Pipelines and the descriptor bindings they draw with.
//!
//! A [`Pipeline`] doesn't create the Vulkan pipeline or its layout, the application does. What
//! the pipeline adds is binding state for each of its descriptor sets: bindings are written by
//! name with [`set_descriptor_data`], and [`bind_descriptor_set_auto`] binds a descriptor set
//! that matches the current bindings before a draw.
//!
//! Binding a set that didn't change since it was last bound only takes a shared read lock, so
//! many threads can record draws with the same pipeline at once.
//!
//! [`set_descriptor_data`]: Pipeline::set_descriptor_data
//! [`bind_descriptor_set_auto`]: Pipeline::bind_descriptor_set_auto

use crate::{
    command_buffer::RecordingHandle,
    descriptor_set::{
        BindTarget, BindingStatus, DescriptorData, DescriptorSetLayoutInfo, DescriptorSetState,
    },
    device::Device,
    VulkanError, NE,
};
use ash::vk::{self, Handle};
use foldhash::HashMap;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::{mem, sync::Arc};

pub mod cache;

/// Parameters to create a new `Pipeline`.
#[derive(Clone, Debug)]
pub struct PipelineCreateInfo {
    /// The pipeline. It must outlive the `Pipeline`.
    ///
    /// The default value is null.
    pub handle: vk::Pipeline,

    /// The layout the pipeline was created with.
    ///
    /// The default value is null.
    pub layout: vk::PipelineLayout,

    /// The default value is `vk::PipelineBindPoint::GRAPHICS`.
    pub bind_point: vk::PipelineBindPoint,

    /// The layouts of the descriptor sets of `layout`, in set number order.
    ///
    /// The default value is empty.
    pub set_layouts: Vec<Arc<DescriptorSetLayoutInfo>>,

    pub _ne: crate::NonExhaustive,
}

impl Default for PipelineCreateInfo {
    #[inline]
    fn default() -> Self {
        PipelineCreateInfo {
            handle: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            set_layouts: Vec::new(),
            _ne: NE,
        }
    }
}

/// A pipeline, together with the binding state of its descriptor sets.
#[derive(Debug)]
pub struct Pipeline {
    device: Arc<Device>,
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    descriptor_sets: Vec<DescriptorSetCategory>,
}

/// The binding states of one set number, one per instance.
#[derive(Debug)]
struct DescriptorSetCategory {
    layout: Arc<DescriptorSetLayoutInfo>,
    target: BindTarget,
    names: HashMap<String, usize>,
    instances: RwLock<Vec<Arc<RwLock<DescriptorSetState>>>>,
}

impl Pipeline {
    /// Creates a new `Pipeline`.
    ///
    /// # Panics
    ///
    /// - Panics if a set layout uses push descriptors, but `VK_KHR_push_descriptor` is not
    ///   enabled on the device.
    /// - Panics if a set layout declares a binding number or a binding name twice, or a binding
    ///   with a descriptor count of 0.
    pub fn new(device: Arc<Device>, create_info: PipelineCreateInfo) -> Arc<Pipeline> {
        let PipelineCreateInfo {
            handle,
            layout,
            bind_point,
            set_layouts,
            _ne: _,
        } = create_info;

        let descriptor_sets = set_layouts
            .into_iter()
            .enumerate()
            .map(|(set_index, set_layout)| {
                set_layout.validate();
                assert!(
                    !set_layout.push_descriptor || device.properties().push_descriptor,
                    "set {set_index} uses push descriptors, but the `khr_push_descriptor` \
                    extension is not enabled on the device",
                );

                let names = set_layout
                    .bindings
                    .iter()
                    .enumerate()
                    .map(|(position, binding)| (binding.name.clone(), position))
                    .collect();

                DescriptorSetCategory {
                    target: BindTarget {
                        bind_point,
                        pipeline_layout: layout,
                        set_index: set_index as u32,
                    },
                    layout: set_layout,
                    names,
                    instances: RwLock::new(Vec::new()),
                }
            })
            .collect();

        Arc::new(Pipeline {
            device,
            handle,
            layout,
            bind_point,
            descriptor_sets,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the number of descriptor sets of the pipeline layout.
    #[inline]
    pub fn descriptor_set_count(&self) -> u32 {
        self.descriptor_sets.len() as u32
    }

    /// Writes the binding called `name` of instance 0 of set `set`. `name` may address an array
    /// element as `name[i]`, in which case `data` is written starting at that element.
    ///
    /// # Panics
    ///
    /// - Panics if the pipeline has no set `set`, or if the set has no binding called `name`.
    /// - Panics if `data` doesn't fit the binding's type or goes past the end of the binding.
    #[inline]
    pub fn set_descriptor_data(&self, set: u32, name: &str, data: &[DescriptorData]) {
        self.set_descriptor_data_at(set, 0, name, data);
    }

    /// Same as [`set_descriptor_data`], but writes instance `array_index` of the set.
    ///
    /// Each instance is an independent set of bindings that shares the set's layout, for
    /// example one per material.
    ///
    /// [`set_descriptor_data`]: Self::set_descriptor_data
    pub fn set_descriptor_data_at(
        &self,
        set: u32,
        array_index: u32,
        name: &str,
        data: &[DescriptorData],
    ) {
        let category = self.category(set);
        let (base_name, first_element) = parse_binding_name(name);
        let &position = category.names.get(base_name).unwrap_or_else(|| {
            panic!("set {set} of the pipeline has no binding called `{base_name}`")
        });

        let state = category.instance(&self.device, array_index);
        state.write().write(position, first_element, data);
    }

    /// Binds instance 0 of set `set` to the command buffer, rebuilding the descriptor set first
    /// if its bindings changed since it was last bound.
    ///
    /// The descriptor set stays alive until the submission that carries the command buffer has
    /// completed.
    ///
    /// # Panics
    ///
    /// - Panics if the pipeline has no set `set`.
    #[inline]
    pub fn bind_descriptor_set_auto(
        &self,
        command_buffer: &RecordingHandle,
        set: u32,
    ) -> Result<(), VulkanError> {
        self.bind_descriptor_set_auto_at(command_buffer, set, 0)
    }

    /// Same as [`bind_descriptor_set_auto`], but binds instance `array_index` of the set.
    ///
    /// [`bind_descriptor_set_auto`]: Self::bind_descriptor_set_auto
    pub fn bind_descriptor_set_auto_at(
        &self,
        command_buffer: &RecordingHandle,
        set: u32,
        array_index: u32,
    ) -> Result<(), VulkanError> {
        let state = self.category(set).instance(&self.device, array_index);

        {
            let state = state.read();

            if state.status() == BindingStatus::Ready {
                state.bind(command_buffer);

                return Ok(());
            }
        }

        let mut state = state.write();

        // Another thread may have rebuilt the set while we waited for the lock.
        if state.status() == BindingStatus::Dirty {
            state.rebuild().inspect_err(|err| {
                tracing::error!(set, array_index, "failed to rebuild a descriptor set: {err}")
            })?;
        }

        RwLockWriteGuard::downgrade(state).bind(command_buffer);

        Ok(())
    }

    /// Returns the binding state of instance `array_index` of set `set`, if it was written or
    /// bound before.
    pub fn descriptor_set_state(
        &self,
        set: u32,
        array_index: u32,
    ) -> Option<Arc<RwLock<DescriptorSetState>>> {
        self.descriptor_sets
            .get(set as usize)?
            .instances
            .read()
            .get(array_index as usize)
            .cloned()
    }

    fn category(&self, set: u32) -> &DescriptorSetCategory {
        self.descriptor_sets.get(set as usize).unwrap_or_else(|| {
            panic!(
                "the pipeline has {} descriptor sets, but set {set} was used",
                self.descriptor_sets.len(),
            )
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Command buffers that bound a set keep its pool alive on their own. The states are kept
        // until the work submitted so far has completed.
        let value = self.device.timeline().allocate_value();
        let descriptor_sets = mem::take(&mut self.descriptor_sets);
        self.device.destroy_after(value, descriptor_sets);
    }
}

impl DescriptorSetCategory {
    fn instance(&self, device: &Device, array_index: u32) -> Arc<RwLock<DescriptorSetState>> {
        let array_index = array_index as usize;

        if let Some(state) = self.instances.read().get(array_index) {
            return state.clone();
        }

        let mut instances = self.instances.write();

        while instances.len() <= array_index {
            instances.push(Arc::new(RwLock::new(DescriptorSetState::new(
                device.backend_arc().clone(),
                self.layout.clone(),
                self.target,
            ))));
        }

        instances[array_index].clone()
    }
}

/// Splits `name[i]` into `name` and `i`. Names without a subscript address element 0.
fn parse_binding_name(name: &str) -> (&str, u32) {
    let Some((base_name, subscript)) = name
        .strip_suffix(']')
        .and_then(|name| name.split_once('['))
    else {
        return (name, 0);
    };

    let element = subscript
        .parse()
        .unwrap_or_else(|_| panic!("`{name}` doesn't address a valid array element"));

    (base_name, element)
}
