// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Descriptor bindings and the descriptor sets built from them.
//!
//! Bindings are not written to descriptor sets directly. A pipeline keeps the bindings of each
//! of its sets in a [`DescriptorSetState`], in the same flattened layout that a descriptor update
//! template reads. Binding the set before a draw writes a fresh descriptor set only if bindings
//! changed since the last time, so that a descriptor set is never written while the GPU may
//! still read it.
//!
//! Sets whose layout was created with `VK_DESCRIPTOR_SET_LAYOUT_CREATE_PUSH_DESCRIPTOR_BIT_KHR`
//! skip descriptor sets altogether and push the flattened data into the command buffer.

pub use self::state::{BindingStatus, DescriptorSetState};
use crate::NE;
use ash::vk::{self, Handle};
use std::mem::{offset_of, size_of};

pub(crate) mod ring;
pub mod state;

/// The type of a descriptor binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    InputAttachment,
    /// The descriptor count of the binding is its size in bytes.
    InlineUniformBlock,
    AccelerationStructure,
}

impl DescriptorType {
    /// Returns the number of bytes one element takes in the flattened bindings data.
    pub(crate) const fn stride(self) -> usize {
        match self {
            Self::Sampler
            | Self::CombinedImageSampler
            | Self::SampledImage
            | Self::StorageImage
            | Self::InputAttachment => size_of::<vk::DescriptorImageInfo>(),
            Self::UniformBuffer
            | Self::StorageBuffer
            | Self::UniformBufferDynamic
            | Self::StorageBufferDynamic => size_of::<vk::DescriptorBufferInfo>(),
            Self::UniformTexelBuffer | Self::StorageTexelBuffer => size_of::<vk::BufferView>(),
            Self::AccelerationStructure => size_of::<vk::AccelerationStructureKHR>(),
            Self::InlineUniformBlock => 1,
        }
    }
}

impl From<DescriptorType> for vk::DescriptorType {
    #[inline]
    fn from(val: DescriptorType) -> Self {
        match val {
            DescriptorType::Sampler => Self::SAMPLER,
            DescriptorType::CombinedImageSampler => Self::COMBINED_IMAGE_SAMPLER,
            DescriptorType::SampledImage => Self::SAMPLED_IMAGE,
            DescriptorType::StorageImage => Self::STORAGE_IMAGE,
            DescriptorType::UniformTexelBuffer => Self::UNIFORM_TEXEL_BUFFER,
            DescriptorType::StorageTexelBuffer => Self::STORAGE_TEXEL_BUFFER,
            DescriptorType::UniformBuffer => Self::UNIFORM_BUFFER,
            DescriptorType::StorageBuffer => Self::STORAGE_BUFFER,
            DescriptorType::UniformBufferDynamic => Self::UNIFORM_BUFFER_DYNAMIC,
            DescriptorType::StorageBufferDynamic => Self::STORAGE_BUFFER_DYNAMIC,
            DescriptorType::InputAttachment => Self::INPUT_ATTACHMENT,
            DescriptorType::InlineUniformBlock => Self::INLINE_UNIFORM_BLOCK,
            DescriptorType::AccelerationStructure => Self::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

/// The resource written to a descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorData {
    /// For uniform and storage buffers, dynamic or not.
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },

    /// For samplers, images, combined image samplers and input attachments. Handles that the
    /// descriptor type doesn't use should be null.
    Image {
        sampler: vk::Sampler,
        image_view: vk::ImageView,
        image_layout: vk::ImageLayout,
    },

    /// For uniform and storage texel buffers.
    TexelBufferView(vk::BufferView),

    AccelerationStructure(vk::AccelerationStructureKHR),

    /// Bytes of an inline uniform block. Each byte is one element of the binding.
    InlineUniformBlock(Vec<u8>),
}

impl DescriptorData {
    /// Returns a buffer descriptor that covers the whole buffer.
    #[inline]
    pub fn whole_buffer(buffer: vk::Buffer) -> Self {
        DescriptorData::Buffer {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    /// Returns an image descriptor without a sampler.
    #[inline]
    pub fn image(image_view: vk::ImageView, image_layout: vk::ImageLayout) -> Self {
        DescriptorData::Image {
            sampler: vk::Sampler::null(),
            image_view,
            image_layout,
        }
    }

    /// Returns whether the data can be written to a binding of type `descriptor_type`.
    pub fn is_compatible_with(&self, descriptor_type: DescriptorType) -> bool {
        use DescriptorType as T;

        match self {
            DescriptorData::Buffer { .. } => matches!(
                descriptor_type,
                T::UniformBuffer | T::StorageBuffer | T::UniformBufferDynamic | T::StorageBufferDynamic
            ),
            DescriptorData::Image { .. } => matches!(
                descriptor_type,
                T::Sampler
                    | T::CombinedImageSampler
                    | T::SampledImage
                    | T::StorageImage
                    | T::InputAttachment
            ),
            DescriptorData::TexelBufferView(_) => {
                matches!(descriptor_type, T::UniformTexelBuffer | T::StorageTexelBuffer)
            }
            DescriptorData::AccelerationStructure(_) => {
                descriptor_type == T::AccelerationStructure
            }
            DescriptorData::InlineUniformBlock(_) => descriptor_type == T::InlineUniformBlock,
        }
    }

    /// Returns the number of elements of a binding the data occupies.
    pub(crate) fn element_count(&self) -> u32 {
        match self {
            DescriptorData::InlineUniformBlock(bytes) => bytes.len() as u32,
            _ => 1,
        }
    }

    /// Writes the data in the layout that descriptor update templates read.
    pub(crate) fn write_to(&self, dst: &mut [u8]) {
        fn put(dst: &mut [u8], offset: usize, bytes: &[u8]) {
            dst[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        match self {
            DescriptorData::Buffer {
                buffer,
                offset,
                range,
            } => {
                type Info = vk::DescriptorBufferInfo;
                put(dst, offset_of!(Info, buffer), &buffer.as_raw().to_ne_bytes());
                put(dst, offset_of!(Info, offset), &offset.to_ne_bytes());
                put(dst, offset_of!(Info, range), &range.to_ne_bytes());
            }
            DescriptorData::Image {
                sampler,
                image_view,
                image_layout,
            } => {
                type Info = vk::DescriptorImageInfo;
                put(dst, offset_of!(Info, sampler), &sampler.as_raw().to_ne_bytes());
                put(dst, offset_of!(Info, image_view), &image_view.as_raw().to_ne_bytes());
                put(
                    dst,
                    offset_of!(Info, image_layout),
                    &image_layout.as_raw().to_ne_bytes(),
                );
            }
            DescriptorData::TexelBufferView(buffer_view) => {
                put(dst, 0, &buffer_view.as_raw().to_ne_bytes());
            }
            DescriptorData::AccelerationStructure(acceleration_structure) => {
                put(dst, 0, &acceleration_structure.as_raw().to_ne_bytes());
            }
            DescriptorData::InlineUniformBlock(bytes) => {
                put(dst, 0, bytes);
            }
        }
    }
}

/// Describes one binding of a descriptor set layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorBindingInfo {
    /// The binding number in the shader.
    pub binding: u32,

    /// The name that bindings are written by.
    pub name: String,

    pub descriptor_type: DescriptorType,

    /// The number of array elements, or the size in bytes for inline uniform blocks.
    ///
    /// The default value is 1.
    pub descriptor_count: u32,

    pub _ne: crate::NonExhaustive,
}

impl DescriptorBindingInfo {
    #[inline]
    pub fn new(binding: u32, name: impl Into<String>, descriptor_type: DescriptorType) -> Self {
        DescriptorBindingInfo {
            binding,
            name: name.into(),
            descriptor_type,
            descriptor_count: 1,
            _ne: NE,
        }
    }
}

/// Describes a descriptor set layout that was created by the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetLayoutInfo {
    /// The layout. It must stay alive as long as any pipeline that uses it.
    ///
    /// The default value is null, which is only valid for layouts without bindings.
    pub handle: vk::DescriptorSetLayout,

    /// The bindings of the layout.
    ///
    /// The default value is empty.
    pub bindings: Vec<DescriptorBindingInfo>,

    /// Whether the layout was created for push descriptors.
    ///
    /// The default value is `false`.
    pub push_descriptor: bool,

    pub _ne: crate::NonExhaustive,
}

impl Default for DescriptorSetLayoutInfo {
    #[inline]
    fn default() -> Self {
        DescriptorSetLayoutInfo {
            handle: vk::DescriptorSetLayout::null(),
            bindings: Vec::new(),
            push_descriptor: false,
            _ne: NE,
        }
    }
}

impl DescriptorSetLayoutInfo {
    /// # Panics
    ///
    /// - Panics if two bindings have the same binding number or the same name.
    /// - Panics if a binding has a descriptor count of 0.
    /// - Panics if a name contains a `[`.
    pub(crate) fn validate(&self) {
        for (index, binding) in self.bindings.iter().enumerate() {
            assert_ne!(
                binding.descriptor_count, 0,
                "binding `{}` has a descriptor count of 0",
                binding.name,
            );
            assert!(
                !binding.name.contains('['),
                "binding name `{}` must not contain `[`",
                binding.name,
            );

            for other in &self.bindings[..index] {
                assert_ne!(
                    binding.binding, other.binding,
                    "binding number {} is declared twice",
                    binding.binding,
                );
                assert_ne!(
                    binding.name, other.name,
                    "binding name `{}` is declared twice",
                    binding.name,
                );
            }
        }
    }

    /// Returns the descriptors one descriptor set of the layout needs.
    pub(crate) fn pool_sizes(&self) -> impl Iterator<Item = DescriptorPoolSize> + '_ {
        self.bindings.iter().map(|binding| DescriptorPoolSize {
            descriptor_type: binding.descriptor_type,
            descriptor_count: binding.descriptor_count,
        })
    }
}

/// A number of descriptors of one type that a descriptor pool can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
}

/// One entry of a descriptor update template: a range of array elements of a binding, and
/// where to find their data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorUpdateEntry {
    pub binding: u32,
    pub first_array_element: u32,
    pub descriptor_count: u32,
    pub descriptor_type: DescriptorType,
    /// Byte offset of the first element in the data.
    pub offset: usize,
    /// Byte distance between elements in the data.
    pub stride: usize,
}

/// Where a descriptor set is bound: a set number of a pipeline layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindTarget {
    pub bind_point: vk::PipelineBindPoint,
    pub pipeline_layout: vk::PipelineLayout,
    pub set_index: u32,
}

/// Parameters to create a descriptor update template.
#[derive(Clone, Copy, Debug)]
pub struct UpdateTemplateInfo<'a> {
    /// Must not be empty.
    pub entries: &'a [DescriptorUpdateEntry],
    pub set_layout: vk::DescriptorSetLayout,
    /// If set, the template pushes descriptors instead of updating descriptor sets.
    pub push: Option<BindTarget>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility() {
        let buffer = DescriptorData::whole_buffer(vk::Buffer::from_raw(1));
        assert!(buffer.is_compatible_with(DescriptorType::UniformBuffer));
        assert!(buffer.is_compatible_with(DescriptorType::StorageBufferDynamic));
        assert!(!buffer.is_compatible_with(DescriptorType::SampledImage));

        let image = DescriptorData::image(
            vk::ImageView::from_raw(2),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(image.is_compatible_with(DescriptorType::CombinedImageSampler));
        assert!(!image.is_compatible_with(DescriptorType::UniformTexelBuffer));

        let inline = DescriptorData::InlineUniformBlock(vec![0; 16]);
        assert!(inline.is_compatible_with(DescriptorType::InlineUniformBlock));
        assert_eq!(inline.element_count(), 16);
    }

    #[test]
    fn buffer_layout() {
        let data = DescriptorData::Buffer {
            buffer: vk::Buffer::from_raw(0x1122),
            offset: 64,
            range: 256,
        };
        let mut bytes = vec![0; DescriptorType::UniformBuffer.stride()];
        data.write_to(&mut bytes);

        assert_eq!(bytes.len(), 24);
        assert_eq!(bytes[0..8], 0x1122u64.to_ne_bytes());
        assert_eq!(bytes[8..16], 64u64.to_ne_bytes());
        assert_eq!(bytes[16..24], 256u64.to_ne_bytes());
    }

    #[test]
    fn image_layout() {
        let data = DescriptorData::Image {
            sampler: vk::Sampler::from_raw(3),
            image_view: vk::ImageView::from_raw(4),
            image_layout: vk::ImageLayout::GENERAL,
        };
        let mut bytes = vec![0xff; DescriptorType::CombinedImageSampler.stride()];
        data.write_to(&mut bytes);

        assert_eq!(bytes[0..8], 3u64.to_ne_bytes());
        assert_eq!(bytes[8..16], 4u64.to_ne_bytes());
        assert_eq!(bytes[16..20], vk::ImageLayout::GENERAL.as_raw().to_ne_bytes());
    }

    #[test]
    #[should_panic = "declared twice"]
    fn duplicate_binding_names() {
        DescriptorSetLayoutInfo {
            bindings: vec![
                DescriptorBindingInfo::new(0, "albedo", DescriptorType::SampledImage),
                DescriptorBindingInfo::new(1, "albedo", DescriptorType::Sampler),
            ],
            ..Default::default()
        }
        .validate();
    }
}
