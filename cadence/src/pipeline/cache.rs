// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Cache used by the driver to speed up pipeline creation.
//!
//! The data of a cache can be retrieved with [`PipelineCache::get_data`], stored on disk, and fed
//! back to [`PipelineCache::new`] on the next run. Data written by another driver or another
//! device is rejected with a warning, and the cache starts out empty instead.

use crate::{backend::DeviceProperties, device::Device, VulkanError};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::{error::Error, fmt, mem::size_of, sync::Arc};

/// The header that every pipeline cache blob starts with, as defined by
/// `VK_PIPELINE_CACHE_HEADER_VERSION_ONE`. Fields are little-endian.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct PipelineCacheHeader {
    header_size: u32,
    header_version: u32,
    vendor_id: u32,
    device_id: u32,
    pipeline_cache_uuid: [u8; vk::UUID_SIZE],
}

const HEADER_SIZE: usize = size_of::<PipelineCacheHeader>();

/// Opaque cache that contains pipeline objects.
#[derive(Debug)]
pub struct PipelineCache {
    device: Arc<Device>,
    handle: vk::PipelineCache,
}

impl PipelineCache {
    /// Creates a new pipeline cache, filled with `initial_data` if it was written by the same
    /// driver and device.
    ///
    /// Data that doesn't match is discarded with a warning, and an empty cache is created.
    pub fn new(device: Arc<Device>, initial_data: &[u8]) -> Result<Arc<PipelineCache>, VulkanError> {
        let initial_data: &[u8] = if initial_data.is_empty() {
            initial_data
        } else {
            match validate_header(initial_data, device.properties()) {
                Ok(()) => initial_data,
                Err(err) => {
                    tracing::warn!("discarding pipeline cache data: {err}");

                    &[]
                }
            }
        };

        let handle = unsafe { device.backend().create_pipeline_cache(initial_data) }
            .inspect_err(|err| tracing::error!("failed to create a pipeline cache: {err}"))?;

        tracing::debug!(bytes = initial_data.len(), "created pipeline cache");

        Ok(Arc::new(PipelineCache { device, handle }))
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Obtains the data from the cache.
    ///
    /// This data can be stored and then reloaded and passed to `PipelineCache::new`.
    pub fn get_data(&self) -> Result<Vec<u8>, VulkanError> {
        unsafe { self.device.backend().pipeline_cache_data(self.handle) }
            .inspect_err(|err| tracing::error!("failed to get pipeline cache data: {err}"))
    }
}

impl Drop for PipelineCache {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.device.backend().destroy_pipeline_cache(self.handle) };
    }
}

fn validate_header(data: &[u8], properties: &DeviceProperties) -> Result<(), PipelineCacheDataError> {
    let Some(header) = data.get(..HEADER_SIZE) else {
        return Err(PipelineCacheDataError::TooShort { len: data.len() });
    };
    let header: PipelineCacheHeader = bytemuck::pod_read_unaligned(header);

    let header_size = u32::from_le(header.header_size);
    if (header_size as usize) < HEADER_SIZE || header_size as usize > data.len() {
        return Err(PipelineCacheDataError::HeaderSize { header_size });
    }

    let header_version = u32::from_le(header.header_version);
    if header_version != vk::PipelineCacheHeaderVersion::ONE.as_raw() as u32 {
        return Err(PipelineCacheDataError::HeaderVersion { header_version });
    }

    let vendor_id = u32::from_le(header.vendor_id);
    if vendor_id != properties.vendor_id {
        return Err(PipelineCacheDataError::VendorId {
            provided: vendor_id,
            expected: properties.vendor_id,
        });
    }

    let device_id = u32::from_le(header.device_id);
    if device_id != properties.device_id {
        return Err(PipelineCacheDataError::DeviceId {
            provided: device_id,
            expected: properties.device_id,
        });
    }

    if header.pipeline_cache_uuid != properties.pipeline_cache_uuid {
        return Err(PipelineCacheDataError::Uuid);
    }

    Ok(())
}

/// The reason pipeline cache data was not loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineCacheDataError {
    /// The data is shorter than a cache header.
    TooShort { len: usize },
    /// The header size is smaller than the header or larger than the data.
    HeaderSize { header_size: u32 },
    HeaderVersion { header_version: u32 },
    VendorId { provided: u32, expected: u32 },
    DeviceId { provided: u32, expected: u32 },
    /// The data was written by a different driver build.
    Uuid,
}

impl Error for PipelineCacheDataError {}

impl fmt::Display for PipelineCacheDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(
                f,
                "the data is {len} bytes long, which is shorter than a header ({HEADER_SIZE} bytes)",
            ),
            Self::HeaderSize { header_size } => {
                write!(f, "the header size {header_size} is invalid")
            }
            Self::HeaderVersion { header_version } => {
                write!(f, "the header version {header_version} is not supported")
            }
            Self::VendorId { provided, expected } => write!(
                f,
                "the data was written for vendor {provided:#x}, but the device's vendor is \
                {expected:#x}",
            ),
            Self::DeviceId { provided, expected } => write!(
                f,
                "the data was written for device {provided:#x}, but the device is {expected:#x}",
            ),
            Self::Uuid => write!(f, "the pipeline cache UUID doesn't match the device's"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let (_backend, device) = null_device!();

        let cache = PipelineCache::new(device.clone(), &[]).unwrap();
        let mut data = cache.get_data().unwrap();
        assert_eq!(data.len(), HEADER_SIZE);
        assert_eq!(validate_header(&data, device.properties()), Ok(()));

        data.extend_from_slice(b"pipelines");
        let cache = PipelineCache::new(device.clone(), &data).unwrap();
        assert_eq!(cache.get_data().unwrap(), data);
    }

    #[test]
    fn foreign_data_falls_back_to_empty() {
        let (_backend, device) = null_device!();

        let mut data = PipelineCache::new(device.clone(), &[])
            .unwrap()
            .get_data()
            .unwrap();
        data[8..12].copy_from_slice(&0x1002u32.to_le_bytes());
        data.extend_from_slice(b"pipelines");

        assert_eq!(
            validate_header(&data, device.properties()),
            Err(PipelineCacheDataError::VendorId {
                provided: 0x1002,
                expected: device.properties().vendor_id,
            }),
        );

        let cache = PipelineCache::new(device.clone(), &data).unwrap();
        assert_eq!(cache.get_data().unwrap().len(), HEADER_SIZE);
    }

    #[test]
    fn malformed_headers() {
        let (_backend, device) = null_device!();
        let properties = device.properties();

        assert_eq!(
            validate_header(&[0; 10], properties),
            Err(PipelineCacheDataError::TooShort { len: 10 }),
        );

        let valid = PipelineCache::new(device.clone(), &[])
            .unwrap()
            .get_data()
            .unwrap();

        let mut data = valid.clone();
        data[0..4].copy_from_slice(&16u32.to_le_bytes());
        assert_eq!(
            validate_header(&data, properties),
            Err(PipelineCacheDataError::HeaderSize { header_size: 16 }),
        );

        let mut data = valid.clone();
        data[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(
            validate_header(&data, properties),
            Err(PipelineCacheDataError::HeaderVersion { header_version: 2 }),
        );

        let mut data = valid;
        data[31] ^= 0xff;
        assert_eq!(
            validate_header(&data, properties),
            Err(PipelineCacheDataError::Uuid),
        );
    }
}
