// Copyright (c) 2026 The cadence developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

#![cfg(test)]

/// Installs a subscriber that prints every event through the test harness, so that the logs of
/// failing tests are shown. Does nothing if one is already installed.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// Creates a device on top of a `NullBackend`. Submissions stay in flight until the backend is
/// told to complete them, or until the host waits on them.
macro_rules! null_device {
    () => {{
        $crate::tests::init_tracing();

        let backend = ::std::sync::Arc::new($crate::backend::null::NullBackend::new());
        let device = $crate::device::Device::new(backend.clone(), Default::default()).unwrap();

        (backend, device)
    }};
}

/// Creates a device with a graphics queue on the first suitable GPU, or returns if there is none.
macro_rules! vulkan_device {
    () => {{
        use ash::vk;

        $crate::tests::init_tracing();

        let Ok(entry) = (unsafe { ash::Entry::load() }) else {
            return;
        };
        // The library must stay loaded for as long as the device is used.
        let entry: &'static ash::Entry = Box::leak(Box::new(entry));

        let application_info = vk::ApplicationInfo::default().api_version(vk::API_VERSION_1_2);
        let instance_create_info =
            vk::InstanceCreateInfo::default().application_info(&application_info);
        let Ok(instance) = (unsafe { entry.create_instance(&instance_create_info, None) }) else {
            return;
        };

        let physical_devices = unsafe { instance.enumerate_physical_devices() }.unwrap_or_default();
        let Some((physical_device, queue_family_index)) =
            physical_devices.into_iter().find_map(|physical_device| {
                let properties = unsafe { instance.get_physical_device_properties(physical_device) };

                if properties.api_version < vk::API_VERSION_1_2 {
                    return None;
                }

                unsafe { instance.get_physical_device_queue_family_properties(physical_device) }
                    .iter()
                    .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|index| (physical_device, index as u32))
            })
        else {
            return;
        };

        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];
        let mut vulkan_12_features =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .push_next(&mut vulkan_12_features);

        // If the device doesn't support timeline semaphores, just return.
        let Ok(raw_device) =
            (unsafe { instance.create_device(physical_device, &device_create_info, None) })
        else {
            return;
        };

        let backend = unsafe {
            $crate::backend::vulkan::VulkanBackend::from_raw(
                &instance,
                physical_device,
                raw_device,
                &[],
            )
        };
        let device =
            $crate::device::Device::new(::std::sync::Arc::new(backend), Default::default())
                .unwrap();

        (device, queue_family_index)
    }};
}
