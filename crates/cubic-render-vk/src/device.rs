// SPDX-License-Identifier: CEPL-1.0
use std::ffi::c_void;

use ash::prelude::VkResult;
use ash::vk;

/// First memory type allowed by `type_bits` whose flags contain `wanted`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    wanted: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)).find(|&i| {
        (type_bits & (1 << i)) != 0 && memory.memory_types[i as usize].property_flags.contains(wanted)
    })
}

/// The slice of a logical device the uniform manager needs.
///
/// Memory typing comes from the physical device the logical device was made
/// on; the remaining calls map one-to-one onto `vkCreateBuffer` and friends.
/// Every `unsafe fn` carries the usual Vulkan validity rules: handles must
/// come from this device and must not be in use by the GPU when released.
pub trait GpuDevice {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;

    fn find_memory_type_index(
        &self,
        requirements: &vk::MemoryRequirements,
        wanted: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type(self.memory_properties(), requirements.memory_type_bits, wanted)
    }

    fn has_memory_type(
        &self,
        requirements: &vk::MemoryRequirements,
        wanted: vk::MemoryPropertyFlags,
    ) -> bool {
        self.find_memory_type_index(requirements, wanted).is_some()
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer>;
    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory>;
    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void>;
    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory);
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);
    unsafe fn free_memory(&self, memory: vk::DeviceMemory);
}

/// `ash::Device` plus the memory layout of its physical device.
#[derive(Clone)]
pub struct VkDevice {
    device: ash::Device,
    memory: vk::PhysicalDeviceMemoryProperties,
}

impl VkDevice {
    pub fn new(instance: &ash::Instance, phys: vk::PhysicalDevice, device: ash::Device) -> Self {
        let memory = unsafe { instance.get_physical_device_memory_properties(phys) };
        Self { device, memory }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl GpuDevice for VkDevice {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in p.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        p
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_first_matching_allowed_type() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
            HOST,
        ]);
        assert_eq!(find_memory_type(&p, 0b1111, HOST), Some(2));
        assert_eq!(find_memory_type(&p, 0b1011, HOST), Some(3));
    }

    #[test]
    fn respects_type_bits_and_flags() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, vk::MemoryPropertyFlags::HOST_VISIBLE]);
        assert_eq!(find_memory_type(&p, 0b11, HOST), None);
        assert_eq!(find_memory_type(&p, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE), None);
        assert_eq!(find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(1));
    }

    #[test]
    fn ignores_types_past_count() {
        let mut p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        p.memory_types[1].property_flags = HOST;
        assert_eq!(find_memory_type(&p, u32::MAX, HOST), None);
    }
}
