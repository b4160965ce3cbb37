// SPDX-License-Identifier: CEPL-1.0
//! Per-swapchain-image uniform buffers holding the [`TransformBlock`].
//!
//! One buffer and one host-visible, host-coherent allocation per image. The
//! manager owns both and releases them on drop, buffer first.

use ash::vk;
use cubic_math::TransformBlock;
use tracing::debug;

use crate::device::GpuDevice;
use crate::error::UniformError;
use crate::swapchain::SwapchainInfo;

const UNIFORM_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

const BLOCK_SIZE: vk::DeviceSize = TransformBlock::SIZE as vk::DeviceSize;

/// A bound buffer/memory pair. Move-only; released exactly once by its manager.
struct UniformPair {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl UniformPair {
    unsafe fn create<D: GpuDevice>(device: &D, image: usize) -> Result<Self, UniformError> {
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size: BLOCK_SIZE,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { device.create_buffer(&info) }.map_err(|result| {
            UniformError::ResourceCreation {
                image,
                call: "vkCreateBuffer",
                result,
            }
        })?;

        let req = unsafe { device.buffer_memory_requirements(buffer) };
        let Some(memory_type_index) = device
            .has_memory_type(&req, UNIFORM_MEMORY)
            .then(|| device.find_memory_type_index(&req, UNIFORM_MEMORY))
            .flatten()
        else {
            unsafe { device.destroy_buffer(buffer) };
            return Err(UniformError::Allocation {
                image,
                type_bits: req.memory_type_bits,
            });
        };

        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = match unsafe { device.allocate_memory(&alloc) } {
            Ok(memory) => memory,
            Err(result) => {
                unsafe { device.destroy_buffer(buffer) };
                return Err(UniformError::ResourceCreation {
                    image,
                    call: "vkAllocateMemory",
                    result,
                });
            }
        };

        let pair = Self { buffer, memory };
        if let Err(result) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe { pair.release(device) };
            return Err(UniformError::ResourceCreation {
                image,
                call: "vkBindBufferMemory",
                result,
            });
        }
        Ok(pair)
    }

    unsafe fn release<D: GpuDevice>(self, device: &D) {
        unsafe {
            device.destroy_buffer(self.buffer);
            device.free_memory(self.memory);
        }
    }
}

/// Owns one [`UniformPair`] per swapchain image.
///
/// The set is built whole: on any failure the pairs made so far are released
/// before the error is returned. Rebuilding after a swapchain change means
/// constructing a new manager and replacing the old one.
pub struct UniformBuffers<D: GpuDevice> {
    device: D,
    pairs: Vec<UniformPair>,
}

impl<D: GpuDevice> UniformBuffers<D> {
    pub fn new(device: D, swapchain: &impl SwapchainInfo) -> Result<Self, UniformError> {
        let count = swapchain.image_count() as usize;
        let mut buffers = Self {
            device,
            pairs: Vec::with_capacity(count),
        };
        for image in 0..count {
            // On `?` the partially filled manager drops and frees earlier pairs.
            let pair = unsafe { UniformPair::create(&buffers.device, image) }?;
            buffers.pairs.push(pair);
        }
        debug!("created {count} uniform buffers of {BLOCK_SIZE} bytes");
        Ok(buffers)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Buffer for `image_index`. The handle stays owned by this manager.
    ///
    /// # Panics
    /// If `image_index` is not below the image count given at construction.
    pub fn buffer(&self, image_index: usize) -> vk::Buffer {
        self.pairs[image_index].buffer
    }

    /// Rewrites the block for `image_index` from `elapsed` and the viewport extent.
    ///
    /// The memory is mapped and unmapped within this call.
    ///
    /// # Panics
    /// If `image_index` is out of range.
    pub fn update(
        &mut self,
        swapchain: &impl SwapchainInfo,
        elapsed: f32,
        image_index: usize,
    ) -> Result<(), UniformError> {
        let extent = swapchain.viewport_extent();
        let block = TransformBlock::at(elapsed, extent.width, extent.height);
        let bytes = bytemuck::bytes_of(&block);
        let memory = self.pairs[image_index].memory;

        unsafe {
            let ptr = self
                .device
                .map_memory(memory, 0, BLOCK_SIZE)
                .map_err(|result| UniformError::Map {
                    image: image_index,
                    result,
                })?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    /// Releases every pair. The caller must ensure the GPU is done with them.
    /// Safe to call more than once; `Drop` calls it too.
    pub fn release(&mut self) {
        if self.pairs.is_empty() {
            return;
        }
        let count = self.pairs.len();
        for pair in self.pairs.drain(..) {
            unsafe { pair.release(&self.device) };
        }
        debug!("released {count} uniform buffers");
    }
}

impl<D: GpuDevice> Drop for UniformBuffers<D> {
    fn drop(&mut self) {
        self.release();
    }
}
