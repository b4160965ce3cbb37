// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniformError {
    /// The driver refused a buffer, memory allocation or bind.
    #[error("uniform buffer for image {image}: {call} failed: {result}")]
    ResourceCreation {
        image: usize,
        call: &'static str,
        result: vk::Result,
    },

    /// No memory type is both host-visible and host-coherent for this buffer.
    #[error("uniform buffer for image {image}: no host-visible, host-coherent memory type (type bits {type_bits:#034b})")]
    Allocation { image: usize, type_bits: u32 },

    #[error("mapping uniform memory for image {image} failed: {result}")]
    Map { image: usize, result: vk::Result },
}
