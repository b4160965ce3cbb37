// SPDX-License-Identifier: CEPL-1.0
mod transform;

pub use glam;
pub use transform::TransformBlock;
