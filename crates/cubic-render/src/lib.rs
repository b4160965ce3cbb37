// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the renderer needs to know at construction.
#[derive(Clone, Copy, Debug)]
pub struct RendererDesc<'a> {
    pub title: &'a str,
    pub size: RenderSize,
    /// Ask the backend for validation/debug layers.
    pub validation: bool,
}

/// Per-iteration input from the frame loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInput {
    /// Seconds since the loop was constructed.
    pub elapsed: f32,
    pub size: RenderSize,
    /// Set for exactly one frame after the platform reported a framebuffer resize.
    pub framebuffer_resized: bool,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        desc: &RendererDesc<'_>,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Produces one frame. Resource rebuilds triggered by `framebuffer_resized`
    /// happen here, never from inside a platform callback.
    fn draw_frame(&mut self, frame: FrameInput) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sizes() {
        assert!(RenderSize { width: 0, height: 600 }.is_empty());
        assert!(RenderSize { width: 800, height: 0 }.is_empty());
        assert!(!RenderSize { width: 800, height: 600 }.is_empty());
    }
}
