// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;
use winit::error::{EventLoopError, OsError};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("windowing init failed: {0}")]
    Init(#[from] EventLoopError),
    #[error("window creation failed: {0}")]
    WindowCreation(#[from] OsError),
    #[error("event loop exited before a window was created")]
    NoWindow,
    #[error("renderer construction failed: {0:#}")]
    Renderer(anyhow::Error),
}
