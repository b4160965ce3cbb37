// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub use winit;

mod error;
mod frame_loop;
mod input;
mod window;

pub use error::PlatformError;
pub use frame_loop::{
    run_loop, EventPump, LoopPhase, LoopState, StopHandle, WindowCallbacks, IDLE_WAIT,
};
pub use input::{Action, ButtonCode, InputCommand, InputState};
pub use window::{Window, WindowConfig, DEFAULT_TITLE};
