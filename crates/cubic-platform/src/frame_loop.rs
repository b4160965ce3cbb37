// SPDX-License-Identifier: CEPL-1.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cubic_core::FrameClock;
use cubic_render::{FrameInput, RenderSize};
use tracing::{debug, error, info, warn};
use winit::event::MouseButton;
use winit::keyboard::KeyCode;

use crate::input::{Action, ButtonCode, InputCommand, InputState};

/// How long to block for events after a frame with an empty framebuffer.
pub const IDLE_WAIT: Duration = Duration::from_millis(16);

/// Receives window events during [`EventPump::poll_events`], synchronously and on the loop thread.
pub trait WindowCallbacks {
    fn on_framebuffer_resize(&mut self, width: u32, height: u32);
    fn on_key(&mut self, key: KeyCode, action: Action);
    fn on_mouse_button(&mut self, button: MouseButton, action: Action);
    fn on_cursor_move(&mut self, x: f64, y: f64);
}

/// A platform event source the loop can run against.
pub trait EventPump {
    fn should_close(&self) -> bool;
    /// Drains pending events without blocking.
    fn poll_events(&mut self, callbacks: &mut dyn WindowCallbacks);

    /// Like [`poll_events`](Self::poll_events), but may block up to `timeout`
    /// when nothing is pending.
    fn wait_events(&mut self, callbacks: &mut dyn WindowCallbacks, timeout: Duration) {
        let _ = timeout;
        self.poll_events(callbacks);
    }
}

/// Asks a running loop to stop from outside it. Honored between frames.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Running,
    Stopped,
}

/// Everything the loop mutates between frames. Also the callback target.
#[derive(Debug)]
pub struct LoopState {
    clock: FrameClock,
    size: RenderSize,
    framebuffer_resized: bool,
    running: bool,
    stop_request: StopHandle,
    phase: LoopPhase,
    input: InputState,
}

impl LoopState {
    pub fn new(size: RenderSize) -> Self {
        Self {
            clock: FrameClock::new(),
            size,
            framebuffer_resized: false,
            running: false,
            stop_request: StopHandle::default(),
            phase: LoopPhase::Idle,
            input: InputState::default(),
        }
    }

    /// Checked between frames; the current frame still completes. A stop
    /// requested before the loop starts means it draws nothing.
    pub fn stop(&mut self) {
        self.running = false;
        self.stop_request.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_request.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: RenderSize) {
        self.size = size;
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn frame_input(&self) -> FrameInput {
        FrameInput {
            elapsed: self.clock.elapsed_secs(),
            size: self.size,
            framebuffer_resized: self.framebuffer_resized,
        }
    }

    fn apply(&mut self, command: InputCommand) {
        if command == InputCommand::Stop && self.running {
            info!("escape pressed, stopping");
            self.running = false;
        }
    }
}

impl WindowCallbacks for LoopState {
    fn on_framebuffer_resize(&mut self, width: u32, height: u32) {
        debug!("framebuffer resized → {width}x{height}");
        self.framebuffer_resized = true;
        self.size = RenderSize { width, height };
    }

    fn on_key(&mut self, key: KeyCode, action: Action) {
        let command = self.input.parse_button(ButtonCode::Key(key), action);
        self.apply(command);
    }

    fn on_mouse_button(&mut self, button: MouseButton, action: Action) {
        let command = self.input.parse_button(ButtonCode::Mouse(button), action);
        self.apply(command);
    }

    fn on_cursor_move(&mut self, x: f64, y: f64) {
        self.input.parse_cursor(x, y);
    }
}

/// Runs frames until the pump reports a close request or `state` stops.
///
/// Each iteration: draw with the current elapsed time and resize flag, clear
/// the flag, then poll events. After a frame with an empty framebuffer the
/// pump may block for up to [`IDLE_WAIT`] instead. Draw errors are logged and
/// the loop goes on. Once stopped, the loop never runs again.
pub fn run_loop<P, F>(state: &mut LoopState, pump: &mut P, mut draw: F)
where
    P: EventPump + ?Sized,
    F: FnMut(FrameInput) -> anyhow::Result<()>,
{
    match state.phase {
        LoopPhase::Idle => {}
        LoopPhase::Running | LoopPhase::Stopped => {
            warn!("frame loop already ran ({:?}); start ignored", state.phase);
            return;
        }
    }

    state.phase = LoopPhase::Running;
    state.running = !state.stop_request.is_stopped();
    info!("frame loop started");

    let mut frames: u64 = 0;
    let mut window_frames: u32 = 0;
    let mut window_start = state.clock.elapsed_secs();

    while !pump.should_close() && state.running {
        let frame = state.frame_input();
        if let Err(e) = draw(frame) {
            error!("draw failed: {e:#}");
        }
        state.framebuffer_resized = false;

        if frame.size.is_empty() {
            pump.wait_events(state, IDLE_WAIT);
        } else {
            pump.poll_events(state);
        }
        if state.stop_request.is_stopped() {
            state.running = false;
        }

        frames += 1;
        window_frames += 1;
        let now = state.clock.elapsed_secs();
        if now - window_start >= 1.0 {
            debug!("fps ~ {window_frames}");
            window_frames = 0;
            window_start = now;
        }
    }

    state.running = false;
    state.phase = LoopPhase::Stopped;
    info!("frame loop stopped after {frames} frames");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const SIZE: RenderSize = RenderSize {
        width: 800,
        height: 600,
    };

    enum Ev {
        Resize(u32, u32),
        Key(KeyCode, Action),
        Mouse(MouseButton, Action),
        Cursor(f64, f64),
    }

    /// Plays back one batch of events per poll.
    struct ScriptedPump {
        polls: VecDeque<Vec<Ev>>,
        close_when_drained: bool,
        polled: usize,
        waited: usize,
    }

    impl ScriptedPump {
        fn new(polls: Vec<Vec<Ev>>, close_when_drained: bool) -> Self {
            Self {
                polls: polls.into(),
                close_when_drained,
                polled: 0,
                waited: 0,
            }
        }
    }

    impl EventPump for ScriptedPump {
        fn should_close(&self) -> bool {
            // Hard cap keeps a broken loop from hanging the test run.
            self.polled >= 100 || (self.close_when_drained && self.polls.is_empty())
        }

        fn poll_events(&mut self, callbacks: &mut dyn WindowCallbacks) {
            self.polled += 1;
            for ev in self.polls.pop_front().unwrap_or_default() {
                match ev {
                    Ev::Resize(w, h) => callbacks.on_framebuffer_resize(w, h),
                    Ev::Key(k, a) => callbacks.on_key(k, a),
                    Ev::Mouse(b, a) => callbacks.on_mouse_button(b, a),
                    Ev::Cursor(x, y) => callbacks.on_cursor_move(x, y),
                }
            }
        }

        fn wait_events(&mut self, callbacks: &mut dyn WindowCallbacks, timeout: Duration) {
            assert_eq!(timeout, IDLE_WAIT);
            self.waited += 1;
            self.poll_events(callbacks);
        }
    }

    fn record(state: &mut LoopState, pump: &mut ScriptedPump) -> Vec<FrameInput> {
        let mut frames = Vec::new();
        run_loop(state, pump, |f| {
            frames.push(f);
            Ok(())
        });
        frames
    }

    #[test]
    fn escape_allows_at_most_one_more_frame() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(
            vec![vec![
                Ev::Cursor(1.0, 2.0),
                Ev::Key(KeyCode::Escape, Action::Press),
            ]],
            false,
        );
        let frames = record(&mut state, &mut pump);
        assert_eq!(frames.len(), 1);
        assert_eq!(pump.polled, 1);
        assert!(!state.is_running());
        assert_eq!(state.phase(), LoopPhase::Stopped);
        assert_eq!(state.input().cursor(), Some((1.0, 2.0)));
    }

    #[test]
    fn resize_flag_is_set_for_exactly_one_frame() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(vec![vec![Ev::Resize(1024, 768)], vec![], vec![]], true);
        let frames = record(&mut state, &mut pump);

        let flags: Vec<bool> = frames.iter().map(|f| f.framebuffer_resized).collect();
        assert_eq!(flags, [false, true, false]);
        assert_eq!(frames[0].size, SIZE);
        assert_eq!(
            frames[1].size,
            RenderSize {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn two_resizes_in_one_poll_are_one_edge() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(
            vec![vec![Ev::Resize(640, 480), Ev::Resize(0, 0)], vec![]],
            true,
        );
        let frames = record(&mut state, &mut pump);
        let flags: Vec<bool> = frames.iter().map(|f| f.framebuffer_resized).collect();
        assert_eq!(flags, [false, true]);
        assert!(frames[1].size.is_empty());
    }

    #[test]
    fn elapsed_never_decreases() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new((0..5).map(|_| vec![]).collect(), true);
        let frames = record(&mut state, &mut pump);
        assert_eq!(frames.len(), 5);
        assert!(frames[0].elapsed >= 0.0);
        for pair in frames.windows(2) {
            assert!(pair[1].elapsed >= pair[0].elapsed);
        }
    }

    #[test]
    fn close_request_exits_before_drawing() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(vec![], true);
        let frames = record(&mut state, &mut pump);
        assert!(frames.is_empty());
        assert_eq!(state.phase(), LoopPhase::Stopped);
    }

    #[test]
    fn stopped_loop_does_not_restart() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(vec![vec![Ev::Key(KeyCode::Escape, Action::Press)]], false);
        assert_eq!(record(&mut state, &mut pump).len(), 1);

        let mut fresh = ScriptedPump::new(vec![vec![], vec![]], true);
        assert!(record(&mut state, &mut fresh).is_empty());
        assert_eq!(fresh.polled, 0);
        assert_eq!(state.phase(), LoopPhase::Stopped);
    }

    #[test]
    fn draw_errors_do_not_stop_the_loop() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(vec![vec![], vec![], vec![]], true);
        let mut calls = 0;
        run_loop(&mut state, &mut pump, |_| {
            calls += 1;
            anyhow::bail!("device lost")
        });
        assert_eq!(calls, 3);
    }

    #[test]
    fn mouse_buttons_do_not_stop() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(
            vec![
                vec![Ev::Mouse(MouseButton::Left, Action::Press)],
                vec![Ev::Key(KeyCode::KeyW, Action::Repeat)],
            ],
            true,
        );
        assert_eq!(record(&mut state, &mut pump).len(), 2);
        assert_eq!(
            state.input().last_button(),
            Some((ButtonCode::Key(KeyCode::KeyW), Action::Repeat))
        );
    }

    #[test]
    fn stop_before_start_draws_nothing() {
        let mut state = LoopState::new(SIZE);
        state.stop();
        let mut pump = ScriptedPump::new(vec![], false);
        assert!(record(&mut state, &mut pump).is_empty());
        assert_eq!(pump.polled, 0);
        assert_eq!(state.phase(), LoopPhase::Stopped);
    }

    #[test]
    fn stop_handle_ends_loop_after_current_frame() {
        let mut state = LoopState::new(SIZE);
        let handle = state.stop_handle();
        let mut pump = ScriptedPump::new(vec![], false);
        let mut drawn = 0;
        run_loop(&mut state, &mut pump, |_| {
            drawn += 1;
            if drawn == 2 {
                handle.stop();
            }
            Ok(())
        });
        assert_eq!(drawn, 2);
        assert_eq!(pump.polled, 2);
        assert!(!state.is_running());
    }

    #[test]
    fn empty_framebuffer_waits_instead_of_polling() {
        let mut state = LoopState::new(SIZE);
        let mut pump = ScriptedPump::new(
            vec![vec![Ev::Resize(0, 0)], vec![Ev::Resize(800, 600)], vec![]],
            true,
        );
        let frames = record(&mut state, &mut pump);
        let empty: Vec<bool> = frames.iter().map(|f| f.size.is_empty()).collect();
        assert_eq!(empty, [false, true, false]);
        assert_eq!(pump.polled, 3);
        assert_eq!(pump.waited, 1);
    }
}
