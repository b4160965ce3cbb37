// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Wall-clock time since the loop was built.
///
/// Backed by [`Instant`], so readings never go backwards.
#[derive(Clone, Copy, Debug)]
pub struct FrameClock {
    start: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Seconds since construction, as handed to the renderer each frame.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_non_negative_and_non_decreasing() {
        let clock = FrameClock::new();
        let mut last = 0.0_f32;
        for _ in 0..1000 {
            let now = clock.elapsed_secs();
            assert!(now >= 0.0);
            assert!(now >= last, "{now} < {last}");
            last = now;
        }
    }

    #[test]
    fn elapsed_tracks_sleep() {
        let clock = FrameClock::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(clock.elapsed() >= Duration::from_millis(10));
        assert!(clock.start() <= Instant::now());
    }
}
