use std::time::{Duration, Instant};

/// Caps how often a source hands out frames.
pub struct FpsLimiter {
    fps_control: Instant,
    fps_wait: Duration,
}

impl FpsLimiter {
    pub fn new(fps: u32) -> Self {
        Self {
            fps_control: Instant::now(),
            fps_wait: Duration::from_millis(1000 / fps.max(1) as u64),
        }
    }

    pub fn wait(&mut self) {
        let elapsed = self.fps_control.elapsed();

        if self.fps_wait > elapsed {
            spin_sleep::sleep(self.fps_wait - elapsed);
        }

        self.fps_control = Instant::now();
    }
}

/// Blocks for `millis`, used to let the receiving board drain its buffer.
pub fn pause_ms(millis: u64) {
    if millis > 0 {
        spin_sleep::sleep(Duration::from_millis(millis));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limiter_spaces_consecutive_frames() {
        let mut limiter = FpsLimiter::new(50);
        limiter.wait();
        let start = Instant::now();
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn zero_fps_does_not_divide_by_zero() {
        let limiter = FpsLimiter::new(0);
        assert_eq!(limiter.fps_wait, Duration::from_millis(1000));
    }
}
