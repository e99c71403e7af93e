#![doc = r#"
The playback master clock.

Virtual time advances on a background thread at roughly 1 ms
granularity, scaled by a speed ratio and frozen while paused.
Accumulation happens in double precision so thousands of tiny scaled
ticks do not drift through integer truncation; only the published
millisecond value is integral. Schedulers read that value with a
single atomic load.
"#]

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Sender};
use thiserror::Error;

/// Poll granularity of the advance loop.
const TICK: Duration = Duration::from_millis(1);

/// Raised when a non-positive speed ratio is supplied.
///
/// Speed is rejected rather than clamped: a silent clamp to some
/// arbitrary floor would desynchronize playback from the caller's idea
/// of it.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("speed ratio must be positive, got {0}")]
pub struct InvalidSpeed(pub f64);

struct ClockState {
    speed: f64,
    paused: bool,
    /// Double-precision running total of virtual milliseconds.
    accumulated: f64,
    /// Wall-clock anchor of the last advance.
    anchor: Instant,
}

struct Shared {
    /// Published virtual time in whole milliseconds.
    millis: AtomicI64,
    state: Mutex<ClockState>,
}

#[doc = r#"
A running master clock.

Created by [`MasterClock::start`], which spawns the advance thread;
dropping the clock cancels and joins it.
"#]
pub struct MasterClock {
    shared: Arc<Shared>,
    stop: Sender<()>,
    worker: Option<thread::JoinHandle<()>>,
}

impl MasterClock {
    /// Start a clock at virtual time zero, speed 1.0, running.
    pub fn start() -> Self {
        let shared = Arc::new(Shared {
            millis: AtomicI64::new(0),
            state: Mutex::new(ClockState {
                speed: 1.0,
                paused: false,
                accumulated: 0.0,
                anchor: Instant::now(),
            }),
        });
        let (stop, cancelled) = bounded::<()>(0);

        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || loop {
                match cancelled.recv_timeout(TICK) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let Ok(mut state) = shared.state.lock() else {
                    break;
                };
                let now = Instant::now();
                if state.paused {
                    // Keep re-anchoring so no time is owed on resume.
                    state.anchor = now;
                    continue;
                }
                let elapsed = now.duration_since(state.anchor).as_secs_f64() * 1000.0;
                state.accumulated += elapsed * state.speed;
                state.anchor = now;
                shared
                    .millis
                    .store(state.accumulated as i64, Ordering::Release);
            })
        };

        Self {
            shared,
            stop,
            worker: Some(worker),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now_millis(&self) -> i64 {
        self.shared.millis.load(Ordering::Acquire)
    }

    /// Change the playback speed ratio.
    pub fn set_speed(&self, speed: f64) -> Result<(), InvalidSpeed> {
        if speed <= 0.0 || !speed.is_finite() {
            return Err(InvalidSpeed(speed));
        }
        if let Ok(mut state) = self.shared.state.lock() {
            state.speed = speed;
        }
        Ok(())
    }

    /// The current speed ratio.
    pub fn speed(&self) -> f64 {
        self.shared.state.lock().map(|s| s.speed).unwrap_or(1.0)
    }

    /// Freeze virtual time.
    pub fn pause(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.paused = true;
        }
    }

    /// Resume from a pause; no time is owed for the paused span.
    pub fn resume(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.anchor = Instant::now();
            state.paused = false;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().map(|s| s.paused).unwrap_or(false)
    }

    /// Jump virtual time by `delta_millis`, clamped to zero from below.
    /// Valid while running or paused.
    pub fn seek(&self, delta_millis: i64) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.accumulated = (state.accumulated + delta_millis as f64).max(0.0);
            state.anchor = Instant::now();
            self.shared
                .millis
                .store(state.accumulated as i64, Ordering::Release);
        }
    }
}

impl Drop for MasterClock {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_in_real_time() {
        let clock = MasterClock::start();
        let before = clock.now_millis();
        thread::sleep(Duration::from_millis(50));
        let after = clock.now_millis();
        let delta = after - before;
        assert!((25..=150).contains(&delta), "delta was {delta} ms");
    }

    #[test]
    fn pause_freezes_time() {
        let clock = MasterClock::start();
        thread::sleep(Duration::from_millis(10));
        clock.pause();
        thread::sleep(Duration::from_millis(5));
        let first = clock.now_millis();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(clock.now_millis(), first);

        clock.resume();
        thread::sleep(Duration::from_millis(20));
        let resumed = clock.now_millis();
        // The paused 50 ms are not owed.
        assert!(resumed - first < 45, "resumed delta was {}", resumed - first);
    }

    #[test]
    fn seek_is_immediate_and_clamped() {
        let clock = MasterClock::start();
        clock.seek(10_000);
        assert!(clock.now_millis() >= 10_000);

        clock.seek(-50_000);
        thread::sleep(Duration::from_millis(5));
        assert!(clock.now_millis() < 1_000);
    }

    #[test]
    fn rejects_non_positive_speed() {
        let clock = MasterClock::start();
        assert_eq!(clock.set_speed(0.0), Err(InvalidSpeed(0.0)));
        assert_eq!(clock.set_speed(-1.5), Err(InvalidSpeed(-1.5)));
        assert!(clock.set_speed(2.0).is_ok());
        assert_eq!(clock.speed(), 2.0);
    }

    #[test]
    fn speed_scales_advance_rate() {
        let clock = MasterClock::start();
        clock.set_speed(4.0).unwrap();
        let before = clock.now_millis();
        thread::sleep(Duration::from_millis(50));
        let delta = clock.now_millis() - before;
        assert!(delta > 120, "delta was {delta} ms");
    }
}
