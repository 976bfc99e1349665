//! Synthetic cycle source for platforms without a hardware timer.
//!
//! The run flag lives under one mutex shared by the cycling thread and any
//! thread that asks it to stop. The wait between ticks is a condvar wait, so
//! a stop request wakes a sleeping loop immediately. Stopping is one-shot: a
//! stopped clock never ticks again.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct SimulatedClock {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls `tick` every `interval` until [`stop`](Self::stop) is called,
    /// blocking the calling thread. Returns the number of ticks delivered.
    ///
    /// The flag is checked before every tick, so at most one tick can begin
    /// after `stop` returns (one already past its check).
    pub fn start(&self, interval: Duration, mut tick: impl FnMut()) -> u64 {
        let mut ticks = 0u64;
        info!(interval_ms = interval.as_millis() as u64, "simulated cycle started");

        loop {
            if *self.flag() {
                break;
            }
            tick();
            ticks += 1;

            let guard = self.flag();
            let (guard, _timeout) = self
                .wakeup
                .wait_timeout_while(guard, interval, |stopped| !*stopped)
                .unwrap_or_else(PoisonError::into_inner);
            if *guard {
                break;
            }
        }

        info!(ticks, "simulated cycle stopped");
        ticks
    }

    /// Requests the loop to end. Never waits for it; safe to call repeatedly
    /// and before `start`.
    pub fn stop(&self) {
        let mut stopped = self.flag();
        if !*stopped {
            debug!("simulated cycle stop requested");
        }
        *stopped = true;
        drop(stopped);
        self.wakeup.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.flag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_stop_before_start_runs_no_ticks() {
        let clock = SimulatedClock::new();
        clock.stop();
        let mut count = 0;
        assert_eq!(clock.start(Duration::from_millis(1), || count += 1), 0);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_stop_wakes_long_wait() {
        let clock = Arc::new(SimulatedClock::new());
        let remote = Arc::clone(&clock);
        let began = Instant::now();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.stop();
        });

        let ticks = clock.start(Duration::from_secs(30), || {});
        stopper.join().unwrap();
        assert_eq!(ticks, 1);
        assert!(began.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let clock = SimulatedClock::new();
        clock.stop();
        clock.stop();
        assert!(clock.is_stopped());
    }
}
