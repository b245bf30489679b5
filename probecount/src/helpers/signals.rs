/// # Signals
///
/// Provides a simple way for both registering signal handlers or
/// simply notify terminations to the threads.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use log::info;
use signal_hook::iterator::Signals;

#[derive(Clone, Default)]
pub struct Running {
    condition: Arc<AtomicBool>,
}

impl Running {
    // Granularity at which sleeping threads check for termination.
    const TICK: Duration = Duration::from_millis(100);

    /// Create a new Running instance, shared between threads to synchronize
    /// their termination. Termination must be triggered manually, see
    /// `register_term_signals()` to also stop on termination signals.
    pub fn new() -> Running {
        Self::default()
    }

    /// Terminate upon receiving one of the termination signals (e.g. SIGTERM).
    pub fn register_term_signals(&self) -> Result<()> {
        let mut sigs = Signals::new(signal_hook::consts::TERM_SIGNALS)?;
        let condition = Arc::clone(&self.condition);

        thread::spawn(move || {
            if sigs.forever().next().is_some() {
                condition.store(true, Ordering::Relaxed);
                info!("Received signal, terminating...");
            }
        });

        Ok(())
    }

    pub fn running(&self) -> bool {
        !self.condition.load(Ordering::Relaxed)
    }

    pub fn terminate(&self) {
        self.condition.store(true, Ordering::Relaxed);
    }

    /// Sleep for `duration`, waking up early if termination is requested.
    /// Returns whether we're still running.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(Self::TICK.min(deadline - now));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate() {
        let run = Running::new();
        let clone = run.clone();
        assert!(run.running());

        clone.terminate();
        assert!(!run.running());
        assert!(!run.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn sleep() {
        let run = Running::new();
        let start = Instant::now();
        assert!(run.sleep(Duration::from_millis(150)));
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
