use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Cancellation signal shared by every task taking part in a check run.
///
/// The signal is sticky: once [`CancellationToken::cancel`] is called all the clones observe it,
/// and every thread blocked in [`CancellationToken::wait`] or [`CancellationToken::wait_timeout`]
/// is woken up immediately.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<(Mutex<bool>, Condvar)>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation signal and notifies all the waiting threads.
    pub fn cancel(&self) {
        let (lck, cvar) = &*self.0;
        let mut cancelled = lck.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        cvar.notify_all();
    }

    /// Checks whether the token is cancelled without blocking.
    pub fn is_cancelled(&self) -> bool {
        let (lck, _) = &*self.0;
        *lck.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the token is cancelled or the `timeout` elapses.
    ///
    /// Returns true if the token was cancelled before the timeout, false otherwise.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lck, cvar) = &*self.0;
        let cancelled = lck.lock().unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = cvar
            .wait_timeout_while(cancelled, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }

    /// Blocks until the token is cancelled.
    pub fn wait(&self) {
        let (lck, cvar) = &*self.0;
        let cancelled = lck.lock().unwrap_or_else(PoisonError::into_inner);
        let _cancelled = cvar
            .wait_while(cancelled, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_cancel_is_observed_by_clones() {
        let token = CancellationToken::new();
        let cloned = token.clone();
        assert!(!cloned.is_cancelled());

        token.cancel();

        assert!(cloned.is_cancelled());
        // the signal is sticky
        assert!(cloned.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn test_wait_timeout_without_cancellation() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_wakes_up_waiting_threads() {
        let token = CancellationToken::new();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let token = token.clone();
                thread::spawn(move || {
                    let start = Instant::now();
                    let cancelled = token.wait_timeout(Duration::from_secs(60));
                    (cancelled, start.elapsed())
                })
            })
            .collect();

        let blocking_waiter = {
            let token = token.clone();
            thread::spawn(move || token.wait())
        };

        thread::sleep(Duration::from_millis(50));
        token.cancel();

        for waiter in waiters {
            let (cancelled, elapsed) = waiter.join().unwrap();
            assert!(cancelled);
            assert!(elapsed < Duration::from_secs(10));
        }
        blocking_waiter.join().unwrap();
    }
}
