use std::time::Duration;

use tokio::task::JoinHandle;

/// A single cancellable one-shot timer.
///
/// At most one timer is armed at a time: scheduling replaces the pending one.
/// Dropping the handle aborts it.
#[derive(Debug, Default)]
pub struct RetryTimer {
    handle: Option<JoinHandle<()>>,
}

impl RetryTimer {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Arm the timer; `fire` runs once after `delay` unless cancelled first
    pub fn schedule<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        }));
    }

    /// Disarm the timer. Returns true if a timer was still pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        (fired, move || {
            let f = f.clone();
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let (fired, make) = counter();
        let mut timer = RetryTimer::new();
        timer.schedule(Duration::from_secs(5), make());
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_replaces_pending_timer() {
        let (fired, make) = counter();
        let mut timer = RetryTimer::new();
        timer.schedule(Duration::from_secs(1), make());
        timer.schedule(Duration::from_secs(3), make());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_disarm() {
        let (fired, make) = counter();
        let mut timer = RetryTimer::new();
        timer.schedule(Duration::from_secs(1), make());
        assert!(timer.cancel());
        assert!(!timer.cancel());

        let mut dropped = RetryTimer::new();
        dropped.schedule(Duration::from_secs(1), make());
        drop(dropped);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
