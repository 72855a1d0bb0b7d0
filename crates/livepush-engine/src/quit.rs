//! Cooperative cancellation for worker loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A one-way flag shared between a controller and its worker.
///
/// The worker reads it at the top of every loop iteration. Setting it is
/// idempotent and safe from any thread.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal {
    flag: Arc<AtomicBool>,
}

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop.
    pub fn quit(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_quit_is_idempotent_and_shared() {
        let signal = QuitSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_set());

        signal.quit();
        signal.quit();
        assert!(observer.is_set());
    }

    #[test]
    fn test_quit_from_another_thread() {
        let signal = QuitSignal::new();
        let remote = signal.clone();
        thread::spawn(move || remote.quit()).join().unwrap();
        assert!(signal.is_set());
    }
}
