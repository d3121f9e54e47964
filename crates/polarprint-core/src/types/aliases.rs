//! Type aliases for state that crosses the transport thread boundary.
//!
//! The motion compiler never shares its buffers across threads; only sinks
//! observed from tests and the transport's workers do.

use parking_lot::Mutex;
use std::sync::Arc;

/// A thread-safe, mutex-protected wrapper for cross-thread sharing.
///
/// Uses `parking_lot::Mutex`, so `lock()` never returns a poison error.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// Create a new `ThreadSafe<T>` from a value.
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state_across_threads() {
        let a = thread_safe(Vec::<u8>::new());
        let worker = {
            let b = Arc::clone(&a);
            std::thread::spawn(move || b.lock().push(3))
        };
        worker.join().unwrap();
        assert_eq!(*a.lock(), vec![3]);
    }
}
