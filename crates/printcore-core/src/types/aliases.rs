//! Type aliases for shared state.
//!
//! The firmware core itself is single threaded. Shared handles only appear at
//! the edges: a simulated planner or an output capture hands a clone of its
//! state to a test or to the host binary so the observer can read what the
//! core did after the fact.
//!
//! ```rust,ignore
//! use printcore_core::types::*;
//!
//! let lines: ThreadSafeVec<String> = thread_safe(Vec::new());
//! lines.lock().push("ok".to_string());
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

/// A thread-safe, mutex-protected wrapper for shared observation.
///
/// Uses `parking_lot::Mutex`, so locking never returns a poison error.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe vector, typically a log of emitted lines or planned moves.
pub type ThreadSafeVec<T> = Arc<Mutex<Vec<T>>>;

/// Wrap a value into a [`ThreadSafe`] handle.
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_safe_handle_is_shared() {
        let log: ThreadSafeVec<u32> = thread_safe(Vec::new());
        let observer = Arc::clone(&log);
        log.lock().push(7);
        assert_eq!(observer.lock().as_slice(), &[7]);
    }
}
