//! Lock ordering documentation and enforcement helper (spec.md §5
//! "Shared resources": `acquire_ordered_locks()` enforces a global
//! ordering `process_lock → status_lock → buffer_lock` to prevent
//! deadlocks).

use parking_lot::{Mutex, MutexGuard};

/// Holds the three guards in the mandated order for the duration of a
/// scope that needs all three. Taking them individually in any other
/// order anywhere in the codebase is the bug this type prevents.
pub struct OrderedLocks<'a, P, S, B> {
    pub process: MutexGuard<'a, P>,
    pub status: MutexGuard<'a, S>,
    pub buffer: MutexGuard<'a, B>,
}

pub fn acquire_ordered_locks<'a, P, S, B>(
    process_lock: &'a Mutex<P>,
    status_lock: &'a Mutex<S>,
    buffer_lock: &'a Mutex<B>,
) -> OrderedLocks<'a, P, S, B> {
    let process = process_lock.lock();
    let status = status_lock.lock();
    let buffer = buffer_lock.lock();
    OrderedLocks { process, status, buffer }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_locks_grants_access_to_all_three_guards() {
        let process_lock = Mutex::new(0u32);
        let status_lock = Mutex::new("idle".to_string());
        let buffer_lock = Mutex::new(Vec::<i32>::new());

        let mut locks = acquire_ordered_locks(&process_lock, &status_lock, &buffer_lock);
        *locks.process += 1;
        locks.status.push_str("-running");
        locks.buffer.push(1);

        assert_eq!(*locks.process, 1);
        assert_eq!(*locks.status, "idle-running");
        assert_eq!(*locks.buffer, vec![1]);
    }
}
