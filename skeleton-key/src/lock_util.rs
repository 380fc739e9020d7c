//! Poison recovery for the writer lock.
//!
//! A panic while holding the writer mutex must not end tracing for the
//! rest of the run: trace data is diagnostic, not safety-critical, and a
//! partial trace beats none.

use std::sync::{MutexGuard, PoisonError};

/// Recovers a poisoned writer guard instead of propagating the error.
pub(crate) fn recover<'a, T>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|poison| {
        libc_print::libc_eprintln!("[skeleton-key] warning: recovering from poisoned writer lock");
        poison.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn recovers_after_a_panicked_holder() {
        let lock = Mutex::new(7u32);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.lock().unwrap();
            panic!("poison it");
        }));
        assert!(result.is_err());

        let guard = recover(lock.lock());
        assert_eq!(*guard, 7);
    }
}
