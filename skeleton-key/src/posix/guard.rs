//! The per-thread recursion guard.
//!
//! The writer takes a mutex and the stack capture may touch allocator or
//! unwinder locks; any of those can re-enter an interposed symbol. While a
//! thread holds the guard, nested entries forward straight to the real
//! implementation and emit nothing.

use std::cell::Cell;

thread_local! {
    // Const-initialized Cell<bool> registers no TLS destructor, so the
    // flag stays readable while a thread is tearing down.
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside the shim until dropped.
pub(crate) struct HookGuard(());

impl Drop for HookGuard {
    fn drop(&mut self) {
        let _ = IN_HOOK.try_with(|flag| flag.set(false));
    }
}

/// Claims the guard for this thread.
///
/// `None` when the thread is already inside the shim — or its TLS is gone
/// during teardown — in which case the caller forwards directly.
pub(crate) fn enter() -> Option<HookGuard> {
    let claimed = IN_HOOK.try_with(|flag| {
        if flag.get() {
            false
        } else {
            flag.set(true);
            true
        }
    });
    match claimed {
        Ok(true) => Some(HookGuard(())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentry_is_refused_until_release() {
        let outer = enter();
        assert!(outer.is_some());
        assert!(enter().is_none());
        drop(outer);
        assert!(enter().is_some());
    }

    #[test]
    fn guard_is_per_thread() {
        let _outer = enter().expect("fresh thread state");
        std::thread::spawn(|| {
            assert!(enter().is_some());
        })
        .join()
        .expect("spawned thread panicked");
    }
}
