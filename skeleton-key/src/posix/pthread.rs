//! The interposed `pthread_*` entry points.
//!
//! Every wrapper follows the same skeleton: claim the per-thread recursion
//! guard (or forward directly if it is already held), emit the pre-event
//! for potentially blocking operations, delegate to the real
//! implementation, emit the terminal event with the real return value and
//! — for blocking operations — the measured wait, then return the result
//! byte-for-byte. A wrapper whose symbol never resolved returns `ENOSYS`
//! and emits nothing; there is no implementation left to forward to.

use core::ffi::c_void;
use core::ptr;

use libc::{
    c_int, pthread_attr_t, pthread_cond_t, pthread_condattr_t, pthread_mutex_t,
    pthread_mutexattr_t, pthread_rwlock_t, pthread_rwlockattr_t, pthread_t, timespec, ENOSYS,
};

use crate::event::EventKind;
use crate::logger;
use crate::time;

use super::guard;
use super::real;

/// Logs the single event of a non-blocking operation, after the real call.
fn traced_simple(kind: EventKind, ptr1: *mut c_void, result: c_int) -> c_int {
    logger::log(kind, ptr1 as usize, 0, result, 0);
    result
}

/// Brackets a potentially blocking call with its pre/`Done` event pair,
/// timing the call itself.
fn traced_blocking(
    pre: EventKind,
    done: EventKind,
    ptr1: *mut c_void,
    ptr2: *mut c_void,
    call: impl FnOnce() -> c_int,
) -> c_int {
    logger::log(pre, ptr1 as usize, ptr2 as usize, 0, 0);
    let start = time::monotonic_nanos();
    let result = call();
    let duration_ns = time::monotonic_nanos().saturating_sub(start);
    logger::log(done, ptr1 as usize, ptr2 as usize, result, duration_ns);
    result
}

//
// Thread creation
//

/// Intercepts `pthread_create`.
///
/// Logs the address the new thread's handle was written to; the new thread
/// itself emits nothing on its own behalf.
///
/// # Safety
///
/// Called from C via the preloaded cdylib; all pointers must satisfy
/// `pthread_create`'s contract.
#[no_mangle]
#[allow(unreachable_pub)] // Exposed via C ABI, not Rust module visibility
pub unsafe extern "C" fn pthread_create(
    thread: *mut pthread_t,
    attr: *const pthread_attr_t,
    start_routine: real::StartRoutine,
    arg: *mut c_void,
) -> c_int {
    let Some(real) = real::THREAD_CREATE.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(thread, attr, start_routine, arg);
    };
    let result = real(thread, attr, start_routine, arg);
    traced_simple(EventKind::ThreadCreate, thread.cast(), result)
}

//
// Mutex wrappers
//

/// # Safety
///
/// Called from C via the preloaded cdylib; arguments must satisfy the
/// wrapped function's contract. The same holds for every wrapper below.
#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_mutex_init(
    mutex: *mut pthread_mutex_t,
    attr: *const pthread_mutexattr_t,
) -> c_int {
    let Some(real) = real::MUTEX_INIT.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(mutex, attr);
    };
    let result = real(mutex, attr);
    traced_simple(EventKind::MutexInit, mutex.cast(), result)
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_mutex_destroy(mutex: *mut pthread_mutex_t) -> c_int {
    let Some(real) = real::MUTEX_DESTROY.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(mutex);
    };
    let result = real(mutex);
    traced_simple(EventKind::MutexDestroy, mutex.cast(), result)
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_mutex_lock(mutex: *mut pthread_mutex_t) -> c_int {
    let Some(real) = real::MUTEX_LOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(mutex);
    };
    traced_blocking(
        EventKind::MutexLock,
        EventKind::MutexLockDone,
        mutex.cast(),
        ptr::null_mut(),
        || unsafe { real(mutex) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_mutex_trylock(mutex: *mut pthread_mutex_t) -> c_int {
    let Some(real) = real::MUTEX_TRYLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(mutex);
    };
    traced_blocking(
        EventKind::MutexTryLock,
        EventKind::MutexTryLockDone,
        mutex.cast(),
        ptr::null_mut(),
        || unsafe { real(mutex) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_mutex_timedlock(
    mutex: *mut pthread_mutex_t,
    abstime: *const timespec,
) -> c_int {
    let Some(real) = real::MUTEX_TIMEDLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(mutex, abstime);
    };
    traced_blocking(
        EventKind::MutexTimedLock,
        EventKind::MutexTimedLockDone,
        mutex.cast(),
        ptr::null_mut(),
        || unsafe { real(mutex, abstime) },
    )
}

// Unlock is logged after the fact and untimed: it releases rather than
// waits, and a contended wake-up belongs to the waiter's timeline.
#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_mutex_unlock(mutex: *mut pthread_mutex_t) -> c_int {
    let Some(real) = real::MUTEX_UNLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(mutex);
    };
    let result = real(mutex);
    traced_simple(EventKind::MutexUnlock, mutex.cast(), result)
}

//
// RWLock wrappers
//

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_init(
    rwlock: *mut pthread_rwlock_t,
    attr: *const pthread_rwlockattr_t,
) -> c_int {
    let Some(real) = real::RWLOCK_INIT.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock, attr);
    };
    let result = real(rwlock, attr);
    traced_simple(EventKind::RwLockInit, rwlock.cast(), result)
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_destroy(rwlock: *mut pthread_rwlock_t) -> c_int {
    let Some(real) = real::RWLOCK_DESTROY.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock);
    };
    let result = real(rwlock);
    traced_simple(EventKind::RwLockDestroy, rwlock.cast(), result)
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_rdlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let Some(real) = real::RWLOCK_RDLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock);
    };
    traced_blocking(
        EventKind::RwLockRead,
        EventKind::RwLockReadDone,
        rwlock.cast(),
        ptr::null_mut(),
        || unsafe { real(rwlock) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_tryrdlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let Some(real) = real::RWLOCK_TRYRDLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock);
    };
    traced_blocking(
        EventKind::RwLockTryRead,
        EventKind::RwLockTryReadDone,
        rwlock.cast(),
        ptr::null_mut(),
        || unsafe { real(rwlock) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_timedrdlock(
    rwlock: *mut pthread_rwlock_t,
    abstime: *const timespec,
) -> c_int {
    let Some(real) = real::RWLOCK_TIMEDRDLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock, abstime);
    };
    traced_blocking(
        EventKind::RwLockTimedRead,
        EventKind::RwLockTimedReadDone,
        rwlock.cast(),
        ptr::null_mut(),
        || unsafe { real(rwlock, abstime) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_wrlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let Some(real) = real::RWLOCK_WRLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock);
    };
    traced_blocking(
        EventKind::RwLockWrite,
        EventKind::RwLockWriteDone,
        rwlock.cast(),
        ptr::null_mut(),
        || unsafe { real(rwlock) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_trywrlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let Some(real) = real::RWLOCK_TRYWRLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock);
    };
    traced_blocking(
        EventKind::RwLockTryWrite,
        EventKind::RwLockTryWriteDone,
        rwlock.cast(),
        ptr::null_mut(),
        || unsafe { real(rwlock) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_timedwrlock(
    rwlock: *mut pthread_rwlock_t,
    abstime: *const timespec,
) -> c_int {
    let Some(real) = real::RWLOCK_TIMEDWRLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock, abstime);
    };
    traced_blocking(
        EventKind::RwLockTimedWrite,
        EventKind::RwLockTimedWriteDone,
        rwlock.cast(),
        ptr::null_mut(),
        || unsafe { real(rwlock, abstime) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_rwlock_unlock(rwlock: *mut pthread_rwlock_t) -> c_int {
    let Some(real) = real::RWLOCK_UNLOCK.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(rwlock);
    };
    let result = real(rwlock);
    traced_simple(EventKind::RwLockUnlock, rwlock.cast(), result)
}

//
// Condition variable wrappers (version-qualified delegates, see real.rs)
//

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_cond_init(
    cond: *mut pthread_cond_t,
    attr: *const pthread_condattr_t,
) -> c_int {
    let Some(real) = real::COND_INIT.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(cond, attr);
    };
    let result = real(cond, attr);
    traced_simple(EventKind::CondInit, cond.cast(), result)
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_cond_destroy(cond: *mut pthread_cond_t) -> c_int {
    let Some(real) = real::COND_DESTROY.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(cond);
    };
    let result = real(cond);
    traced_simple(EventKind::CondDestroy, cond.cast(), result)
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_cond_signal(cond: *mut pthread_cond_t) -> c_int {
    let Some(real) = real::COND_SIGNAL.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(cond);
    };
    let result = real(cond);
    traced_simple(EventKind::CondSignal, cond.cast(), result)
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_cond_broadcast(cond: *mut pthread_cond_t) -> c_int {
    let Some(real) = real::COND_BROADCAST.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(cond);
    };
    let result = real(cond);
    traced_simple(EventKind::CondBroadcast, cond.cast(), result)
}

/// Intercepts `pthread_cond_wait`; the associated mutex rides along as the
/// event's auxiliary pointer.
#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_cond_wait(
    cond: *mut pthread_cond_t,
    mutex: *mut pthread_mutex_t,
) -> c_int {
    let Some(real) = real::COND_WAIT.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(cond, mutex);
    };
    traced_blocking(
        EventKind::CondWait,
        EventKind::CondWaitDone,
        cond.cast(),
        mutex.cast(),
        || unsafe { real(cond, mutex) },
    )
}

#[no_mangle]
#[allow(unreachable_pub)]
pub unsafe extern "C" fn pthread_cond_timedwait(
    cond: *mut pthread_cond_t,
    mutex: *mut pthread_mutex_t,
    abstime: *const timespec,
) -> c_int {
    let Some(real) = real::COND_TIMEDWAIT.get() else {
        return ENOSYS;
    };
    let Some(_hook) = guard::enter() else {
        return real(cond, mutex, abstime);
    };
    traced_blocking(
        EventKind::CondTimedWait,
        EventKind::CondTimedWaitDone,
        cond.cast(),
        mutex.cast(),
        || unsafe { real(cond, mutex, abstime) },
    )
}

#[cfg(test)]
mod tests {
    //! Direct calls into the wrappers; delegation must behave exactly like
    //! the real functions whether or not the writer is up.

    use super::*;
    use core::mem;

    #[test]
    fn mutex_wrappers_delegate_faithfully() {
        let mut mutex: pthread_mutex_t = unsafe { mem::zeroed() };
        unsafe {
            assert_eq!(pthread_mutex_init(&mut mutex, ptr::null()), 0);
            assert_eq!(pthread_mutex_lock(&mut mutex), 0);
            // A default (non-recursive) mutex refuses a second claim.
            assert_eq!(pthread_mutex_trylock(&mut mutex), libc::EBUSY);
            assert_eq!(pthread_mutex_unlock(&mut mutex), 0);
            assert_eq!(pthread_mutex_destroy(&mut mutex), 0);
        }
    }

    #[test]
    fn rwlock_wrappers_delegate_faithfully() {
        let mut rwlock: pthread_rwlock_t = unsafe { mem::zeroed() };
        unsafe {
            assert_eq!(pthread_rwlock_init(&mut rwlock, ptr::null()), 0);
            assert_eq!(pthread_rwlock_rdlock(&mut rwlock), 0);
            // Readers share; a writer cannot join them.
            assert_eq!(pthread_rwlock_tryrdlock(&mut rwlock), 0);
            assert_eq!(pthread_rwlock_trywrlock(&mut rwlock), libc::EBUSY);
            assert_eq!(pthread_rwlock_unlock(&mut rwlock), 0);
            assert_eq!(pthread_rwlock_unlock(&mut rwlock), 0);
            assert_eq!(pthread_rwlock_destroy(&mut rwlock), 0);
        }
    }

    #[test]
    fn cond_wrappers_delegate_through_versioned_symbols() {
        let mut cond: pthread_cond_t = unsafe { mem::zeroed() };
        unsafe {
            assert_eq!(pthread_cond_init(&mut cond, ptr::null()), 0);
            assert_eq!(pthread_cond_signal(&mut cond), 0);
            assert_eq!(pthread_cond_broadcast(&mut cond), 0);
            assert_eq!(pthread_cond_destroy(&mut cond), 0);
        }
    }

    #[test]
    fn timedlock_times_out_with_the_real_error_code() {
        let mut mutex: pthread_mutex_t = unsafe { mem::zeroed() };
        unsafe {
            assert_eq!(pthread_mutex_init(&mut mutex, ptr::null()), 0);
            assert_eq!(pthread_mutex_lock(&mut mutex), 0);

            // An absolute deadline already in the past.
            let deadline = libc::timespec {
                tv_sec: 1,
                tv_nsec: 0,
            };
            assert_eq!(pthread_mutex_timedlock(&mut mutex, &deadline), libc::ETIMEDOUT);

            assert_eq!(pthread_mutex_unlock(&mut mutex), 0);
            assert_eq!(pthread_mutex_destroy(&mut mutex), 0);
        }
    }
}
