//! Resolution of the real pthread entry points via `dlsym(RTLD_NEXT)`.
//!
//! Each wrapped symbol has a lock-free, lazily-cached pointer to its
//! next-in-chain implementation. Key properties:
//!
//! - **Lock-free**: atomic operations only, safe for signal contexts
//! - **Recursion-safe**: a sentinel detects `dlsym` re-entering a wrapper
//!   mid-resolution and breaks the loop
//! - **Never panics**: returns `Option` instead of panicking on failure
//!
//! The condition-variable symbols are version-qualified: glibc keeps two
//! ABIs of `pthread_cond_*` alive and a plain `dlsym(RTLD_NEXT)` binds the
//! wrong one, which silently corrupts condvar state. Those lookups go
//! through `dlvsym` with the `GLIBC_2.3.2` tag. Porting to another libc
//! requires re-verifying that tag.
//!
//! [`resolve_all`] warms the whole table from the library constructor, so
//! the table is effectively read-only by the time the target runs; misses
//! are reported once on stderr and leave the affected wrapper in
//! pass-through mode.

use core::ffi::c_void;
use core::marker::PhantomData;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use libc::{
    c_char, c_int, pthread_attr_t, pthread_cond_t, pthread_condattr_t, pthread_mutex_t,
    pthread_mutexattr_t, pthread_rwlock_t, pthread_rwlockattr_t, pthread_t, timespec, RTLD_NEXT,
};
use libc_print::libc_eprintln;

/// Sentinel value indicating resolution is in progress.
///
/// Address 1 is never a valid pointer on any supported platform and is
/// distinct from null (unresolved).
const RESOLVING: *mut c_void = core::ptr::without_provenance_mut(1);

/// ABI version tag pinning the condvar symbols to the implementation the
/// target was compiled against.
const COND_ABI_VERSION: &[u8] = b"GLIBC_2.3.2\0";

/// A lazily-resolved next-in-chain function pointer.
///
/// Multiple threads may race to resolve; all observe the same pointer (or
/// `None`). The symbol name and, where needed, the version tag are fixed
/// at construction, which is also where the type parameter is pinned to
/// the symbol's real signature.
pub(super) struct LazyFn<T> {
    ptr: AtomicPtr<c_void>,
    name: &'static [u8],
    version: Option<&'static [u8]>,
    _marker: PhantomData<T>,
}

// SAFETY: LazyFn only contains an AtomicPtr plus static data. The resolved
// function pointer is valid for any thread.
unsafe impl<T> Sync for LazyFn<T> {}
unsafe impl<T> Send for LazyFn<T> {}

impl<T> LazyFn<T> {
    /// An unversioned symbol. `name` must be NUL-terminated.
    const fn new(name: &'static [u8]) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            name,
            version: None,
            _marker: PhantomData,
        }
    }

    /// A version-qualified symbol. Both strings must be NUL-terminated.
    const fn versioned(name: &'static [u8], version: &'static [u8]) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            name,
            version: Some(version),
            _marker: PhantomData,
        }
    }

    /// Symbol name without the trailing NUL, for diagnostics.
    pub(super) fn name_str(&self) -> &'static str {
        std::str::from_utf8(&self.name[..self.name.len() - 1]).unwrap_or("<non-utf8 symbol>")
    }

    /// Resolves and returns the real function, or `None` if unavailable.
    ///
    /// `None` means resolution is in progress on this call chain (recursion
    /// detected), the symbol does not exist in the remaining search order,
    /// or the library is not in a position to use `RTLD_NEXT`.
    ///
    /// # Safety
    ///
    /// `T` must match the real signature of the symbol this static was
    /// constructed with.
    #[inline]
    pub(super) unsafe fn get(&self) -> Option<T> {
        // Fast path: already resolved
        let current = self.ptr.load(Ordering::Acquire);

        if current == RESOLVING {
            return None;
        }

        if !current.is_null() {
            return Some(mem::transmute_copy(&current));
        }

        self.resolve_slow()
    }

    /// Slow path; compare-exchange ensures a single resolver.
    #[cold]
    unsafe fn resolve_slow(&self) -> Option<T> {
        let claim = self.ptr.compare_exchange(
            ptr::null_mut(),
            RESOLVING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match claim {
            Ok(_) => {
                let symbol = self.name.as_ptr().cast::<c_char>();
                let real = match self.version {
                    Some(version) => {
                        libc::dlvsym(RTLD_NEXT, symbol, version.as_ptr().cast::<c_char>())
                    }
                    None => libc::dlsym(RTLD_NEXT, symbol),
                };

                if real.is_null() {
                    // Reset so a later call may retry (and likely fail too).
                    self.ptr.store(ptr::null_mut(), Ordering::Release);
                    return None;
                }

                self.ptr.store(real, Ordering::Release);
                Some(mem::transmute_copy(&real))
            }
            Err(actual) => {
                if actual == RESOLVING {
                    None
                } else {
                    Some(mem::transmute_copy(&actual))
                }
            }
        }
    }

    #[cfg(test)]
    fn is_resolved(&self) -> bool {
        let ptr = self.ptr.load(Ordering::Acquire);
        !ptr.is_null() && ptr != RESOLVING
    }
}

// Real signatures of the wrapped entry points.
pub(super) type StartRoutine = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
pub(super) type ThreadCreateFn = unsafe extern "C" fn(
    *mut pthread_t,
    *const pthread_attr_t,
    StartRoutine,
    *mut c_void,
) -> c_int;
pub(super) type MutexInitFn =
    unsafe extern "C" fn(*mut pthread_mutex_t, *const pthread_mutexattr_t) -> c_int;
pub(super) type MutexFn = unsafe extern "C" fn(*mut pthread_mutex_t) -> c_int;
pub(super) type MutexTimedFn =
    unsafe extern "C" fn(*mut pthread_mutex_t, *const timespec) -> c_int;
pub(super) type RwlockInitFn =
    unsafe extern "C" fn(*mut pthread_rwlock_t, *const pthread_rwlockattr_t) -> c_int;
pub(super) type RwlockFn = unsafe extern "C" fn(*mut pthread_rwlock_t) -> c_int;
pub(super) type RwlockTimedFn =
    unsafe extern "C" fn(*mut pthread_rwlock_t, *const timespec) -> c_int;
pub(super) type CondInitFn =
    unsafe extern "C" fn(*mut pthread_cond_t, *const pthread_condattr_t) -> c_int;
pub(super) type CondFn = unsafe extern "C" fn(*mut pthread_cond_t) -> c_int;
pub(super) type CondWaitFn =
    unsafe extern "C" fn(*mut pthread_cond_t, *mut pthread_mutex_t) -> c_int;
pub(super) type CondTimedWaitFn =
    unsafe extern "C" fn(*mut pthread_cond_t, *mut pthread_mutex_t, *const timespec) -> c_int;

pub(super) static THREAD_CREATE: LazyFn<ThreadCreateFn> = LazyFn::new(b"pthread_create\0");

pub(super) static MUTEX_INIT: LazyFn<MutexInitFn> = LazyFn::new(b"pthread_mutex_init\0");
pub(super) static MUTEX_DESTROY: LazyFn<MutexFn> = LazyFn::new(b"pthread_mutex_destroy\0");
pub(super) static MUTEX_LOCK: LazyFn<MutexFn> = LazyFn::new(b"pthread_mutex_lock\0");
pub(super) static MUTEX_TRYLOCK: LazyFn<MutexFn> = LazyFn::new(b"pthread_mutex_trylock\0");
pub(super) static MUTEX_TIMEDLOCK: LazyFn<MutexTimedFn> = LazyFn::new(b"pthread_mutex_timedlock\0");
pub(super) static MUTEX_UNLOCK: LazyFn<MutexFn> = LazyFn::new(b"pthread_mutex_unlock\0");

pub(super) static RWLOCK_INIT: LazyFn<RwlockInitFn> = LazyFn::new(b"pthread_rwlock_init\0");
pub(super) static RWLOCK_DESTROY: LazyFn<RwlockFn> = LazyFn::new(b"pthread_rwlock_destroy\0");
pub(super) static RWLOCK_RDLOCK: LazyFn<RwlockFn> = LazyFn::new(b"pthread_rwlock_rdlock\0");
pub(super) static RWLOCK_TRYRDLOCK: LazyFn<RwlockFn> = LazyFn::new(b"pthread_rwlock_tryrdlock\0");
pub(super) static RWLOCK_TIMEDRDLOCK: LazyFn<RwlockTimedFn> =
    LazyFn::new(b"pthread_rwlock_timedrdlock\0");
pub(super) static RWLOCK_WRLOCK: LazyFn<RwlockFn> = LazyFn::new(b"pthread_rwlock_wrlock\0");
pub(super) static RWLOCK_TRYWRLOCK: LazyFn<RwlockFn> = LazyFn::new(b"pthread_rwlock_trywrlock\0");
pub(super) static RWLOCK_TIMEDWRLOCK: LazyFn<RwlockTimedFn> =
    LazyFn::new(b"pthread_rwlock_timedwrlock\0");
pub(super) static RWLOCK_UNLOCK: LazyFn<RwlockFn> = LazyFn::new(b"pthread_rwlock_unlock\0");

pub(super) static COND_INIT: LazyFn<CondInitFn> =
    LazyFn::versioned(b"pthread_cond_init\0", COND_ABI_VERSION);
pub(super) static COND_DESTROY: LazyFn<CondFn> =
    LazyFn::versioned(b"pthread_cond_destroy\0", COND_ABI_VERSION);
pub(super) static COND_SIGNAL: LazyFn<CondFn> =
    LazyFn::versioned(b"pthread_cond_signal\0", COND_ABI_VERSION);
pub(super) static COND_BROADCAST: LazyFn<CondFn> =
    LazyFn::versioned(b"pthread_cond_broadcast\0", COND_ABI_VERSION);
pub(super) static COND_WAIT: LazyFn<CondWaitFn> =
    LazyFn::versioned(b"pthread_cond_wait\0", COND_ABI_VERSION);
pub(super) static COND_TIMEDWAIT: LazyFn<CondTimedWaitFn> =
    LazyFn::versioned(b"pthread_cond_timedwait\0", COND_ABI_VERSION);

/// Warms every wrapped symbol from the library constructor.
///
/// A miss leaves that wrapper in pass-through mode and is reported once;
/// the other wrappers are unaffected.
pub(super) fn resolve_all() {
    let mut missing = 0usize;

    macro_rules! warm {
        ($($sym:ident),* $(,)?) => {
            $(
                // SAFETY: each static's type parameter was pinned to its
                // symbol's real signature at the definitions above.
                if unsafe { $sym.get() }.is_none() {
                    missing += 1;
                    libc_eprintln!(
                        "[skeleton-key] warning: failed to resolve {}",
                        $sym.name_str()
                    );
                }
            )*
        };
    }

    warm!(
        THREAD_CREATE,
        MUTEX_INIT,
        MUTEX_DESTROY,
        MUTEX_LOCK,
        MUTEX_TRYLOCK,
        MUTEX_TIMEDLOCK,
        MUTEX_UNLOCK,
        RWLOCK_INIT,
        RWLOCK_DESTROY,
        RWLOCK_RDLOCK,
        RWLOCK_TRYRDLOCK,
        RWLOCK_TIMEDRDLOCK,
        RWLOCK_WRLOCK,
        RWLOCK_TRYWRLOCK,
        RWLOCK_TIMEDWRLOCK,
        RWLOCK_UNLOCK,
        COND_INIT,
        COND_DESTROY,
        COND_SIGNAL,
        COND_BROADCAST,
        COND_WAIT,
        COND_TIMEDWAIT,
    );

    if missing > 0 {
        libc_eprintln!(
            "[skeleton-key] {} symbol(s) unresolved; affected calls will not be traced",
            missing
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_fn_starts_unresolved() {
        let lazy: LazyFn<unsafe extern "C" fn() -> i32> = LazyFn::new(b"getpid\0");
        assert!(!lazy.is_resolved());
    }

    #[test]
    fn lazy_fn_resolves_existing_function() {
        let lazy: LazyFn<unsafe extern "C" fn() -> i32> = LazyFn::new(b"getpid\0");

        unsafe {
            assert!(lazy.get().is_some());
            assert!(lazy.is_resolved());
            // Second call returns the cached value.
            assert!(lazy.get().is_some());
        }
    }

    #[test]
    fn lazy_fn_reports_nonexistent_symbols() {
        let lazy: LazyFn<unsafe extern "C" fn() -> i32> =
            LazyFn::new(b"__skeleton_key_no_such_symbol__\0");
        unsafe {
            assert!(lazy.get().is_none());
        }
        assert!(!lazy.is_resolved());
    }

    #[test]
    fn versioned_condvar_symbols_resolve() {
        // The ABI-critical path: dlvsym with the explicit glibc tag.
        unsafe {
            assert!(COND_WAIT.get().is_some());
            assert!(COND_SIGNAL.get().is_some());
        }
    }

    #[test]
    fn name_str_strips_the_terminator() {
        assert_eq!(MUTEX_LOCK.name_str(), "pthread_mutex_lock");
    }
}
