//! Classic A→B / B→A deadlock fixture.
//!
//! Two threads take two mutexes in opposite order; the run is expected to
//! wedge within a few iterations. The interesting artifact is the trace:
//! it ends with a lock pre-event on each thread that never gets its Done,
//! which is exactly the gap downstream analysis looks for.
//!
//! ```bash
//! LD_PRELOAD=target/release/libskeleton_key.so target/release/examples/deadlock
//! skeleton-key-decode /tmp/skeleton_key.bin
//! ```
//!
//! The process exits on its own after a grace period, abandoning the
//! wedged threads.

// Examples are demonstration code - allow more relaxed rules
#![allow(clippy::print_stdout)]

use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct RawMutex(UnsafeCell<libc::pthread_mutex_t>);

// SAFETY: the wrapped pthread mutex is itself the synchronization
// primitive; all access goes through pthread_mutex_* calls.
unsafe impl Sync for RawMutex {}
unsafe impl Send for RawMutex {}

fn new_mutex() -> Arc<RawMutex> {
    let mutex = Arc::new(RawMutex(UnsafeCell::new(unsafe { mem::zeroed() })));
    unsafe { libc::pthread_mutex_init(mutex.0.get(), ptr::null()) };
    mutex
}

fn churn(name: &str, first: &Arc<RawMutex>, second: &Arc<RawMutex>) {
    for i in 0..1000 {
        println!("{name}: iteration {i}");
        unsafe {
            libc::pthread_mutex_lock(first.0.get());
            libc::pthread_mutex_lock(second.0.get());
        }

        thread::sleep(Duration::from_micros(10));

        unsafe {
            libc::pthread_mutex_unlock(second.0.get());
            libc::pthread_mutex_unlock(first.0.get());
        }
    }
}

fn main() {
    let mutex_a = new_mutex();
    let mutex_b = new_mutex();

    {
        let (a, b) = (Arc::clone(&mutex_a), Arc::clone(&mutex_b));
        thread::spawn(move || churn("thread 1", &a, &b));
    }
    {
        let (a, b) = (Arc::clone(&mutex_a), Arc::clone(&mutex_b));
        thread::spawn(move || churn("thread 2", &b, &a));
    }

    thread::sleep(Duration::from_secs(2));
    println!("threads are most likely deadlocked now; exiting and abandoning them");
}
