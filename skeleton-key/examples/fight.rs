//! Contended-lock fixture: a handful of workers fighting over one mutex.
//!
//! Run it under the preloaded shim, then decode the trace:
//!
//! ```bash
//! cargo build --release
//! LD_PRELOAD=target/release/libskeleton_key.so target/release/examples/fight
//! skeleton-key-decode /tmp/skeleton_key.bin
//! ```

// Examples are demonstration code - allow more relaxed rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::print_stdout)]

use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WORKERS: u64 = 5;
const ITERATIONS: u32 = 3;

/// A raw pthread mutex the preloaded shim can see; std's own locks are
/// futex-based and invisible to the tracer.
struct RawMutex(UnsafeCell<libc::pthread_mutex_t>);

// SAFETY: the wrapped pthread mutex is itself the synchronization
// primitive; all access goes through pthread_mutex_* calls.
unsafe impl Sync for RawMutex {}
unsafe impl Send for RawMutex {}

fn main() {
    let lock = Arc::new(RawMutex(UnsafeCell::new(unsafe { mem::zeroed() })));
    unsafe { libc::pthread_mutex_init(lock.0.get(), ptr::null()) };

    let workers: Vec<_> = (0..WORKERS)
        .map(|id| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for round in 0..ITERATIONS {
                    println!("worker {id} waiting for the lock (round {round})");
                    unsafe { libc::pthread_mutex_lock(lock.0.get()) };

                    let work = Duration::from_millis(100 + id * 37 % 250);
                    println!("worker {id} got the lock, working for {work:?}");
                    thread::sleep(work);

                    println!("worker {id} releasing the lock");
                    unsafe { libc::pthread_mutex_unlock(lock.0.get()) };

                    thread::sleep(Duration::from_millis(10));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    unsafe { libc::pthread_mutex_destroy(lock.0.get()) };
}
