//! POSIX entry-point interposition via `LD_PRELOAD`.
//!
//! When this library is preloaded, its `pthread_*` definitions shadow the
//! platform's, every intercepted call is recorded, and the call is
//! forwarded to the real implementation resolved through the dynamic
//! linker. No target modification, no environment opt-in: loading the
//! library is the opt-in.
//!
//! ```bash
//! LD_PRELOAD=/path/to/libskeleton_key.so ./target_program
//! SKELETON_KEYOUTPUT=/tmp/run1.bin LD_PRELOAD=... ./target_program
//! ```
//!
//! # Load-time ordering
//!
//! The constructor warms the symbol table before opening the writer, so by
//! the time any wrapper can log, its delegate is resolved. Until the
//! writer is up, wrappers forward without logging.

pub(crate) mod guard;
mod pthread;
mod real;

use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use spin::Once;

/// Trace destination when `SKELETON_KEYOUTPUT` is unset.
const DEFAULT_OUTPUT: &str = "/tmp/skeleton_key.bin";

/// Environment variable naming the output file.
const OUTPUT_ENV: &[u8] = b"SKELETON_KEYOUTPUT\0";

static INIT_ONCE: Once<()> = Once::new();

/// Reads `SKELETON_KEYOUTPUT` through raw `getenv`; std's environment
/// machinery is not guaranteed usable this early in process life.
fn output_path() -> PathBuf {
    // SAFETY: getenv is callable before main; a non-null result points at a
    // NUL-terminated string owned by the environment.
    unsafe {
        let val = libc::getenv(OUTPUT_ENV.as_ptr().cast::<libc::c_char>());
        if val.is_null() {
            PathBuf::from(DEFAULT_OUTPUT)
        } else {
            PathBuf::from(OsStr::from_bytes(CStr::from_ptr(val).to_bytes()))
        }
    }
}

/// Library constructor — runs when the dynamic linker maps the library,
/// before the target's `main`.
#[used]
#[link_section = ".init_array"]
static INIT: extern "C" fn() = {
    extern "C" fn init() {
        INIT_ONCE.call_once(|| {
            real::resolve_all();
            crate::logger::init(&output_path());
        });
    }
    init
};

/// Library destructor — closes the trace file on process exit. May not run
/// if the target calls `_exit()` directly; the per-record flush makes the
/// file parsable regardless.
#[used]
#[link_section = ".fini_array"]
static FINI: extern "C" fn() = {
    extern "C" fn fini() {
        crate::logger::teardown();
    }
    fini
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_defaults_and_honors_env() {
        std::env::remove_var("SKELETON_KEYOUTPUT");
        assert_eq!(output_path(), PathBuf::from(DEFAULT_OUTPUT));

        std::env::set_var("SKELETON_KEYOUTPUT", "/tmp/elsewhere.trace");
        assert_eq!(output_path(), PathBuf::from("/tmp/elsewhere.trace"));
        std::env::remove_var("SKELETON_KEYOUTPUT");
    }
}
