//! Monotonic clock reads for event timestamps and durations.

/// Current `CLOCK_MONOTONIC` reading in nanoseconds.
///
/// Returns 0 if the clock read fails, which on Linux it does not.
pub(crate) fn monotonic_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime with CLOCK_MONOTONIC is async-signal-safe
    let result = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &raw mut ts) };

    if result != 0 {
        return 0;
    }

    #[allow(clippy::cast_sign_loss)]
    let nanos = (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64);
    nanos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_nonzero_and_monotonic() {
        let first = monotonic_nanos();
        assert!(first > 0);
        let second = monotonic_nanos();
        assert!(second >= first);
    }
}
