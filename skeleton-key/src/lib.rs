//! Skeleton-key: a preload tracer for POSIX threading primitives.
//!
//! Loaded into an unmodified target via `LD_PRELOAD`, the shim intercepts
//! the pthread mutex, rwlock, condition-variable, and thread-creation
//! entry points, records one event per call — timing, caller identity,
//! result, and a bounded stack snapshot — and appends the stream to a
//! binary trace file. The companion `skeleton-key-decode` binary prints
//! the recorded chronology for post-hoc contention and deadlock analysis.
//!
//! # Usage
//!
//! ```bash
//! LD_PRELOAD=/path/to/libskeleton_key.so ./target_program
//! skeleton-key-decode /tmp/skeleton_key.bin
//! ```
//!
//! Set `SKELETON_KEYOUTPUT` to redirect the trace away from the default
//! `/tmp/skeleton_key.bin`.
//!
//! # Design
//!
//! The trace file is a bare concatenation of varint-encoded records — no
//! header, no footer — flushed record-by-record, so a target killed
//! mid-run still leaves a parsable prefix. Inside the shim the target's
//! correctness and availability always win over trace fidelity: a writer
//! that cannot open its file becomes a no-op, a failed append loses one
//! event, an unresolved symbol degrades one wrapper, and nothing ever
//! panics toward the target.
//!
//! The public modules ([`event`], [`trace`], [`varint`]) are the format
//! surface shared with the decoder. The interposition machinery lives
//! behind the default `preload` feature; format-only consumers disable it
//! so the load-time constructor cannot run (and truncate a trace) inside
//! their process.

pub mod event;
#[cfg(feature = "preload")]
mod lock_util;
#[cfg(feature = "preload")]
mod logger;
#[cfg(feature = "preload")]
mod posix;
#[cfg(feature = "preload")]
mod stack;
#[cfg(feature = "preload")]
mod time;
pub mod trace;
pub mod varint;
