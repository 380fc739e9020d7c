//! Decoder CLI for skeleton-key trace files.
//!
//! Reads one binary trace produced by the preloaded shim and prints a
//! human-readable chronology: one line per event, timestamps rebased to
//! the first record, followed by the raw stack capture.
//!
//! # Usage
//!
//! ```bash
//! skeleton-key-decode /tmp/skeleton_key.bin
//! ```
//!
//! A truncated final record — the usual shape after the target was killed
//! mid-run — is not an error; the chronology simply stops at the last
//! complete event.

// CLI tools need to print to stdout/stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;

use skeleton_key::event::Event;
use skeleton_key::trace::TraceReader;

/// Prints the chronology recorded in a skeleton-key trace file.
#[derive(Parser, Debug)]
#[command(name = "skeleton-key-decode", version, about)]
struct Args {
    /// Path to the binary trace file.
    trace: PathBuf,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprint!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("skeleton-key-decode: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let buf = fs::read(&args.trace)
        .with_context(|| format!("failed to read {}", args.trace.display()))?;

    let mut reader = TraceReader::new(&buf);
    let mut first_timestamp = None;

    loop {
        match reader.next_event() {
            Ok(Some(event)) => {
                let first = *first_timestamp.get_or_insert(event.timestamp_ns);
                print!("{}", render_event(&event, first));
            }
            // Clean end of stream, or a partial tail record from a target
            // that died mid-append; either way the chronology is complete.
            Ok(None) | Err(_) => break,
        }
    }

    Ok(())
}

/// Renders one event as a chronology entry.
///
/// Zero-valued optional fields (`aux_ptr`, `duration`, `result`) are
/// omitted. Times are seconds with six fractional digits.
fn render_event(event: &Event, first_timestamp: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let secs = event.timestamp_ns.saturating_sub(first_timestamp) as f64 / 1e9;

    let mut out = String::new();
    let _ = write!(
        out,
        "{secs:.6} tid={} {:<20} ptr=0x{:x}",
        event.tid,
        event.kind.name(),
        event.ptr1
    );
    if event.ptr2 != 0 {
        let _ = write!(out, " aux_ptr=0x{:x}", event.ptr2);
    }
    if event.duration_ns != 0 {
        #[allow(clippy::cast_precision_loss)]
        let duration_secs = event.duration_ns as f64 / 1e9;
        let _ = write!(out, " duration={duration_secs:.6}s");
    }
    if event.result != 0 {
        let _ = write!(out, " result={}", event.result);
    }
    out.push('\n');

    out.push_str("Stack trace:\n");
    for addr in &event.stack {
        let _ = writeln!(out, "  0x{addr:x}");
    }
    out.push('\n');

    out
}
