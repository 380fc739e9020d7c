//! Trace stream decoding.
//!
//! A trace file is a bare concatenation of records, so decoding is a loop
//! of [`Event::decode`] until the bytes run out. A stream that ends inside
//! a record — the usual shape after the target was killed mid-append — is
//! reported as [`TraceError::Truncated`]; every record before it has
//! already been yielded.

use std::error::Error;
use std::fmt;

use crate::event::Event;
use crate::varint::Cursor;

/// Errors surfaced while decoding a trace stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    /// The stream ended in the middle of a record.
    Truncated,
    /// A record carried a kind tag outside the known set.
    UnknownKind(u8),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "trace ends mid-record"),
            Self::UnknownKind(tag) => write!(f, "unknown event kind tag {tag}"),
        }
    }
}

impl Error for TraceError {}

/// Streams events out of an in-memory trace image.
pub struct TraceReader<'a> {
    cur: Cursor<'a>,
}

impl<'a> TraceReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            cur: Cursor::new(buf),
        }
    }

    /// Decodes the next record. `Ok(None)` at a clean end of stream.
    pub fn next_event(&mut self) -> Result<Option<Event>, TraceError> {
        Event::decode(&mut self.cur)
    }
}

impl Iterator for TraceReader<'_> {
    type Item = Result<Event, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn event(tid: u32, kind: EventKind, ptr1: u64) -> Event {
        Event {
            timestamp_ns: 1000 + u64::from(tid),
            tid,
            kind,
            ptr1,
            ptr2: 0,
            result: 0,
            duration_ns: 0,
            stack: vec![0xabc, 0xdef],
        }
    }

    fn encode_all(events: &[Event]) -> Vec<u8> {
        let mut buf = Vec::new();
        for e in events {
            e.encode_into(&mut buf);
        }
        buf
    }

    #[test]
    fn multi_record_stream_decodes_in_order() {
        let events = vec![
            event(1, EventKind::MutexInit, 0x10),
            event(1, EventKind::MutexLock, 0x10),
            event(1, EventKind::MutexLockDone, 0x10),
        ];
        let buf = encode_all(&events);
        let decoded: Vec<Event> = TraceReader::new(&buf).map(Result::unwrap).collect();
        assert_eq!(decoded, events);
    }

    #[test]
    fn empty_stream_is_a_valid_trace() {
        assert_eq!(TraceReader::new(&[]).next_event(), Ok(None));
    }

    #[test]
    fn every_prefix_decodes_to_a_prefix() {
        let events = vec![
            event(1, EventKind::CondWait, 0x20),
            event(2, EventKind::CondSignal, 0x20),
            event(1, EventKind::CondWaitDone, 0x20),
        ];
        let buf = encode_all(&events);

        for n in 0..=buf.len() {
            let mut reader = TraceReader::new(&buf[..n]);
            let mut decoded = Vec::new();
            loop {
                match reader.next_event() {
                    Ok(Some(e)) => decoded.push(e),
                    Ok(None) | Err(TraceError::Truncated) => break,
                    Err(err) => panic!("unexpected decode error at prefix {n}: {err}"),
                }
            }
            assert!(decoded.len() <= events.len());
            assert_eq!(decoded.as_slice(), &events[..decoded.len()]);
        }
    }

    #[test]
    fn truncated_tail_preserves_leading_records() {
        let events = vec![
            event(1, EventKind::RwLockWrite, 0x30),
            event(1, EventKind::RwLockWriteDone, 0x30),
        ];
        let mut buf = encode_all(&events);
        buf.truncate(buf.len() - 3);

        let mut reader = TraceReader::new(&buf);
        assert_eq!(reader.next_event(), Ok(Some(events[0].clone())));
        assert_eq!(reader.next_event(), Err(TraceError::Truncated));
    }
}
