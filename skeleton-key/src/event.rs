//! The trace event model and its wire form.
//!
//! One record is the concatenation, in this order, of: `timestamp`, `tid`,
//! `kind` (one raw byte), `ptr1`, `ptr2`, `result`, `duration_ns`, and the
//! depth-prefixed stack — everything but the kind byte varint-encoded. The
//! trace file is a bare concatenation of records with no header or footer,
//! so any prefix ending on a record boundary is itself a valid trace.

use crate::trace::TraceError;
use crate::varint::{self, Cursor};

/// Upper bound on captured stack frames per event. Deeper stacks are
/// truncated silently.
pub const MAX_STACK_DEPTH: usize = 16;

/// The closed set of observable operations.
///
/// Wire tags are the discriminants; they are part of the format and new
/// kinds may only be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    // Thread events
    ThreadCreate = 0,

    // Mutex events
    MutexInit,
    MutexDestroy,
    MutexLock,
    MutexLockDone,
    MutexTryLock,
    MutexTryLockDone,
    MutexTimedLock,
    MutexTimedLockDone,
    MutexUnlock,

    // RWLock events
    RwLockInit,
    RwLockDestroy,
    RwLockRead,
    RwLockReadDone,
    RwLockTryRead,
    RwLockTryReadDone,
    RwLockTimedRead,
    RwLockTimedReadDone,
    RwLockWrite,
    RwLockWriteDone,
    RwLockTryWrite,
    RwLockTryWriteDone,
    RwLockTimedWrite,
    RwLockTimedWriteDone,
    RwLockUnlock,

    // Condition variable events
    CondInit,
    CondDestroy,
    CondSignal,
    CondBroadcast,
    CondWait,
    CondWaitDone,
    CondTimedWait,
    CondTimedWaitDone,
}

impl EventKind {
    /// Decodes a wire tag. `None` for tags outside the known set.
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::ThreadCreate,
            1 => Self::MutexInit,
            2 => Self::MutexDestroy,
            3 => Self::MutexLock,
            4 => Self::MutexLockDone,
            5 => Self::MutexTryLock,
            6 => Self::MutexTryLockDone,
            7 => Self::MutexTimedLock,
            8 => Self::MutexTimedLockDone,
            9 => Self::MutexUnlock,
            10 => Self::RwLockInit,
            11 => Self::RwLockDestroy,
            12 => Self::RwLockRead,
            13 => Self::RwLockReadDone,
            14 => Self::RwLockTryRead,
            15 => Self::RwLockTryReadDone,
            16 => Self::RwLockTimedRead,
            17 => Self::RwLockTimedReadDone,
            18 => Self::RwLockWrite,
            19 => Self::RwLockWriteDone,
            20 => Self::RwLockTryWrite,
            21 => Self::RwLockTryWriteDone,
            22 => Self::RwLockTimedWrite,
            23 => Self::RwLockTimedWriteDone,
            24 => Self::RwLockUnlock,
            25 => Self::CondInit,
            26 => Self::CondDestroy,
            27 => Self::CondSignal,
            28 => Self::CondBroadcast,
            29 => Self::CondWait,
            30 => Self::CondWaitDone,
            31 => Self::CondTimedWait,
            32 => Self::CondTimedWaitDone,
            _ => return None,
        })
    }

    /// Textual name as printed in decoded chronologies.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ThreadCreate => "ThreadCreate",
            Self::MutexInit => "MutexInit",
            Self::MutexDestroy => "MutexDestroy",
            Self::MutexLock => "MutexLock",
            Self::MutexLockDone => "MutexLockDone",
            Self::MutexTryLock => "MutexTryLock",
            Self::MutexTryLockDone => "MutexTryLockDone",
            Self::MutexTimedLock => "MutexTimedLock",
            Self::MutexTimedLockDone => "MutexTimedLockDone",
            Self::MutexUnlock => "MutexUnlock",
            Self::RwLockInit => "RWLockInit",
            Self::RwLockDestroy => "RWLockDestroy",
            Self::RwLockRead => "RWLockRead",
            Self::RwLockReadDone => "RWLockReadDone",
            Self::RwLockTryRead => "RWLockTryRead",
            Self::RwLockTryReadDone => "RWLockTryReadDone",
            Self::RwLockTimedRead => "RWLockTimedRead",
            Self::RwLockTimedReadDone => "RWLockTimedReadDone",
            Self::RwLockWrite => "RWLockWrite",
            Self::RwLockWriteDone => "RWLockWriteDone",
            Self::RwLockTryWrite => "RWLockTryWrite",
            Self::RwLockTryWriteDone => "RWLockTryWriteDone",
            Self::RwLockTimedWrite => "RWLockTimedWrite",
            Self::RwLockTimedWriteDone => "RWLockTimedWriteDone",
            Self::RwLockUnlock => "RWLockUnlock",
            Self::CondInit => "CondInit",
            Self::CondDestroy => "CondDestroy",
            Self::CondSignal => "CondSignal",
            Self::CondBroadcast => "CondBroadcast",
            Self::CondWait => "CondWait",
            Self::CondWaitDone => "CondWaitDone",
            Self::CondTimedWait => "CondTimedWait",
            Self::CondTimedWaitDone => "CondTimedWaitDone",
        }
    }
}

/// One observed call — the unit of serialization.
///
/// `ptr1` is the primary object (mutex, rwlock, cond, or thread handle),
/// `ptr2` the associated mutex for cond waits and zero otherwise. Pointer
/// fields are widened to 64 bits so traces stay readable across producer
/// word sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp_ns: u64,
    pub tid: u32,
    pub kind: EventKind,
    pub ptr1: u64,
    pub ptr2: u64,
    /// Return value of the underlying call; 0 on the pre-event of blocking
    /// operations.
    pub result: i32,
    /// Elapsed time of a blocking call; 0 on pre-events and non-blocking
    /// operations.
    pub duration_ns: u64,
    /// Return addresses, innermost first, at most [`MAX_STACK_DEPTH`].
    pub stack: Vec<u64>,
}

/// Serializes one record into `buf` from raw field values.
///
/// This is the writer's hot path; it allocates nothing beyond growing the
/// caller's reusable buffer. `result` crosses the wire as its sign-extended
/// two's-complement bit pattern (a negative code costs ten bytes).
#[allow(clippy::too_many_arguments)] // mirrors the wire field order
pub fn write_record(
    buf: &mut Vec<u8>,
    timestamp_ns: u64,
    tid: u32,
    kind: EventKind,
    ptr1: u64,
    ptr2: u64,
    result: i32,
    duration_ns: u64,
    stack: &[u64],
) {
    varint::encode_u64(buf, timestamp_ns);
    varint::encode_u64(buf, u64::from(tid));
    buf.push(kind as u8);
    varint::encode_u64(buf, ptr1);
    varint::encode_u64(buf, ptr2);
    #[allow(clippy::cast_sign_loss)]
    varint::encode_u64(buf, i64::from(result) as u64);
    varint::encode_u64(buf, duration_ns);
    varint::encode_u64(buf, stack.len() as u64);
    for &frame in stack {
        varint::encode_u64(buf, frame);
    }
}

impl Event {
    /// Appends this record's wire form to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        write_record(
            buf,
            self.timestamp_ns,
            self.tid,
            self.kind,
            self.ptr1,
            self.ptr2,
            self.result,
            self.duration_ns,
            &self.stack,
        );
    }

    /// Decodes one record. `Ok(None)` at a clean end of stream; an end of
    /// stream anywhere inside a record is [`TraceError::Truncated`].
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Option<Self>, TraceError> {
        if cur.is_empty() {
            return Ok(None);
        }

        let timestamp_ns = cur.read_u64().ok_or(TraceError::Truncated)?;
        #[allow(clippy::cast_possible_truncation)]
        let tid = cur.read_u64().ok_or(TraceError::Truncated)? as u32;
        let tag = cur.read_u8().ok_or(TraceError::Truncated)?;
        let kind = EventKind::from_u8(tag).ok_or(TraceError::UnknownKind(tag))?;
        let ptr1 = cur.read_u64().ok_or(TraceError::Truncated)?;
        let ptr2 = cur.read_u64().ok_or(TraceError::Truncated)?;
        // Truncating reinterpret recovers the signed code from its
        // sign-extended wire form.
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let result = cur.read_u64().ok_or(TraceError::Truncated)? as i32;
        let duration_ns = cur.read_u64().ok_or(TraceError::Truncated)?;

        let depth = cur.read_u64().ok_or(TraceError::Truncated)?;
        // The depth is untrusted input; do not pre-reserve from it. Each
        // frame costs at least one byte, so a lying prefix hits Truncated
        // long before memory does.
        let mut stack = Vec::new();
        for _ in 0..depth {
            stack.push(cur.read_u64().ok_or(TraceError::Truncated)?);
        }

        Ok(Some(Self {
            timestamp_ns,
            tid,
            kind,
            ptr1,
            ptr2,
            result,
            duration_ns,
            stack,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            timestamp_ns: 1_234_567_890,
            tid: 4242,
            kind: EventKind::MutexLockDone,
            ptr1: 0x7fff_dead_beef,
            ptr2: 0,
            result: 0,
            duration_ns: 1500,
            stack: vec![0x401000, 0x401234, 0x7f00_0000_1000],
        }
    }

    fn round_trip(event: &Event) -> Event {
        let mut buf = Vec::new();
        event.encode_into(&mut buf);
        let mut cur = Cursor::new(&buf);
        let decoded = Event::decode(&mut cur).unwrap().unwrap();
        assert!(cur.is_empty());
        decoded
    }

    #[test]
    fn record_round_trips() {
        let event = sample();
        assert_eq!(round_trip(&event), event);
    }

    #[test]
    fn reencoding_is_byte_identical() {
        let mut first = Vec::new();
        sample().encode_into(&mut first);
        let mut second = Vec::new();
        round_trip(&sample()).encode_into(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn negative_result_survives_reinterpret() {
        for result in [-1, i32::MIN, i32::MAX, libc::ETIMEDOUT, -libc::EBUSY] {
            let mut event = sample();
            event.result = result;
            assert_eq!(round_trip(&event).result, result);
        }
    }

    #[test]
    fn negative_result_costs_ten_bytes() {
        let mut negative = sample();
        negative.result = -1;
        let mut zero = sample();
        zero.result = 0;

        let mut buf_negative = Vec::new();
        negative.encode_into(&mut buf_negative);
        let mut buf_zero = Vec::new();
        zero.encode_into(&mut buf_zero);
        assert_eq!(buf_negative.len(), buf_zero.len() + 9);
    }

    #[test]
    fn empty_stack_is_valid() {
        let mut event = sample();
        event.stack.clear();
        assert_eq!(round_trip(&event), event);
    }

    #[test]
    fn wire_layout_of_a_small_record() {
        let event = Event {
            timestamp_ns: 1,
            tid: 2,
            kind: EventKind::ThreadCreate,
            ptr1: 3,
            ptr2: 0,
            result: 0,
            duration_ns: 0,
            stack: vec![5],
        };
        let mut buf = Vec::new();
        event.encode_into(&mut buf);
        assert_eq!(buf, vec![1, 2, 0, 3, 0, 0, 0, 1, 5]);
    }

    #[test]
    fn every_tag_round_trips_through_from_u8() {
        for tag in 0..=32u8 {
            let kind = EventKind::from_u8(tag).unwrap();
            assert_eq!(kind as u8, tag);
            assert!(!kind.name().is_empty());
        }
        assert_eq!(EventKind::from_u8(33), None);
        assert_eq!(EventKind::from_u8(u8::MAX), None);
    }

    #[test]
    fn unknown_tag_is_reported() {
        let mut buf = Vec::new();
        crate::varint::encode_u64(&mut buf, 1); // timestamp
        crate::varint::encode_u64(&mut buf, 2); // tid
        buf.push(200); // bogus kind
        let mut cur = Cursor::new(&buf);
        assert_eq!(Event::decode(&mut cur), Err(TraceError::UnknownKind(200)));
    }

    #[test]
    fn truncation_inside_a_record_is_reported() {
        let mut buf = Vec::new();
        sample().encode_into(&mut buf);
        for len in 1..buf.len() {
            let mut cur = Cursor::new(&buf[..len]);
            assert_eq!(Event::decode(&mut cur), Err(TraceError::Truncated));
        }
    }

    #[test]
    fn clean_eof_is_none() {
        let mut cur = Cursor::new(&[]);
        assert_eq!(Event::decode(&mut cur), Ok(None));
    }
}
