//! Boundary to the native protocol engine.
//!
//! The engine is a black box reachable only through opaque [`RawHandle`]s.
//! It is non-reentrant per handle: callers serialize all operations on one
//! handle, and nothing here calls back into the client.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::partition::{Timestamp, TopicPartitionOffset};

/// Size of the diagnostic buffer handed to `conf_set` / `consumer_new`.
pub const ERRSTR_SIZE: usize = 512;

/// Opaque, pointer-sized engine handle. Zero is the null sentinel.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawHandle(usize);

impl RawHandle {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn from_usize(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Which family of configuration object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfKind {
    /// Client-level configuration
    Global,
    /// Topic-level configuration
    Topic,
}

impl fmt::Display for ConfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "client"),
            Self::Topic => write!(f, "topic"),
        }
    }
}

/// Result code of configuration calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfRes {
    Ok,
    Invalid,
    Unknown,
    /// Anything outside the modelled set
    Other(i32),
}

impl ConfRes {
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            -1 => Self::Invalid,
            -2 => Self::Unknown,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Invalid => -1,
            Self::Unknown => -2,
            Self::Other(code) => code,
        }
    }
}

/// Bounded, NUL-terminated diagnostic buffer filled by the engine.
#[derive(Debug, Clone)]
pub struct ErrBuf {
    buf: Vec<u8>,
}

impl ErrBuf {
    /// A zero capacity is bumped to one byte for the terminator.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Write `msg`, truncating on a character boundary so the terminator fits.
    pub fn write(&mut self, msg: &str) {
        let mut end = msg.len().min(self.buf.len() - 1);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[..end].copy_from_slice(&msg.as_bytes()[..end]);
        self.buf[end] = 0;
    }

    /// Text up to the first NUL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let end = self.buf.iter().position(|&b| b == 0).unwrap_or(self.buf.len());
        std::str::from_utf8(&self.buf[..end]).unwrap_or_default()
    }
}

impl Default for ErrBuf {
    fn default() -> Self {
        Self::with_capacity(ERRSTR_SIZE)
    }
}

/// Engine-level error codes surfaced on records and consumer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    #[default]
    NoError,
    PartitionEof,
    UnknownTopicOrPartition,
    OffsetOutOfRange,
    InvalidArgument,
    InvalidState,
    TimedOut,
    Destroyed,
    Unknown(i32),
}

impl ErrorCode {
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::NoError
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "Success"),
            Self::PartitionEof => write!(f, "Broker: No more messages"),
            Self::UnknownTopicOrPartition => write!(f, "Broker: Unknown topic or partition"),
            Self::OffsetOutOfRange => write!(f, "Broker: Offset out of range"),
            Self::InvalidArgument => write!(f, "Local: Invalid argument or configuration"),
            Self::InvalidState => write!(f, "Local: Erroneous state"),
            Self::TimedOut => write!(f, "Local: Timed out"),
            Self::Destroyed => write!(f, "Local: Broker handle destroyed"),
            Self::Unknown(code) => write!(f, "Unknown error code {code}"),
        }
    }
}

/// A fetched record as the engine hands it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    /// Name and value pairs in produce order; names may repeat
    pub headers: Vec<(String, Bytes)>,
    pub timestamp: Timestamp,
}

/// Group membership change delivered in-band on the poll channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    Assign(Vec<TopicPartitionOffset>),
    Revoke(Vec<TopicPartitionOffset>),
}

/// Everything a single poll of the engine can yield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Message(RawMessage),
    PartitionEof {
        topic: String,
        partition: i32,
        offset: i64,
    },
    Rebalance(RebalanceEvent),
    /// A fetch failure on one partition
    Error {
        topic: String,
        partition: i32,
        code: ErrorCode,
        reason: String,
    },
}

/// Configuration object operations.
pub trait ConfEngine: Send + Sync {
    /// Allocate a configuration object populated with defaults. Null on failure.
    fn conf_new(&self, kind: ConfKind) -> RawHandle;

    fn conf_destroy(&self, kind: ConfKind, conf: RawHandle);

    /// Independent deep copy. Null on failure.
    fn conf_dup(&self, kind: ConfKind, conf: RawHandle) -> RawHandle;

    fn conf_set(
        &self,
        kind: ConfKind,
        conf: RawHandle,
        name: &str,
        value: &str,
        errstr: &mut ErrBuf,
    ) -> ConfRes;

    /// Two-phase lookup. With `dest == None` only `dest_size` is written
    /// (value length plus terminator); otherwise the value is copied into
    /// `dest` when it fits.
    fn conf_get(
        &self,
        kind: ConfKind,
        conf: RawHandle,
        name: &str,
        dest: Option<&mut [u8]>,
        dest_size: &mut usize,
    ) -> ConfRes;

    /// Flatten into an engine-owned `[k0, v0, k1, v1, ...]` array. The
    /// returned handle must be released with [`ConfEngine::conf_dump_free`].
    fn conf_dump(&self, kind: ConfKind, conf: RawHandle, cnt: &mut usize) -> RawHandle;

    fn conf_dump_entry(&self, arr: RawHandle, idx: usize) -> Option<String>;

    fn conf_dump_free(&self, arr: RawHandle, cnt: usize);

    /// Hand `tconf` over to `conf` as the default topic configuration.
    /// Ownership of `tconf` moves to the engine.
    fn conf_set_default_topic_conf(&self, conf: RawHandle, tconf: RawHandle);
}

/// Consumer instance operations.
pub trait ConsumerEngine: Send + Sync {
    /// Create a consumer. Takes ownership of `conf` only on success.
    fn consumer_new(&self, conf: RawHandle, errstr: &mut ErrBuf) -> RawHandle;

    fn consumer_destroy(&self, rk: RawHandle);

    fn consumer_name(&self, rk: RawHandle) -> Option<String>;

    fn subscribe(&self, rk: RawHandle, topics: &[String]) -> ErrorCode;

    fn unsubscribe(&self, rk: RawHandle) -> ErrorCode;

    /// Replace the fetch set. `None` clears it.
    fn assign(&self, rk: RawHandle, partitions: Option<&[TopicPartitionOffset]>) -> ErrorCode;

    /// Wait up to `timeout` for the next event.
    fn consumer_poll(&self, rk: RawHandle, timeout: Duration) -> Option<EngineEvent>;

    fn commit(&self, rk: RawHandle, offsets: &[TopicPartitionOffset]) -> ErrorCode;

    /// Fill in committed offsets for `partitions` in place.
    fn committed(
        &self,
        rk: RawHandle,
        partitions: &mut [TopicPartitionOffset],
        timeout: Duration,
    ) -> ErrorCode;

    fn query_watermarks(
        &self,
        rk: RawHandle,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<(i64, i64), ErrorCode>;

    /// Leave the group and stop fetching; the handle stays allocated.
    fn consumer_close(&self, rk: RawHandle) -> ErrorCode;
}

/// A complete native engine.
pub trait Engine: ConfEngine + ConsumerEngine {}

impl<T: ConfEngine + ConsumerEngine> Engine for T {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_errbuf_truncates_with_terminator() {
        let mut buf = ErrBuf::with_capacity(8);
        buf.write("0123456789");
        assert_eq!(buf.as_str(), "0123456");
    }

    #[test]
    fn test_errbuf_respects_char_boundary() {
        let mut buf = ErrBuf::with_capacity(4);
        buf.write("aéé");
        assert_eq!(buf.as_str(), "aé");
    }

    #[test]
    fn test_errbuf_zero_capacity_holds_terminator() {
        let mut buf = ErrBuf::with_capacity(0);
        assert_eq!(buf.capacity(), 1);
        buf.write("dropped");
        assert_eq!(buf.as_str(), "");
    }

    #[test]
    fn test_errbuf_default_capacity() {
        assert_eq!(ErrBuf::default().capacity(), ERRSTR_SIZE);
        assert_eq!(ErrBuf::default().as_str(), "");
    }

    #[test]
    fn test_conf_res_codes() {
        assert_eq!(ConfRes::from_code(0), ConfRes::Ok);
        assert_eq!(ConfRes::from_code(-1), ConfRes::Invalid);
        assert_eq!(ConfRes::from_code(-2), ConfRes::Unknown);
        assert_eq!(ConfRes::from_code(-9), ConfRes::Other(-9));
        assert_eq!(ConfRes::Other(-9).code(), -9);
    }

    #[test]
    fn test_raw_handle_null() {
        assert!(RawHandle::NULL.is_null());
        assert!(!RawHandle::from_usize(3).is_null());
    }
}
