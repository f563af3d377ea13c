//! Records delivered by the consume path
//!
//! A [`ConsumedRecord`] is one of three things: a data record, an
//! end-of-partition signal, or an engine error for a partition. All three
//! arrive on the same channel so their relative order is preserved.
//!
//! Keys, payloads and header values are raw bytes; a [`Deserializer`]
//! turns them into application types on demand.

use std::fmt;

use bytes::Bytes;
use strand_core::{ErrorCode, RawMessage, Timestamp, TopicPartition};

use crate::config::ClientOptions;
use crate::error::{ClientError, Result};

/// A single delivery from `poll` or `consume`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    /// Empty unless headers are enabled
    pub headers: Vec<(String, Bytes)>,
    pub timestamp: Timestamp,
    /// `NoError` for data records, `PartitionEof` for end-of-partition
    pub error: ErrorCode,
    /// Engine diagnostic for error records
    pub reason: Option<String>,
}

impl ConsumedRecord {
    pub(crate) fn message(message: RawMessage, options: ClientOptions) -> Self {
        Self {
            topic: message.topic,
            partition: message.partition,
            offset: message.offset,
            key: message.key,
            payload: message.payload,
            headers: if options.enable_headers {
                message.headers
            } else {
                Vec::new()
            },
            timestamp: if options.enable_timestamps {
                message.timestamp
            } else {
                Timestamp::NotAvailable
            },
            error: ErrorCode::NoError,
            reason: None,
        }
    }

    pub(crate) fn partition_eof(topic: String, partition: i32, offset: i64) -> Self {
        Self {
            topic,
            partition,
            offset,
            key: None,
            payload: None,
            headers: Vec::new(),
            timestamp: Timestamp::NotAvailable,
            error: ErrorCode::PartitionEof,
            reason: None,
        }
    }

    pub(crate) fn error(topic: String, partition: i32, code: ErrorCode, reason: String) -> Self {
        Self {
            topic,
            partition,
            offset: strand_core::Offset::Invalid.to_raw(),
            key: None,
            payload: None,
            headers: Vec::new(),
            timestamp: Timestamp::NotAvailable,
            error: code,
            reason: Some(reason),
        }
    }

    /// Value of the last header named `name`
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Bytes> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// End-of-partition signal: the consumer caught up to the high-water mark
    #[must_use]
    pub fn is_partition_eof(&self) -> bool {
        self.error == ErrorCode::PartitionEof
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_ok() && !self.is_partition_eof()
    }

    /// Data records only
    #[must_use]
    pub fn is_data(&self) -> bool {
        self.error.is_ok()
    }

    /// Convert an error record into a `ClientError`.
    ///
    /// # Errors
    /// The record's engine error, if it carries one.
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            let reason = self.reason.clone().unwrap_or_else(|| "consume".to_string());
            return Err(ClientError::engine(self.error, reason));
        }
        Ok(self)
    }

    /// Decode the key.
    ///
    /// # Errors
    /// Whatever the deserializer reports.
    pub fn key_as<D: Deserializer>(&self, deserializer: &D) -> Result<Option<D::Output>> {
        self.key
            .as_deref()
            .map(|k| deserializer.deserialize(&self.topic, k))
            .transpose()
    }

    /// Decode the payload.
    ///
    /// # Errors
    /// Whatever the deserializer reports.
    pub fn payload_as<D: Deserializer>(&self, deserializer: &D) -> Result<Option<D::Output>> {
        self.payload
            .as_deref()
            .map(|p| deserializer.deserialize(&self.topic, p))
            .transpose()
    }
}

impl fmt::Display for ConsumedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_partition_eof() {
            write!(f, "{} [{}] EOF at {}", self.topic, self.partition, self.offset)
        } else if self.is_error() {
            write!(
                f,
                "{} [{}] {}: {}",
                self.topic,
                self.partition,
                self.error,
                self.reason.as_deref().unwrap_or_default()
            )
        } else {
            write!(
                f,
                "{} [{}] @{} ({} bytes)",
                self.topic,
                self.partition,
                self.offset,
                self.payload.as_ref().map_or(0, Bytes::len)
            )
        }
    }
}

/// Converts raw key or payload bytes into an application type
pub trait Deserializer {
    type Output;

    /// # Errors
    /// `ClientError::Deserialize` when `data` is not a valid encoding.
    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<Self::Output>;
}

/// UTF-8 text
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Deserializer;

impl Deserializer for Utf8Deserializer {
    type Output = String;

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<String> {
        std::str::from_utf8(data)
            .map(str::to_string)
            .map_err(|e| ClientError::Deserialize(format!("{topic}: {e}")))
    }
}

/// Raw bytes, copied out
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDeserializer;

impl Deserializer for BytesDeserializer {
    type Output = Vec<u8>;

    fn deserialize(&self, _topic: &str, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// JSON documents via serde
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer<T>(std::marker::PhantomData<fn() -> T>);

impl<T> JsonDeserializer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl<T: serde::de::DeserializeOwned> Deserializer for JsonDeserializer<T> {
    type Output = T;

    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| ClientError::Deserialize(format!("{topic}: {e}")))
    }
}
