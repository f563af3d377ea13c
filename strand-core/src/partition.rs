//! Topic/partition identities and logical offsets.

use std::fmt;

/// Partition id meaning "not assigned to any partition".
pub const PARTITION_UA: i32 = -1;

const OFFSET_BEGINNING: i64 = -2;
const OFFSET_END: i64 = -1;
const OFFSET_STORED: i64 = -1000;
const OFFSET_INVALID: i64 = -1001;

/// A position within a partition, either concrete or one of the engine's
/// logical sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Offset {
    /// Oldest retained record (low watermark)
    Beginning,
    /// Next record to be produced (high watermark)
    End,
    /// Last committed offset for the consumer group
    Stored,
    /// No position; the engine resolves it through the committed offset,
    /// falling back to `auto.offset.reset`
    #[default]
    Invalid,
    /// Concrete partition-local offset
    Offset(i64),
}

impl Offset {
    /// Decode a raw engine offset.
    #[must_use]
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            OFFSET_BEGINNING => Self::Beginning,
            OFFSET_END => Self::End,
            OFFSET_STORED => Self::Stored,
            n if n >= 0 => Self::Offset(n),
            _ => Self::Invalid,
        }
    }

    /// Encode for the engine boundary.
    #[must_use]
    pub fn to_raw(self) -> i64 {
        match self {
            Self::Beginning => OFFSET_BEGINNING,
            Self::End => OFFSET_END,
            Self::Stored => OFFSET_STORED,
            Self::Invalid => OFFSET_INVALID,
            Self::Offset(n) => n,
        }
    }

    /// Concrete offset value, if this is not a sentinel.
    #[must_use]
    pub fn value(self) -> Option<i64> {
        match self {
            Self::Offset(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginning => write!(f, "BEGINNING"),
            Self::End => write!(f, "END"),
            Self::Stored => write!(f, "STORED"),
            Self::Invalid => write!(f, "INVALID"),
            Self::Offset(n) => write!(f, "{n}"),
        }
    }
}

/// Identity of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    #[must_use]
    pub fn with_offset(self, offset: Offset) -> TopicPartitionOffset {
        TopicPartitionOffset {
            topic: self.topic,
            partition: self.partition,
            offset,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.topic, self.partition)
    }
}

/// A partition plus the consumer's position in it. Identity is
/// `(topic, partition)`; the offset is mutable per-assignment state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: Offset,
}

impl TopicPartitionOffset {
    pub fn new(topic: impl Into<String>, partition: i32, offset: Offset) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// True when `other` names the same partition, regardless of offset.
    #[must_use]
    pub fn same_partition(&self, other: &TopicPartition) -> bool {
        self.topic == other.topic && self.partition == other.partition
    }
}

impl fmt::Display for TopicPartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] @{}", self.topic, self.partition, self.offset)
    }
}

/// Record timestamp as reported by the engine, in milliseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timestamp {
    #[default]
    NotAvailable,
    CreateTime(i64),
    LogAppendTime(i64),
}

impl Timestamp {
    #[must_use]
    pub fn millis(self) -> Option<i64> {
        match self {
            Self::NotAvailable => None,
            Self::CreateTime(ms) | Self::LogAppendTime(ms) => Some(ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_sentinels_round_trip() {
        for offset in [Offset::Beginning, Offset::End, Offset::Stored, Offset::Invalid] {
            assert_eq!(Offset::from_raw(offset.to_raw()), offset);
        }
        assert_eq!(Offset::from_raw(100), Offset::Offset(100));
        assert_eq!(Offset::from_raw(-7), Offset::Invalid);
    }

    #[test]
    fn test_offset_value() {
        assert_eq!(Offset::Offset(5).value(), Some(5));
        assert_eq!(Offset::End.value(), None);
    }

    #[test]
    fn test_identity_ignores_offset() {
        let tpo = TopicPartitionOffset::new("orders", 3, Offset::Offset(42));
        assert!(tpo.same_partition(&TopicPartition::new("orders", 3)));
        assert!(!tpo.same_partition(&TopicPartition::new("orders", 4)));
        assert_eq!(tpo.topic_partition(), TopicPartition::new("orders", 3));
    }

    #[test]
    fn test_display() {
        let tpo = TopicPartition::new("t", 0).with_offset(Offset::Beginning);
        assert_eq!(tpo.to_string(), "t [0] @BEGINNING");
    }
}
