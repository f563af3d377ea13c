#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod conf;
mod engine;
mod error;
mod handle;
mod partition;

pub use conf::{CALLBACK_SUFFIX, ConfigDump, ConfigStore};
pub use engine::{
    ConfEngine, ConfKind, ConfRes, ConsumerEngine, ERRSTR_SIZE, Engine, EngineEvent, ErrBuf,
    ErrorCode, RawHandle, RawMessage, RebalanceEvent,
};
pub use error::{Result, StrandError};
pub use handle::{NativeHandle, ResourceKind};
pub use partition::{Offset, PARTITION_UA, Timestamp, TopicPartition, TopicPartitionOffset};
