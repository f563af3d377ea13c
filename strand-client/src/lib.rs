#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
mod consumer;
mod context;
mod error;
pub mod offset;
pub mod record;
mod stream;

pub use config::{AssignmentStrategy, AutoOffsetReset, ClientConfig, ClientOptions, ConfigValue};
pub use consumer::{Consumer, ConsumerState};
pub use context::{ConsumerContext, DefaultContext, Rebalance, StoredOffsetContext};
pub use error::{ClientError, Result};
pub use offset::{LockFileOffsetStore, MemoryOffsetStore, OffsetStore};
pub use record::{
    BytesDeserializer, ConsumedRecord, Deserializer, JsonDeserializer, Utf8Deserializer,
};
pub use stream::{ConsumerStream, StreamConfig};
