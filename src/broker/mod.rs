//! The broker capability consumed by producers.
//!
//! The core is agnostic to the wire protocol: any client implementing
//! [`BrokerClient`] and [`BrokerChannel`] is interchangeable. Two adapters
//! ship with the crate: [`kafka::KafkaBroker`] over rdkafka and
//! [`memory::InMemoryBroker`] for tests.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub mod kafka;
pub mod memory;

pub use kafka::KafkaBroker;
pub use memory::{InMemoryBroker, RecordingChannel};

/// Broker-level acknowledgment of a delivered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}

/// Opens channels to named broker topics.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn open_channel(&self, topic: &str) -> Result<Arc<dyn BrokerChannel>>;
}

/// A write handle bound to one broker topic.
///
/// Each channel is exclusively owned by the producer it was opened for.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn write(&self, key: Option<&str>, payload: Bytes) -> Result<Ack>;

    async fn close(&self) -> Result<()>;
}
