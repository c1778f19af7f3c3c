pub mod broker;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod key_strategy;
pub mod producer;
pub mod registry;

pub use broker::{Ack, BrokerChannel, BrokerClient};
pub use codec::{JsonCodec, MessageCodec};
pub use config::{FlushConfig, KafkaConfig, RegistryConfig};
pub use descriptor::{ServiceInstanceId, TopicDescriptor};
pub use error::{Error, Result};
pub use key_strategy::{HashKey, JsonKeyStrategy, PartitionKeyStrategy};
pub use producer::{Accepted, FlushFailure, Producer};
pub use registry::{ProducerRegistry, Registration, TopicBinding, TopicRegistration};
