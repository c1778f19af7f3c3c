use crate::broker::{Ack, BrokerChannel, BrokerClient};
use crate::config::KafkaConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as RdProducer};
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// rdkafka-backed broker client.
///
/// Each opened channel owns its own `FutureProducer` configured from the
/// supplied [`KafkaConfig`].
pub struct KafkaBroker {
    config: KafkaConfig,
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn open_channel(&self, topic: &str) -> Result<Arc<dyn BrokerChannel>> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", self.config.brokers.join(","))
            .set("compression.type", &self.config.compression)
            .set("acks", &self.config.acks)
            .set("linger.ms", self.config.linger_ms.to_string())
            .set("batch.size", self.config.batch_size.to_string())
            .set("buffer.memory", self.config.buffer_memory.to_string())
            .create()
            .map_err(Error::Kafka)?;

        info!("Opened Kafka channel for topic '{}'", topic);

        Ok(Arc::new(KafkaChannel {
            topic: topic.to_string(),
            producer,
        }))
    }
}

struct KafkaChannel {
    topic: String,
    producer: FutureProducer,
}

#[async_trait]
impl BrokerChannel for KafkaChannel {
    async fn write(&self, key: Option<&str>, payload: Bytes) -> Result<Ack> {
        let record = FutureRecord {
            topic: &self.topic,
            partition: None,
            payload: Some(payload.as_ref()),
            key: key.map(|k| k.as_bytes()),
            timestamp: None,
            headers: None,
        };

        let (partition, offset) = self
            .producer
            .send(record, rdkafka::util::Timeout::Never)
            .await
            .map_err(|(e, _)| Error::BrokerUnavailable(e.to_string()))?;

        debug!(
            topic = %self.topic,
            partition,
            offset,
            "Record delivered"
        );

        Ok(Ack { partition, offset })
    }

    async fn close(&self) -> Result<()> {
        debug!(topic = %self.topic, "Closing Kafka channel");
        RdProducer::flush(&self.producer, Duration::from_secs(5)).map_err(Error::Kafka)?;
        Ok(())
    }
}
