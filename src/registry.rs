use crate::broker::{BrokerChannel, BrokerClient};
use crate::codec::{JsonCodec, MessageCodec};
use crate::config::FlushConfig;
use crate::descriptor::{ServiceInstanceId, TopicDescriptor};
use crate::key_strategy::PartitionKeyStrategy;
use crate::producer::Producer;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Declaration of one topic a service publishes to: its descriptor plus the
/// partition-key strategy and codec its producer will use.
///
/// Erase the binding into a [`TopicRegistration`] to pass it to
/// [`ProducerRegistry::register`].
pub struct TopicBinding<T> {
    descriptor: TopicDescriptor<T>,
    strategy: Option<Arc<dyn PartitionKeyStrategy<T>>>,
    codec: Arc<dyn MessageCodec<T>>,
}

impl<T: Serialize + Send + 'static> TopicBinding<T> {
    /// Binding with the default JSON codec and no partition key.
    pub fn new(descriptor: TopicDescriptor<T>) -> Self {
        Self {
            descriptor,
            strategy: None,
            codec: Arc::new(JsonCodec),
        }
    }
}

impl<T: Send + 'static> TopicBinding<T> {
    /// Binding with a caller-supplied codec, for record types without a
    /// serde representation.
    pub fn with_codec(
        descriptor: TopicDescriptor<T>,
        codec: impl MessageCodec<T> + 'static,
    ) -> Self {
        Self {
            descriptor,
            strategy: None,
            codec: Arc::new(codec),
        }
    }

    pub fn key_strategy(mut self, strategy: impl PartitionKeyStrategy<T> + 'static) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    pub fn erase(self) -> TopicRegistration {
        let TopicBinding {
            descriptor,
            strategy,
            codec,
        } = self;

        TopicRegistration {
            id: descriptor.id().to_string(),
            type_id: descriptor.record_type(),
            type_name: descriptor.record_type_name(),
            build: Box::new(move |channel: Arc<dyn BrokerChannel>, flush: &FlushConfig| {
                let producer = Arc::new(Producer::new(descriptor, channel, strategy, codec, flush));
                let lifecycle: Arc<dyn ProducerLifecycle> = producer.clone();
                ProducerEntry {
                    type_id: TypeId::of::<T>(),
                    producer,
                    lifecycle,
                }
            }),
        }
    }
}

impl<T: Send + 'static> From<TopicBinding<T>> for TopicRegistration {
    fn from(binding: TopicBinding<T>) -> Self {
        binding.erase()
    }
}

/// Type-erased topic declaration, ready for registration.
pub struct TopicRegistration {
    id: String,
    type_id: TypeId,
    type_name: &'static str,
    build: Box<dyn FnOnce(Arc<dyn BrokerChannel>, &FlushConfig) -> ProducerEntry + Send>,
}

struct ProducerEntry {
    type_id: TypeId,
    producer: Arc<dyn Any + Send + Sync>,
    lifecycle: Arc<dyn ProducerLifecycle>,
}

/// Object-safe view of a producer for type-erased lifecycle handling.
#[async_trait]
trait ProducerLifecycle: Send + Sync {
    async fn shutdown(&self);
}

#[async_trait]
impl<T: Send + 'static> ProducerLifecycle for Producer<T> {
    async fn shutdown(&self) {
        Producer::shutdown(self).await;
    }
}

/// The producers built for one registered service instance.
pub struct ProducerSet {
    instance: ServiceInstanceId,
    producers: HashMap<String, ProducerEntry>,
}

impl ProducerSet {
    fn producer<T: Send + 'static>(
        &self,
        descriptor: &TopicDescriptor<T>,
    ) -> Result<Arc<Producer<T>>> {
        let entry = self
            .producers
            .get(descriptor.id())
            .ok_or_else(|| self.unregistered(descriptor))?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(self.unregistered(descriptor));
        }
        Arc::clone(&entry.producer)
            .downcast::<Producer<T>>()
            .map_err(|_| self.unregistered(descriptor))
    }

    fn unregistered<T: 'static>(&self, descriptor: &TopicDescriptor<T>) -> Error {
        Error::UnregisteredTopic {
            instance: self.instance.to_string(),
            id: descriptor.id().to_string(),
            type_name: descriptor.record_type_name(),
        }
    }
}

/// Cheap handle over a registered service instance's producer set.
#[derive(Clone)]
pub struct Registration {
    set: Arc<ProducerSet>,
}

impl Registration {
    pub fn instance(&self) -> &ServiceInstanceId {
        &self.set.instance
    }

    /// Looks up the producer for `descriptor` within this registration.
    pub fn producer<T: Send + 'static>(
        &self,
        descriptor: &TopicDescriptor<T>,
    ) -> Result<Arc<Producer<T>>> {
        self.set.producer(descriptor)
    }

    /// Drains and closes every producer in this registration.
    pub async fn shutdown(&self) {
        for entry in self.set.producers.values() {
            entry.lifecycle.shutdown().await;
        }
    }
}

/// Process-wide cache of producer sets, one per registered service instance.
///
/// The registry is the sole constructor of producers. Registering the same
/// instance more than once is idempotent and opens no new channels; distinct
/// instances declaring the same topic id get independent producers. Owned by
/// the process bootstrap and passed by reference to whichever component
/// performs registration.
pub struct ProducerRegistry {
    broker: Arc<dyn BrokerClient>,
    flush: FlushConfig,
    instances: Mutex<HashMap<ServiceInstanceId, Arc<Mutex<Option<Arc<ProducerSet>>>>>>,
}

impl ProducerRegistry {
    pub fn new(broker: Arc<dyn BrokerClient>, flush: FlushConfig) -> Self {
        Self {
            broker,
            flush,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `instance` with its declared topics, building one producer
    /// per topic bound to a freshly opened broker channel.
    ///
    /// Concurrent calls for the same instance serialize on a per-instance
    /// lock: exactly one caller constructs, the rest observe its result. On
    /// any channel-open failure the already-opened channels are closed and
    /// the registry state for the instance is unchanged.
    pub async fn register(
        &self,
        instance: ServiceInstanceId,
        topics: impl IntoIterator<Item = TopicRegistration>,
    ) -> Result<Registration> {
        let slot = {
            let mut instances = self.instances.lock().await;
            Arc::clone(instances.entry(instance.clone()).or_default())
        };
        let mut slot = slot.lock().await;

        if let Some(set) = slot.as_ref() {
            debug!(instance = %instance, "Service instance already registered");
            return Ok(Registration {
                set: Arc::clone(set),
            });
        }

        // Exact (id, type) duplicates collapse as a set; one id with two
        // record types is a declaration error.
        let mut declared: Vec<TopicRegistration> = Vec::new();
        for topic in topics {
            if let Some(existing) = declared.iter().find(|t| t.id == topic.id) {
                if existing.type_id == topic.type_id {
                    continue;
                }
                return Err(Error::DuplicateTopic {
                    id: topic.id,
                    first: existing.type_name,
                    second: topic.type_name,
                });
            }
            declared.push(topic);
        }

        // Open every channel before constructing any producer, so a failure
        // leaves nothing behind to tear down but the channels themselves.
        let mut opened: Vec<(TopicRegistration, Arc<dyn BrokerChannel>)> =
            Vec::with_capacity(declared.len());
        for topic in declared {
            match self.broker.open_channel(&topic.id).await {
                Ok(channel) => opened.push((topic, channel)),
                Err(e) => {
                    warn!(
                        instance = %instance,
                        topic = %topic.id,
                        error = %e,
                        "Channel open failed, rolling back registration"
                    );
                    for (_, channel) in opened.into_iter() {
                        if let Err(close_err) = channel.close().await {
                            warn!(error = %close_err, "Failed to close channel during rollback");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut producers = HashMap::with_capacity(opened.len());
        for (topic, channel) in opened {
            let TopicRegistration { id, build, .. } = topic;
            info!(instance = %instance, topic = %id, "Registering producer");
            producers.insert(id, build(channel, &self.flush));
        }

        let set = Arc::new(ProducerSet {
            instance,
            producers,
        });
        *slot = Some(Arc::clone(&set));

        Ok(Registration { set })
    }

    /// Looks up the producer for `(instance, descriptor)`.
    ///
    /// Fails with [`Error::UnregisteredTopic`] if the instance was never
    /// registered, the topic id was not declared at registration time, or
    /// the declared record type differs from `T`. May wait briefly behind an
    /// in-flight registration for the same instance, never behind others.
    pub async fn get<T: Send + 'static>(
        &self,
        instance: &ServiceInstanceId,
        descriptor: &TopicDescriptor<T>,
    ) -> Result<Arc<Producer<T>>> {
        let slot = {
            let instances = self.instances.lock().await;
            instances.get(instance).cloned()
        };

        let unregistered = || Error::UnregisteredTopic {
            instance: instance.to_string(),
            id: descriptor.id().to_string(),
            type_name: descriptor.record_type_name(),
        };

        let slot = slot.ok_or_else(unregistered)?;
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(set) => set.producer(descriptor),
            None => Err(unregistered()),
        }
    }
}
