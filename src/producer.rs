use crate::broker::{Ack, BrokerChannel};
use crate::codec::MessageCodec;
use crate::config::FlushConfig;
use crate::descriptor::TopicDescriptor;
use crate::key_strategy::PartitionKeyStrategy;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Resolution of an `enqueue` call: the record has been accepted into the
/// producer's buffer, not yet delivered to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted;

/// Report for a buffered record the flush task gave up on.
#[derive(Debug)]
pub struct FlushFailure {
    pub topic: String,
    pub key: Option<String>,
    pub error: Error,
}

/// Per-topic publication endpoint, bound to one exclusively owned broker
/// channel.
///
/// `send`/`publish` deliver synchronously and complete on broker
/// acknowledgment; `enqueue` resolves on buffer acceptance and leaves
/// delivery to a background flush task that preserves insertion order and
/// retries transient broker failures. Producers are constructed only by the
/// [`ProducerRegistry`](crate::registry::ProducerRegistry).
pub struct Producer<T> {
    descriptor: TopicDescriptor<T>,
    channel: Arc<dyn BrokerChannel>,
    strategy: Option<Arc<dyn PartitionKeyStrategy<T>>>,
    codec: Arc<dyn MessageCodec<T>>,
    buffer: mpsc::Sender<(Option<String>, T)>,
    shutdown: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    failures: Mutex<Option<mpsc::UnboundedReceiver<FlushFailure>>>,
}

impl<T: Send + 'static> Producer<T> {
    pub(crate) fn new(
        descriptor: TopicDescriptor<T>,
        channel: Arc<dyn BrokerChannel>,
        strategy: Option<Arc<dyn PartitionKeyStrategy<T>>>,
        codec: Arc<dyn MessageCodec<T>>,
        flush: &FlushConfig,
    ) -> Self {
        let (buffer_tx, buffer_rx) = mpsc::channel(flush.max_buffer_size);
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = FlushTask {
            topic: descriptor.id().to_string(),
            channel: Arc::clone(&channel),
            codec: Arc::clone(&codec),
            failures: failure_tx,
            config: flush.clone(),
        };
        let handle = tokio::spawn(task.run(buffer_rx, shutdown_rx));

        Self {
            descriptor,
            channel,
            strategy,
            codec,
            buffer: buffer_tx,
            shutdown: shutdown_tx,
            flush_task: Mutex::new(Some(handle)),
            failures: Mutex::new(Some(failure_rx)),
        }
    }

    pub fn descriptor(&self) -> &TopicDescriptor<T> {
        &self.descriptor
    }

    /// Delivers `record` synchronously: derives the partition key, encodes
    /// the record and completes on broker acknowledgment.
    ///
    /// No internal retry is performed; a failed call leaves the producer
    /// fully able to serve subsequent calls.
    pub async fn send(&self, record: &T) -> Result<Ack> {
        let key = self.derive_key(record)?;
        let payload = self.codec.encode(record)?;

        debug!(
            topic = %self.descriptor.id(),
            key = ?key,
            bytes = payload.len(),
            "Sending record"
        );

        self.channel.write(key.as_deref(), payload).await
    }

    /// Alias for [`send`](Self::send).
    pub async fn publish(&self, record: &T) -> Result<Ack> {
        self.send(record).await
    }

    /// Appends `record` to the producer's buffer and resolves once it has
    /// been accepted, leaving delivery to the background flush task.
    ///
    /// The key is derived here, so a strategy failure fails this call with
    /// no channel interaction. Records sharing a key reach the broker in
    /// enqueue order.
    pub async fn enqueue(&self, record: T) -> Result<Accepted> {
        let key = self.derive_key(&record)?;

        if *self.shutdown.borrow() {
            return Err(self.shut_down_error());
        }
        self.buffer
            .send((key, record))
            .await
            .map_err(|_| self.shut_down_error())?;

        Ok(Accepted)
    }

    /// Hands out the receiver for flush failure reports.
    ///
    /// The first caller gets the receiver; subsequent calls return `None`.
    pub async fn failure_reports(&self) -> Option<mpsc::UnboundedReceiver<FlushFailure>> {
        self.failures.lock().await.take()
    }

    /// Stops the flush task, drains the buffer within the configured grace
    /// period and closes the broker channel. Records still undelivered when
    /// the grace period expires are reported as [`Error::BrokerUnavailable`]
    /// failures. Subsequent `enqueue` calls fail.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let mut flush_task = self.flush_task.lock().await;
        if let Some(handle) = flush_task.take() {
            info!(topic = %self.descriptor.id(), "Shutting down producer");
            if let Err(e) = handle.await {
                warn!(topic = %self.descriptor.id(), error = %e, "Flush task failed to join");
            }
        }
    }

    fn derive_key(&self, record: &T) -> Result<Option<String>> {
        match &self.strategy {
            Some(strategy) => strategy.partition_key(record).map_err(|e| match e {
                Error::PartitionKey(_) => e,
                other => Error::PartitionKey(other.to_string()),
            }),
            None => Ok(None),
        }
    }

    fn shut_down_error(&self) -> Error {
        Error::BrokerUnavailable(format!(
            "producer for topic '{}' is shut down",
            self.descriptor.id()
        ))
    }
}

struct FlushTask<T> {
    topic: String,
    channel: Arc<dyn BrokerChannel>,
    codec: Arc<dyn MessageCodec<T>>,
    failures: mpsc::UnboundedSender<FlushFailure>,
    config: FlushConfig,
}

impl<T: Send + 'static> FlushTask<T> {
    async fn run(
        self,
        mut buffer: mpsc::Receiver<(Option<String>, T)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut batch = Vec::with_capacity(self.config.batch_size);
        loop {
            // A retry may have consumed the shutdown notification already.
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                n = buffer.recv_many(&mut batch, self.config.batch_size) => {
                    if n == 0 {
                        break;
                    }
                    self.flush_batch(&mut batch, &mut shutdown).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        self.drain(buffer, batch).await;

        if let Err(e) = self.channel.close().await {
            warn!(topic = %self.topic, error = %e, "Failed to close broker channel");
        }
    }

    async fn flush_batch(
        &self,
        batch: &mut Vec<(Option<String>, T)>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        for (key, record) in batch.drain(..) {
            let payload = match self.codec.encode(&record) {
                Ok(payload) => payload,
                Err(e) => {
                    self.report(key, e);
                    continue;
                }
            };
            if let Err(e) = self.write_with_retry(key.as_deref(), payload, shutdown).await {
                self.report(key, e);
            }
        }
    }

    /// Retries `BrokerUnavailable` with capped exponential backoff until the
    /// write succeeds, a permanent error occurs, or shutdown is requested.
    async fn write_with_retry(
        &self,
        key: Option<&str>,
        payload: Bytes,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Ack> {
        let mut backoff = Duration::from_millis(self.config.retry_initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.retry_max_backoff_ms);

        loop {
            match self.channel.write(key, payload.clone()).await {
                Ok(ack) => return Ok(ack),
                Err(Error::BrokerUnavailable(reason)) => {
                    if *shutdown.borrow() {
                        return Err(Error::BrokerUnavailable(reason));
                    }
                    warn!(
                        topic = %self.topic,
                        error = %reason,
                        backoff_ms = backoff.as_millis() as u64,
                        "Broker unavailable, retrying flush"
                    );
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                // All producer handles dropped; stop retrying.
                                return Err(Error::BrokerUnavailable(reason));
                            }
                        }
                    }
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Final drain after shutdown or after the last sender is dropped,
    /// bounded by the configured grace period.
    async fn drain(
        &self,
        mut buffer: mpsc::Receiver<(Option<String>, T)>,
        mut pending: Vec<(Option<String>, T)>,
    ) {
        buffer.close();
        while let Some(item) = buffer.recv().await {
            pending.push(item);
        }
        if pending.is_empty() {
            return;
        }

        info!(
            topic = %self.topic,
            pending = pending.len(),
            "Draining buffered records before close"
        );

        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_grace_ms);
        for (key, record) in pending {
            let payload = match self.codec.encode(&record) {
                Ok(payload) => payload,
                Err(e) => {
                    self.report(key, e);
                    continue;
                }
            };
            if let Err(e) = self.drain_write(key.as_deref(), payload, deadline).await {
                self.report(key, e);
            }
        }
    }

    async fn drain_write(
        &self,
        key: Option<&str>,
        payload: Bytes,
        deadline: Instant,
    ) -> Result<Ack> {
        let mut backoff = Duration::from_millis(self.config.retry_initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.retry_max_backoff_ms);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.grace_expired_error());
            }
            match timeout(remaining, self.channel.write(key, payload.clone())).await {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(Error::BrokerUnavailable(_))) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(self.grace_expired_error());
                    }
                    sleep(backoff.min(remaining)).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Ok(Err(other)) => return Err(other),
                Err(_) => return Err(self.grace_expired_error()),
            }
        }
    }

    fn grace_expired_error(&self) -> Error {
        Error::BrokerUnavailable(format!(
            "shutdown grace period expired before delivery to topic '{}'",
            self.topic
        ))
    }

    fn report(&self, key: Option<String>, error: Error) {
        warn!(
            topic = %self.topic,
            key = ?key,
            error = %error,
            "Giving up on buffered record"
        );
        let _ = self.failures.send(FlushFailure {
            topic: self.topic.clone(),
            key,
            error,
        });
    }
}
