use crate::broker::{Ack, BrokerChannel, BrokerClient};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory broker that records every write, for tests.
///
/// Every `open_channel` call produces a fresh independent channel; the
/// broker counts opens and can simulate open and write failures.
pub struct InMemoryBroker {
    channels: Mutex<Vec<Arc<RecordingChannel>>>,
    open_count: AtomicUsize,
    open_limit: AtomicUsize,
    fail_writes: Arc<AtomicBool>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            open_count: AtomicUsize::new(0),
            open_limit: AtomicUsize::new(usize::MAX),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of channels opened so far.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Makes subsequent `open_channel` calls fail while `fail` is set.
    pub fn fail_opens(&self, fail: bool) {
        let limit = if fail { 0 } else { usize::MAX };
        self.open_limit.store(limit, Ordering::SeqCst);
    }

    /// Lets the next `n` opens succeed and fails the ones after.
    pub fn fail_opens_after(&self, n: usize) {
        let limit = self.open_count.load(Ordering::SeqCst) + n;
        self.open_limit.store(limit, Ordering::SeqCst);
    }

    /// Makes writes on all channels fail while `fail` is set.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn channels(&self) -> Vec<Arc<RecordingChannel>> {
        self.channels.lock().await.clone()
    }

    /// The first channel opened for `topic`, if any.
    pub async fn channel_for(&self, topic: &str) -> Option<Arc<RecordingChannel>> {
        self.channels
            .lock()
            .await
            .iter()
            .find(|c| c.topic == topic)
            .cloned()
    }

    /// All channels opened for `topic`, in open order.
    pub async fn channels_for(&self, topic: &str) -> Vec<Arc<RecordingChannel>> {
        self.channels
            .lock()
            .await
            .iter()
            .filter(|c| c.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn open_channel(&self, topic: &str) -> Result<Arc<dyn BrokerChannel>> {
        if self.open_count.load(Ordering::SeqCst) >= self.open_limit.load(Ordering::SeqCst) {
            return Err(Error::BrokerUnavailable(format!(
                "simulated open failure for topic '{}'",
                topic
            )));
        }

        let channel = Arc::new(RecordingChannel {
            topic: topic.to_string(),
            writes: Mutex::new(Vec::new()),
            fail_writes: Arc::clone(&self.fail_writes),
            closed: AtomicBool::new(false),
        });

        self.channels.lock().await.push(Arc::clone(&channel));
        self.open_count.fetch_add(1, Ordering::SeqCst);

        Ok(channel)
    }
}

/// A channel handed out by [`InMemoryBroker`], recording `(key, payload)`
/// pairs in write order.
pub struct RecordingChannel {
    topic: String,
    writes: Mutex<Vec<(Option<String>, Bytes)>>,
    fail_writes: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl RecordingChannel {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn writes(&self) -> Vec<(Option<String>, Bytes)> {
        self.writes.lock().await.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.writes.lock().await.len()
    }
}

#[async_trait]
impl BrokerChannel for RecordingChannel {
    async fn write(&self, key: Option<&str>, payload: Bytes) -> Result<Ack> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::BrokerUnavailable(format!(
                "channel for topic '{}' is closed",
                self.topic
            )));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::BrokerUnavailable(format!(
                "simulated broker outage for topic '{}'",
                self.topic
            )));
        }

        let mut writes = self.writes.lock().await;
        writes.push((key.map(str::to_string), payload));

        Ok(Ack {
            partition: 0,
            offset: (writes.len() - 1) as i64,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
