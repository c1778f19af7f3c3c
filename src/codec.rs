use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;

/// Encoding capability consumed by producers.
///
/// Supplied by the owning service or a shared serialization layer; failures
/// surface as [`Error::Serialization`] from the publish operation.
pub trait MessageCodec<T>: Send + Sync {
    fn encode(&self, record: &T) -> Result<Bytes>;
}

/// serde_json encoder, the default codec for declared topics.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize> MessageCodec<T> for JsonCodec {
    fn encode(&self, record: &T) -> Result<Bytes> {
        let payload =
            serde_json::to_vec(record).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Bytes::from(payload))
    }
}
