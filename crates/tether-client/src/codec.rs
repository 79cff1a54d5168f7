//! Outbound message encoding.

use bytes::Bytes;
use serde::Serialize;
use tether_core::BoxError;

/// Turns an application message into a transport payload.
pub trait Encoder<M>: Send + Sync {
    /// Encode one message.
    fn encode(&self, message: &M) -> Result<Bytes, BoxError>;
}

/// Encodes with `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

impl<M: Serialize> Encoder<M> for JsonEncoder {
    fn encode(&self, message: &M) -> Result<Bytes, BoxError> {
        Ok(Bytes::from(serde_json::to_vec(message)?))
    }
}

/// Encoder built from a closure.
pub struct FnEncoder<F>(pub F);

impl<M, F> Encoder<M> for FnEncoder<F>
where
    F: Fn(&M) -> Result<Bytes, BoxError> + Send + Sync,
{
    fn encode(&self, message: &M) -> Result<Bytes, BoxError> {
        (self.0)(message)
    }
}
