//! Messages and the serialization seam.
//!
//! A [`Message`] is an opaque payload tagged with exactly one concrete
//! [`Datatype`] and a monotonic timestamp. Payload encodings (image and
//! tensor formats) live outside this crate; here a payload is just bytes.
//!
//! [`MessageCodec`] is the seam the record subsystem writes through. The
//! bundled [`RawCodec`] prepends a fixed header so recorded files can be
//! re-segmented later; any other codec can be substituted.

use crate::datatype::Datatype;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// A typed message exchanged with the device.
#[derive(Debug, Clone)]
pub struct Message {
    datatype: Datatype,
    /// Monotonic device timestamp.
    timestamp: Duration,
    /// Sequence number within the stream.
    sequence: u64,
    payload: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(datatype: Datatype, timestamp: Duration, sequence: u64, payload: Bytes) -> Self {
        Self {
            datatype,
            timestamp,
            sequence,
            payload,
        }
    }

    /// Runtime type tag.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Monotonic timestamp assigned by the producer.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Sequence number within the stream.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Opaque payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Serializes messages to bytes for recording.
///
/// Implementations define their own framing; the record subsystem appends
/// the returned bytes back-to-back with nothing in between.
pub trait MessageCodec: Send + Sync + 'static {
    /// Serialize one message.
    fn serialize(&self, message: &Message) -> Result<Bytes>;
}

/// Default codec: fixed little-endian header followed by the raw payload.
///
/// Header layout: datatype tag (`i32`), timestamp nanoseconds (`u64`),
/// sequence number (`u64`), payload length (`u64`).
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl RawCodec {
    /// Header size in bytes.
    pub const HEADER_SIZE: usize = 4 + 8 + 8 + 8;
}

impl MessageCodec for RawCodec {
    fn serialize(&self, message: &Message) -> Result<Bytes> {
        let nanos: u64 = message
            .timestamp()
            .as_nanos()
            .try_into()
            .map_err(|_| Error::Serialization("timestamp exceeds u64 nanoseconds".into()))?;

        let mut out = BytesMut::with_capacity(Self::HEADER_SIZE + message.len());
        out.put_i32_le(message.datatype() as i32);
        out.put_u64_le(nanos);
        out.put_u64_le(message.sequence());
        out.put_u64_le(message.len() as u64);
        out.extend_from_slice(message.payload());
        Ok(out.freeze())
    }
}
