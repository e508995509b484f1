// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Uniform request/result envelopes and their MessagePack wire codec.
//!
//! Every transport carries the same two envelope shapes: a request
//! envelope on the way in and, on the synchronous path only, a result
//! envelope on the way back. The user payload rides inside `data` as an
//! opaque byte sequence, optionally Snappy-compressed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default diagnostic on a freshly constructed result envelope.
pub const OK_MESSAGE: &str = "OK";

/// Application-level status for a successful result.
pub const CODE_OK: i64 = 0;

/// Codec failures for envelopes and their payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("envelope decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("payload compression failed: {0}")]
    Compression(#[from] snap::Error),
}

/// Serialize a user payload, optionally compressing it.
fn pack<T: Serialize + ?Sized>(payload: &T, compress: bool) -> Result<(Bytes, bool), CodecError> {
    let raw = rmp_serde::to_vec_named(payload)?;
    if compress {
        let packed = snap::raw::Encoder::new().compress_vec(&raw)?;
        Ok((packed.into(), true))
    } else {
        Ok((raw.into(), false))
    }
}

fn unpack(data: &Bytes, compressed: bool) -> Result<Bytes, CodecError> {
    if compressed {
        Ok(snap::raw::Decoder::new().decompress_vec(data)?.into())
    } else {
        Ok(data.clone())
    }
}

/// Decompressed payload size. The Snappy block format prefixes the
/// decoded length, so the compressed case never pays for a full decode.
fn decoded_len(data: &Bytes, compressed: bool) -> usize {
    if compressed {
        snap::raw::decompress_len(data).unwrap_or(0)
    } else {
        data.len()
    }
}

/// The uniform request envelope exchanged over all three transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique identifier, generated at construction.
    pub id: Uuid,
    /// Effective identity of the producer.
    pub sender: String,
    /// Effective identity of the intended consumer.
    pub receiver: String,
    /// Case-insensitive method identifier.
    pub method: String,
    /// Whether `data` is Snappy-compressed.
    pub compress: bool,
    /// Wall-clock timestamp at construction.
    pub time: DateTime<Utc>,
    /// Opaque serialized user payload.
    pub data: Bytes,
}

impl RequestEnvelope {
    /// Create an envelope around a serialized user payload. Routing
    /// fields are filled in by the send path.
    pub fn new<T: Serialize + ?Sized>(payload: &T, compress: bool) -> Result<Self, CodecError> {
        let (data, compress) = pack(payload, compress)?;
        Ok(Self {
            id: Uuid::new_v4(),
            sender: String::new(),
            receiver: String::new(),
            method: String::new(),
            compress,
            time: Utc::now(),
            data,
        })
    }

    /// An envelope with no payload at all.
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: String::new(),
            receiver: String::new(),
            method: String::new(),
            compress: false,
            time: Utc::now(),
            data: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(rmp_serde::to_vec_named(self)?.into())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Raw user payload, decompressed when the envelope is compressed.
    pub fn bytes(&self) -> Result<Bytes, CodecError> {
        unpack(&self.data, self.compress)
    }

    /// Decode the user payload into the requested type.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(&self.bytes()?)?)
    }

    /// Decompressed payload size, for telemetry.
    pub fn payload_len(&self) -> usize {
        decoded_len(&self.data, self.compress)
    }
}

/// The result envelope answered on the synchronous RPC path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub id: Uuid,
    /// Application-level status; 0 is success.
    pub code: i64,
    /// Transport-level status written onto the HTTP response.
    pub http_status: u16,
    /// Human-readable diagnostic.
    pub message: String,
    pub compress: bool,
    pub time: DateTime<Utc>,
    pub data: Bytes,
}

impl ResultEnvelope {
    pub fn new<T: Serialize + ?Sized>(payload: &T, compress: bool) -> Result<Self, CodecError> {
        let (data, compress) = pack(payload, compress)?;
        Ok(Self {
            data,
            compress,
            ..Self::ok()
        })
    }

    /// A default success result: `code = 0`, HTTP 200, `"OK"`, no data.
    pub fn ok() -> Self {
        Self {
            id: Uuid::new_v4(),
            code: CODE_OK,
            http_status: 200,
            message: OK_MESSAGE.to_string(),
            compress: false,
            time: Utc::now(),
            data: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(rmp_serde::to_vec_named(self)?.into())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn bytes(&self) -> Result<Bytes, CodecError> {
        unpack(&self.data, self.compress)
    }

    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(&self.bytes()?)?)
    }

    pub fn payload_len(&self) -> usize {
        decoded_len(&self.data, self.compress)
    }
}
