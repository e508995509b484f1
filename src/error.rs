// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error taxonomy.

use crate::protocol::envelope::CodecError;

/// Errors surfaced by the messaging fabric.
///
/// Handler functions themselves return `anyhow::Result`; everything the
/// fabric reports to callers or logs on the inbound path is one of these.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bytes that do not decode into an envelope, or a payload that does
    /// not decompress/deserialize.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An inbound envelope addressed to a different effective identity.
    #[error("wrong message receiver: self is <{expected}>, envelope is for <{actual}>")]
    WrongReceiver { expected: String, actual: String },

    /// The named method is not in the registry.
    #[error("method handler <{0}> not found")]
    MethodNotFound(String),

    /// A handler returned an error or panicked in a guarded worker.
    /// Substituted into the result message on the RPC path; logged and
    /// discarded on the asynchronous paths.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The remote RPC server answered with an error status.
    #[error("rpc call failed, response with HTTP status {0}")]
    RpcStatus(u16),

    /// A publish or call failed at the transport level.
    #[error("transport failure: {0}")]
    Transport(anyhow::Error),

    /// `task` was invoked but no queue transport is configured.
    #[error("no queue transport configured")]
    NoQueueTransport,

    /// `notify` was invoked but no pub/sub transport is configured.
    #[error("no pub/sub transport configured")]
    NoPubsubTransport,
}
