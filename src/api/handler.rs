// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The uniform method handler contract.
//!
//! One handler shape serves all three transports. On the synchronous
//! RPC path the returned result envelope travels back to the caller;
//! on the queue and pub/sub paths it is discarded.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::{RequestEnvelope, ResultEnvelope};

/// What a handler produces. `Ok(None)` means "success, default result".
pub type MethodResult = anyhow::Result<Option<ResultEnvelope>>;

/// A registered method.
#[async_trait]
pub trait Method: Send + Sync {
    async fn call(&self, envelope: RequestEnvelope) -> MethodResult;
}

struct FnMethod<F>(F);

#[async_trait]
impl<F, Fut> Method for FnMethod<F>
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = MethodResult> + Send,
{
    async fn call(&self, envelope: RequestEnvelope) -> MethodResult {
        (self.0)(envelope).await
    }
}

/// Wrap a plain async function or closure as a [`Method`].
///
/// ```no_run
/// use unimsg::api::handler::method_fn;
///
/// let mirror = method_fn(|envelope| async move {
///     Ok(Some(unimsg::protocol::ResultEnvelope::new(&envelope.unmarshal::<i64>()?, false)?))
/// });
/// ```
pub fn method_fn<F, Fut>(f: F) -> Arc<dyn Method>
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    Arc::new(FnMethod(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_adapter_invokes_closure() {
        let method = method_fn(|envelope: RequestEnvelope| async move {
            assert_eq!(envelope.method, "probe");
            Ok(None)
        });

        let mut envelope = RequestEnvelope::empty();
        envelope.method = "probe".into();
        assert!(method.call(envelope).await.unwrap().is_none());
    }
}
