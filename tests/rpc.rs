// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the request/reply transport: routing, status
//! taxonomy and result defaults against a live H2C server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use unimsg::{
    method_fn, Error, RequestEnvelope, ResultEnvelope, RpcClient, Runtime, RuntimeBuilder,
};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Payload {
    n: i64,
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn encoded(receiver: &str, method: &str, n: i64) -> Bytes {
    let mut envelope = RequestEnvelope::new(&Payload { n }, false).unwrap();
    envelope.receiver = receiver.to_string();
    envelope.method = method.to_string();
    envelope.sender = "tester".to_string();
    envelope.encode().unwrap()
}

fn client_for(runtime: &Runtime) -> RpcClient {
    RpcClient::new(runtime.rpc_addr().unwrap().to_string())
}

#[tokio::test(flavor = "multi_thread")]
async fn rpc_mirrors_payload() {
    let runtime = RuntimeBuilder::new("s1")
        .rpc_addr(loopback())
        .build()
        .await
        .unwrap();
    runtime.register(
        "mirror",
        method_fn(|envelope: RequestEnvelope| async move {
            let payload: Payload = envelope.unmarshal()?;
            Ok(Some(ResultEnvelope::new(&payload, false)?))
        }),
        0,
    );
    runtime.start().await.unwrap();

    // Mixed-case method names resolve to the same handler.
    let reply = client_for(&runtime)
        .call(encoded("s1", "Mirror", 42))
        .await
        .unwrap();

    assert_eq!(reply.code, 0);
    assert_eq!(reply.http_status, 200);
    assert_eq!(reply.message, "OK");
    assert_eq!(reply.unmarshal::<Payload>().unwrap(), Payload { n: 42 });

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_branch_is_rejected_without_invoking_handlers() {
    let invoked = Arc::new(AtomicUsize::new(0));

    let runtime = RuntimeBuilder::new("s1")
        .distinguish_branch(true)
        .branch_tag("blue")
        .rpc_addr(loopback())
        .build()
        .await
        .unwrap();
    assert_eq!(runtime.identity(), "s1_blue");

    let handler = {
        let invoked = invoked.clone();
        method_fn(move |_| {
            let invoked = invoked.clone();
            async move {
                invoked.fetch_add(1, Ordering::AcqRel);
                Ok(None)
            }
        })
    };
    runtime.register("mirror", handler, 0);
    runtime.start().await.unwrap();

    let error = client_for(&runtime)
        .call(encoded("s1_green", "mirror", 1))
        .await
        .unwrap_err();

    assert!(matches!(error, Error::RpcStatus(406)));
    assert_eq!(invoked.load(Ordering::Acquire), 0);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_method_is_not_found() {
    let runtime = RuntimeBuilder::new("s1")
        .rpc_addr(loopback())
        .build()
        .await
        .unwrap();
    runtime.start().await.unwrap();

    let error = client_for(&runtime)
        .call(encoded("s1", "ghost", 1))
        .await
        .unwrap_err();

    assert!(matches!(error, Error::RpcStatus(404)));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_envelope_gets_400_and_server_stays_healthy() {
    let runtime = RuntimeBuilder::new("s1")
        .rpc_addr(loopback())
        .build()
        .await
        .unwrap();
    runtime.register("mirror", method_fn(|_| async { Ok(None) }), 0);
    runtime.start().await.unwrap();

    let client = client_for(&runtime);
    let error = client
        .call(Bytes::from_static(&[0x17, 0xa3, 0x01, 0xfe, 0x42]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::RpcStatus(400)));

    // The next well-formed request still succeeds.
    let reply = client_for(&runtime)
        .call(encoded("s1", "mirror", 2))
        .await
        .unwrap();
    assert_eq!(reply.code, 0);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn nil_result_becomes_default_success() {
    let runtime = RuntimeBuilder::new("s1")
        .rpc_addr(loopback())
        .build()
        .await
        .unwrap();
    runtime.register("noop", method_fn(|_| async { Ok(None) }), 0);
    runtime.start().await.unwrap();

    let reply = client_for(&runtime)
        .call(encoded("s1", "noop", 0))
        .await
        .unwrap();

    assert_eq!(reply.code, 0);
    assert_eq!(reply.http_status, 200);
    assert_eq!(reply.message, "OK");
    assert!(reply.data.is_empty());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_error_text_lands_in_the_result_message() {
    let runtime = RuntimeBuilder::new("s1")
        .rpc_addr(loopback())
        .build()
        .await
        .unwrap();
    runtime.register(
        "angry",
        method_fn(|_| async { Err(anyhow::anyhow!("over quota")) }),
        0,
    );
    runtime.start().await.unwrap();

    let reply = client_for(&runtime)
        .call(encoded("s1", "angry", 0))
        .await
        .unwrap();

    assert_eq!(reply.http_status, 200);
    assert_eq!(reply.message, "over quota");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_chosen_error_status_reaches_the_caller() {
    let runtime = RuntimeBuilder::new("s1")
        .rpc_addr(loopback())
        .build()
        .await
        .unwrap();
    runtime.register(
        "teapot",
        method_fn(|_| async {
            let mut result = ResultEnvelope::ok();
            result.http_status = 418;
            result.code = 31;
            Ok(Some(result))
        }),
        0,
    );
    runtime.start().await.unwrap();

    let error = client_for(&runtime)
        .call(encoded("s1", "teapot", 0))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::RpcStatus(418)));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn runtime_call_brands_the_sender() {
    // The client side dials <receiver>:<rpc_port>, so a service named
    // "localhost" can call itself through the full send path.
    let port = 19377;
    let runtime = RuntimeBuilder::new("localhost")
        .rpc_addr(SocketAddr::from(([127, 0, 0, 1], port)))
        .rpc_port(port)
        .build()
        .await
        .unwrap();
    runtime.register(
        "whoami",
        method_fn(|envelope: RequestEnvelope| async move {
            Ok(Some(ResultEnvelope::new(&envelope.sender, false)?))
        }),
        0,
    );
    runtime.start().await.unwrap();

    let reply = runtime
        .call("localhost", "whoami", RequestEnvelope::empty())
        .await
        .unwrap();
    assert_eq!(reply.unmarshal::<String>().unwrap(), "localhost");

    runtime.shutdown().await;
}
