// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration.
//!
//! Three layers, lowest priority first: built-in defaults, an optional
//! TOML file pointed to by `UNIMSG_CONFIG_PATH`, and environment
//! variables prefixed `UNIMSG_` (nested keys separated by `__`, e.g.
//! `UNIMSG_RPC__SERVER__ACCESS_LOG=true`).

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_PATH_ENV: &str = "UNIMSG_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Queue consumer concurrency.
    pub n_workers: usize,
    pub nats: NatsOptions,
    pub rpc: RpcOptions,
    pub http: HttpOptions,
    pub queue: QueueOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsOptions {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcOptions {
    pub server: ServerOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub server: ServerOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub access_log: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Ask the broker to redeliver malformed deliveries instead of
    /// acknowledging them.
    pub requeue_malformed: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            n_workers: 1,
            nats: NatsOptions::default(),
            rpc: RpcOptions::default(),
            http: HttpOptions::default(),
            queue: QueueOptions::default(),
        }
    }
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from defaults, file and environment.
    pub fn load() -> Self {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed("UNIMSG_").split("__"))
            .extract()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "configuration load failed, using defaults");
                Self::default()
            })
    }
}
