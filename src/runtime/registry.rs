// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide method registry.
//!
//! Registration happens while the shell is wiring the runtime, before
//! any transport is started; afterwards the table is read-mostly. The
//! one tolerated late mutation is `set_concurrency`, a single atomic
//! store that only affects subsequent scheduling decisions.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::api::handler::Method;

/// A method name bound to its handler and concurrency policy.
pub struct MethodEntry {
    method: String,
    handler: Arc<dyn Method>,
    concurrency: AtomicI64,
}

impl MethodEntry {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn handler(&self) -> &Arc<dyn Method> {
        &self.handler
    }

    /// Current concurrency policy: `> 0` bounded, `0` synchronous,
    /// `< 0` unbounded.
    pub fn concurrency(&self) -> i64 {
        self.concurrency.load(Ordering::Acquire)
    }

    fn set_concurrency(&self, concurrency: i64) {
        self.concurrency.store(concurrency, Ordering::Release);
    }
}

/// Case-insensitive mapping from method name to [`MethodEntry`].
#[derive(Clone, Default)]
pub struct MethodRegistry {
    entries: Arc<DashMap<String, Arc<MethodEntry>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a handler. Empty method names route nowhere
    /// and are ignored.
    pub fn register(&self, method: &str, handler: Arc<dyn Method>, concurrency: i64) {
        if method.is_empty() {
            return;
        }

        let method = method.to_lowercase();
        let entry = Arc::new(MethodEntry {
            method: method.clone(),
            handler,
            concurrency: AtomicI64::new(concurrency),
        });
        self.entries.insert(method, entry);
    }

    pub fn lookup(&self, method: &str) -> Option<Arc<MethodEntry>> {
        if method.is_empty() {
            return None;
        }

        self.entries
            .get(&method.to_lowercase())
            .map(|entry| entry.value().clone())
    }

    /// Update an existing entry's concurrency; no-op when the method is
    /// not registered. Races against in-flight dispatches are
    /// tolerated: the value applies to future dispatches only.
    pub fn set_concurrency(&self, method: &str, concurrency: i64) {
        if let Some(entry) = self.lookup(method) {
            entry.set_concurrency(concurrency);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handler::method_fn;

    fn noop() -> Arc<dyn Method> {
        method_fn(|_| async { Ok(None) })
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = MethodRegistry::new();
        registry.register("Foo", noop(), 0);

        assert!(registry.lookup("foo").is_some());
        assert!(registry.lookup("FOO").is_some());
        assert!(registry.lookup("Foo").is_some());
        assert!(registry.lookup("bar").is_none());
    }

    #[test]
    fn empty_method_is_ignored() {
        let registry = MethodRegistry::new();
        registry.register("", noop(), 0);

        assert!(registry.is_empty());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn register_replaces() {
        let registry = MethodRegistry::new();
        registry.register("m", noop(), 1);
        registry.register("M", noop(), 5);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("m").unwrap().concurrency(), 5);
    }

    #[test]
    fn set_concurrency_updates_existing_only() {
        let registry = MethodRegistry::new();
        registry.register("m", noop(), 0);

        registry.set_concurrency("M", 3);
        assert_eq!(registry.lookup("m").unwrap().concurrency(), 3);

        registry.set_concurrency("ghost", 9);
        assert!(registry.lookup("ghost").is_none());
    }
}
