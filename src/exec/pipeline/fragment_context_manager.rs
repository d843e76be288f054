// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Registry of live fragment contexts.
//!
//! Responsibilities:
//! - Maps fragment instance ids to their `FragmentContext`, one live context per id.
//! - Releases completion waiters on unregister and broadcasts cancellation.
//!
//! Key exported interfaces:
//! - Types: `FragmentContextManager`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::fragment_context::FragmentContext;
use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::novarocks_logging::{debug, info};

/// The map lock only guards structural changes; per-context state is atomic.
#[derive(Default)]
pub struct FragmentContextManager {
    contexts: Mutex<HashMap<UniqueId, Arc<FragmentContext>>>,
}

impl FragmentContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the context registered for `id`, creating it if absent.
    pub fn get_or_register(&self, id: UniqueId) -> Arc<FragmentContext> {
        let mut guard = self.contexts.lock().expect("fragment context manager lock");
        Arc::clone(guard.entry(id).or_insert_with(|| {
            debug!("register fragment context: fragment_instance_id={id}");
            Arc::new(FragmentContext::new(id))
        }))
    }

    /// Inserts `ctx` unless `id` is already registered; the existing context wins.
    pub fn register_ctx(&self, id: UniqueId, ctx: Arc<FragmentContext>) {
        let mut guard = self.contexts.lock().expect("fragment context manager lock");
        if guard.contains_key(&id) {
            debug!("fragment context already registered, dropping new one: fragment_instance_id={id}");
            return;
        }
        guard.insert(id, ctx);
    }

    pub fn get(&self, id: UniqueId) -> Option<Arc<FragmentContext>> {
        let guard = self.contexts.lock().expect("fragment context manager lock");
        guard.get(&id).cloned()
    }

    /// Removes `id` and releases its finish signal. No-op when absent.
    pub fn unregister(&self, id: UniqueId) {
        let removed = {
            let mut guard = self.contexts.lock().expect("fragment context manager lock");
            guard.remove(&id)
        };
        let Some(ctx) = removed else {
            return;
        };
        if ctx.finish_signal().release() {
            debug!("unregister fragment context: fragment_instance_id={id}");
        }
    }

    /// Cancels every registered context.
    pub fn cancel(&self, status: Status) {
        let contexts = {
            let guard = self.contexts.lock().expect("fragment context manager lock");
            guard.values().cloned().collect::<Vec<_>>()
        };
        if !contexts.is_empty() {
            info!(
                "cancel all fragment contexts: count={} status={}",
                contexts.len(),
                status
            );
        }
        for ctx in contexts {
            ctx.cancel(status.clone());
        }
    }

    pub fn size(&self) -> usize {
        self.contexts
            .lock()
            .expect("fragment context manager lock")
            .len()
    }
}
