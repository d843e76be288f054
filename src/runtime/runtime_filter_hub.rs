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
//! Fragment-scoped registry of inbound runtime filters.
//!
//! Responsibilities:
//! - Keeps the probe-side collectors of runtime filters that scan operators in
//!   this fragment wait on, keyed by the plan node that consumes them.
//! - Closes every inbound collector exactly once during fragment teardown,
//!   before drivers and pipelines are released.
//!
//! Filter construction, merging and evaluation live with the join operators
//! and are not part of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::novarocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

/// Probe-side collector of runtime filters for one plan node.
pub trait RuntimeFilterCollector: Send + Sync {
    fn close(&self, state: &RuntimeState);
}

pub type RuntimeFilterCollectorRef = Arc<dyn RuntimeFilterCollector>;

#[derive(Default)]
pub struct RuntimeFilterHub {
    in_filters: Mutex<HashMap<i32, Vec<RuntimeFilterCollectorRef>>>,
    closed: AtomicBool,
}

impl RuntimeFilterHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_in_filter_collector(&self, plan_node_id: i32, collector: RuntimeFilterCollectorRef) {
        let mut guard = self.in_filters.lock().expect("runtime filter hub lock");
        guard.entry(plan_node_id).or_default().push(collector);
    }

    pub fn num_in_filter_collectors(&self) -> usize {
        let guard = self.in_filters.lock().expect("runtime filter hub lock");
        guard.values().map(Vec::len).sum()
    }

    /// Closes all inbound collectors; only the first call has any effect.
    pub fn close_all_in_filters(&self, state: &RuntimeState) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let collectors = {
            let mut guard = self.in_filters.lock().expect("runtime filter hub lock");
            std::mem::take(&mut *guard)
        };
        for (plan_node_id, list) in collectors {
            debug!(
                "close inbound runtime filters: plan_node_id={} collectors={}",
                plan_node_id,
                list.len()
            );
            for collector in list {
                collector.close(state);
            }
        }
    }
}
