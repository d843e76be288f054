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
//! Scan morsel queue implementations.
//!
//! Responsibilities:
//! - Defines dynamic/fixed morsel queues for distributing scan work across drivers.
//! - Hands every morsel to exactly one driver, however many drivers share the queue.
//!
//! Key exported interfaces:
//! - Types: `ScanMorsel`, `MorselQueue`, `MorselQueueRef`, `MorselQueueMap`,
//!   `DynamicMorselQueue`, `FixedMorselQueue`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::exec::chunk::Chunk;

/// One unit of scan work: the chunks one data split yields.
#[derive(Debug, Clone)]
pub struct ScanMorsel {
    pub split_id: i32,
    pub chunks: Vec<Chunk>,
}

impl ScanMorsel {
    pub fn new(split_id: i32, chunks: Vec<Chunk>) -> Self {
        Self { split_id, chunks }
    }

    pub fn num_rows(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }
}

/// Queue contract for distributing scan morsels across scan drivers.
pub trait MorselQueue: Send + Sync {
    fn try_get(&self) -> Option<ScanMorsel>;
    fn unget(&self, morsel: ScanMorsel);
    fn empty(&self) -> bool;
    /// Whether more morsels may still be appended later.
    fn has_more(&self) -> bool;
    fn set_has_more(&self, value: bool);
    fn num_original_morsels(&self) -> usize;
    fn append_morsels(&self, _morsels: Vec<ScanMorsel>) -> Result<(), String> {
        Err("morsel queue does not support append".to_string())
    }
}

/// Shared reference to a scan morsel queue implementation.
pub type MorselQueueRef = Arc<dyn MorselQueue>;

/// Morsel queues of one fragment, keyed by scan plan node id.
pub type MorselQueueMap = HashMap<i32, MorselQueueRef>;

struct CountedQueue {
    queue: Mutex<VecDeque<ScanMorsel>>,
    size: AtomicUsize,
}

impl CountedQueue {
    fn new(morsels: Vec<ScanMorsel>) -> Self {
        let size = morsels.len();
        Self {
            queue: Mutex::new(VecDeque::from(morsels)),
            size: AtomicUsize::new(size),
        }
    }

    fn try_get(&self) -> Option<ScanMorsel> {
        if self.size.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut guard = self.queue.lock().expect("morsel queue lock");
        let morsel = guard.pop_front();
        if morsel.is_some() {
            self.size.fetch_sub(1, Ordering::AcqRel);
        }
        morsel
    }

    fn unget(&self, morsel: ScanMorsel) {
        let mut guard = self.queue.lock().expect("morsel queue lock");
        guard.push_front(morsel);
        self.size.fetch_add(1, Ordering::AcqRel);
    }

    fn push_back_all(&self, morsels: Vec<ScanMorsel>) {
        let mut guard = self.queue.lock().expect("morsel queue lock");
        self.size.fetch_add(morsels.len(), Ordering::AcqRel);
        guard.extend(morsels);
    }

    fn empty(&self) -> bool {
        self.size.load(Ordering::Acquire) == 0
    }
}

/// Dynamically extendable morsel queue; scan drivers keep waiting while `has_more` is set.
pub struct DynamicMorselQueue {
    inner: CountedQueue,
    has_more: AtomicBool,
    original_morsels: usize,
}

impl DynamicMorselQueue {
    pub fn new(morsels: Vec<ScanMorsel>, has_more: bool) -> Arc<Self> {
        let original_morsels = morsels.len();
        Arc::new(Self {
            inner: CountedQueue::new(morsels),
            has_more: AtomicBool::new(has_more),
            original_morsels,
        })
    }
}

impl MorselQueue for DynamicMorselQueue {
    fn try_get(&self) -> Option<ScanMorsel> {
        self.inner.try_get()
    }

    fn unget(&self, morsel: ScanMorsel) {
        self.inner.unget(morsel);
    }

    fn empty(&self) -> bool {
        self.inner.empty()
    }

    fn has_more(&self) -> bool {
        self.has_more.load(Ordering::Acquire)
    }

    fn set_has_more(&self, value: bool) {
        self.has_more.store(value, Ordering::Release);
    }

    fn num_original_morsels(&self) -> usize {
        self.original_morsels
    }

    fn append_morsels(&self, morsels: Vec<ScanMorsel>) -> Result<(), String> {
        if morsels.is_empty() {
            return Ok(());
        }
        self.inner.push_back_all(morsels);
        Ok(())
    }
}

/// Morsel queue over a precomputed, closed set of scan splits.
pub struct FixedMorselQueue {
    inner: CountedQueue,
    original_morsels: usize,
}

impl FixedMorselQueue {
    pub fn new(morsels: Vec<ScanMorsel>) -> Arc<Self> {
        let original_morsels = morsels.len();
        Arc::new(Self {
            inner: CountedQueue::new(morsels),
            original_morsels,
        })
    }
}

impl MorselQueue for FixedMorselQueue {
    fn try_get(&self) -> Option<ScanMorsel> {
        self.inner.try_get()
    }

    fn unget(&self, morsel: ScanMorsel) {
        self.inner.unget(morsel);
    }

    fn empty(&self) -> bool {
        self.inner.empty()
    }

    fn has_more(&self) -> bool {
        false
    }

    fn set_has_more(&self, _value: bool) {}

    fn num_original_morsels(&self) -> usize {
        self.original_morsels
    }
}
