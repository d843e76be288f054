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
//! Local exchange buffer and routing implementation.
//!
//! Responsibilities:
//! - Implements passthrough, broadcast, and partitioned in-process chunk routing.
//! - Maintains per-partition queues, the shared memory budget, and producer/consumer coordination.
//!
//! Key exported interfaces:
//! - Types: `ExchangeRouting`, `PartitionSpec`, `PartitionKind`, `LocalExchanger`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::row::{RowConverter, SortField};

use crate::exec::chunk::Chunk;
use crate::exec::expr::{ExprRef, evaluate_all};
use crate::exec::pipeline::local_exchange_memory_manager::LocalExchangeMemoryManager;
use crate::novarocks_logging::debug;

static NEXT_EXCHANGE_ID: AtomicUsize = AtomicUsize::new(1);

const FNV_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hash function a partitioned exchange routes keys with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    /// FNV-1a over the encoded key row.
    Hash,
    /// CRC32C over the encoded key row, matching bucket-aligned shuffles.
    BucketShuffleHash,
}

impl PartitionKind {
    fn hash_row(self, row: &[u8]) -> u64 {
        match self {
            PartitionKind::Hash => row.iter().fold(FNV_SEED, |h, b| {
                (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
            }),
            PartitionKind::BucketShuffleHash => u64::from(crc32c::crc32c(row)),
        }
    }
}

/// Partition keys plus the hash used to map them to destinations.
#[derive(Clone, Debug)]
pub struct PartitionSpec {
    pub kind: PartitionKind,
    pub exprs: Vec<ExprRef>,
}

impl PartitionSpec {
    pub fn new(kind: PartitionKind, exprs: Vec<ExprRef>) -> Self {
        Self { kind, exprs }
    }

    /// Computes the destination partition of every row in `chunk`.
    ///
    /// Keys are encoded with the arrow row format, so equal key tuples produce
    /// identical bytes and therefore identical destinations regardless of
    /// which chunk or driver they arrive in.
    pub fn destinations(&self, chunk: &Chunk, num_partitions: usize) -> Result<Vec<usize>, String> {
        let num_partitions = num_partitions.max(1);
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        if self.exprs.is_empty() {
            return Err("partitioned local exchange requires at least one partition expr".to_string());
        }
        let arrays = evaluate_all(&self.exprs, chunk)?;
        let fields = arrays
            .iter()
            .map(|a| SortField::new(a.data_type().clone()))
            .collect::<Vec<_>>();
        let converter = RowConverter::new(fields)
            .map_err(|e| format!("build partition key encoder failed: {e}"))?;
        let rows = converter
            .convert_columns(&arrays)
            .map_err(|e| format!("encode partition keys failed: {e}"))?;
        Ok(rows
            .iter()
            .map(|row| (self.kind.hash_row(row.as_ref()) % num_partitions as u64) as usize)
            .collect())
    }
}

/// Closed set of routing policies a local exchange can apply.
#[derive(Clone, Debug)]
pub enum ExchangeRouting {
    /// Every partition receives every chunk.
    Broadcast,
    /// Chunks are spread round-robin across partitions, one chunk at a time.
    Passthrough,
    /// Rows are routed by `hash(key) % num_partitions`.
    Partition(PartitionSpec),
}

impl ExchangeRouting {
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeRouting::Broadcast => "BROADCAST",
            ExchangeRouting::Passthrough => "PASSTHROUGH",
            ExchangeRouting::Partition(_) => "PARTITION",
        }
    }

    /// Splits one input chunk into `(destination, chunk)` pairs.
    ///
    /// `cursor` is the sender's passthrough position; it only advances for
    /// passthrough routing so each sender keeps its own rotation.
    pub fn route(
        &self,
        chunk: Chunk,
        num_partitions: usize,
        cursor: &mut usize,
    ) -> Result<Vec<(usize, Chunk)>, String> {
        let num_partitions = num_partitions.max(1);
        match self {
            ExchangeRouting::Passthrough => {
                let target = *cursor % num_partitions;
                *cursor = cursor.wrapping_add(1);
                Ok(vec![(target, chunk)])
            }
            ExchangeRouting::Broadcast => {
                Ok((0..num_partitions).map(|p| (p, chunk.clone())).collect())
            }
            ExchangeRouting::Partition(spec) => {
                if num_partitions == 1 {
                    return Ok(vec![(0, chunk)]);
                }
                let destinations = spec.destinations(&chunk, num_partitions)?;
                let mut indices: Vec<Vec<u32>> = vec![Vec::new(); num_partitions];
                for (row, dest) in destinations.into_iter().enumerate() {
                    indices[dest].push(row as u32);
                }
                let mut out = Vec::new();
                for (dest, rows) in indices.into_iter().enumerate() {
                    if rows.is_empty() {
                        continue;
                    }
                    if rows.len() == chunk.len() {
                        out.push((dest, chunk));
                        break;
                    }
                    out.push((dest, chunk.take(&rows)?));
                }
                Ok(out)
            }
        }
    }
}

#[derive(Default)]
struct PartitionQueue {
    chunks: VecDeque<Chunk>,
    // Set once the consuming source stops; nothing is enqueued afterwards.
    released: bool,
}

/// In-process exchange buffer shared by the sinks of the producing pipeline(s)
/// and the source of the consuming pipeline.
///
/// Each consuming driver owns one partition queue. The exchange is done for a
/// partition once every producer has finished and the queue is drained. A
/// partition whose source stopped early is released: broadcast and partition
/// routing skip it and passthrough moves on to the next live partition.
pub struct LocalExchanger {
    exchange_id: usize,
    routing: ExchangeRouting,
    num_partitions: usize,
    queues: Mutex<Vec<PartitionQueue>>,
    memory_manager: Arc<LocalExchangeMemoryManager>,
    remaining_producers: AtomicUsize,
    finished_sources: AtomicUsize,
}

impl fmt::Debug for LocalExchanger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExchanger")
            .field("exchange_id", &self.exchange_id)
            .field("routing", &self.routing.name())
            .field("num_partitions", &self.num_partitions)
            .field("remaining_producers", &self.remaining_producers())
            .finish()
    }
}

impl LocalExchanger {
    pub fn new(
        routing: ExchangeRouting,
        num_partitions: usize,
        producer_count: usize,
        memory_manager: Arc<LocalExchangeMemoryManager>,
    ) -> Arc<Self> {
        let num_partitions = num_partitions.max(1);
        let exchange_id = NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "LocalExchanger created: exchange_id={} routing={} partitions={} producers={} max_rows={} max_bytes={}",
            exchange_id,
            routing.name(),
            num_partitions,
            producer_count,
            memory_manager.max_row_count(),
            memory_manager.max_bytes()
        );
        Arc::new(Self {
            exchange_id,
            routing,
            num_partitions,
            queues: Mutex::new((0..num_partitions).map(|_| PartitionQueue::default()).collect()),
            memory_manager,
            remaining_producers: AtomicUsize::new(producer_count),
            finished_sources: AtomicUsize::new(0),
        })
    }

    pub fn exchange_id(&self) -> usize {
        self.exchange_id
    }

    pub fn routing(&self) -> &ExchangeRouting {
        &self.routing
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn memory_manager(&self) -> &Arc<LocalExchangeMemoryManager> {
        &self.memory_manager
    }

    pub fn remaining_producers(&self) -> usize {
        self.remaining_producers.load(Ordering::Acquire)
    }

    pub fn is_all_sources_finished(&self) -> bool {
        self.finished_sources.load(Ordering::Acquire) >= self.num_partitions
    }

    /// Sinks must stop pushing once the budget is exhausted or nobody reads anymore.
    pub fn need_input(&self) -> bool {
        !self.is_all_sources_finished() && !self.memory_manager.is_full()
    }

    /// Marks one producer finished; returns true for the call that finished the last one.
    pub fn finish_producer(&self) -> bool {
        let mut current = self.remaining_producers.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            let next = current - 1;
            match self.remaining_producers.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if next == 0 {
                        debug!(
                            "LocalExchanger all producers finished: exchange_id={} peak_rows={} peak_bytes={}",
                            self.exchange_id,
                            self.memory_manager.peak_rows(),
                            self.memory_manager.peak_bytes()
                        );
                    }
                    return next == 0;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Routes `chunk` and enqueues every piece bound for a live partition.
    /// Empty chunks are dropped.
    pub fn accept(&self, chunk: Chunk, cursor: &mut usize) -> Result<(), String> {
        if chunk.is_empty() || self.is_all_sources_finished() {
            return Ok(());
        }
        let routed = self.routing.route(chunk, self.num_partitions, cursor)?;
        let mut guard = self.queues.lock().expect("local exchanger lock");
        for (partition, piece) in routed {
            let Some(target) = self.live_destination(&guard, partition) else {
                continue;
            };
            if target != partition {
                *cursor = target + 1;
            }
            self.memory_manager
                .on_enqueue(piece.len(), piece.estimated_bytes());
            guard[target].chunks.push_back(piece);
        }
        Ok(())
    }

    fn live_destination(&self, queues: &[PartitionQueue], partition: usize) -> Option<usize> {
        if !queues[partition].released {
            return Some(partition);
        }
        match self.routing {
            ExchangeRouting::Passthrough => (1..self.num_partitions)
                .map(|offset| (partition + offset) % self.num_partitions)
                .find(|p| !queues[*p].released),
            ExchangeRouting::Broadcast | ExchangeRouting::Partition(_) => None,
        }
    }

    pub fn pop_chunk(&self, partition: usize) -> Option<Chunk> {
        let chunk = {
            let mut guard = self.queues.lock().expect("local exchanger lock");
            guard.get_mut(partition)?.chunks.pop_front()
        }?;
        self.memory_manager
            .on_dequeue(chunk.len(), chunk.estimated_bytes());
        Some(chunk)
    }

    pub fn buffered_chunks(&self, partition: usize) -> usize {
        let guard = self.queues.lock().expect("local exchanger lock");
        guard.get(partition).map(|q| q.chunks.len()).unwrap_or(0)
    }

    /// True once no producer remains and the partition queue is drained.
    pub fn is_done(&self, partition: usize) -> bool {
        self.remaining_producers() == 0 && self.buffered_chunks(partition) == 0
    }

    /// Stops routing into `partition` and drops what is still queued there,
    /// releasing its budget. Returns false if it was already released.
    pub fn release_partition(&self, partition: usize) -> bool {
        let drained = {
            let mut guard = self.queues.lock().expect("local exchanger lock");
            let Some(queue) = guard.get_mut(partition) else {
                return false;
            };
            if queue.released {
                return false;
            }
            queue.released = true;
            self.finished_sources.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut queue.chunks)
        };
        for chunk in drained {
            self.memory_manager
                .on_dequeue(chunk.len(), chunk.estimated_bytes());
        }
        true
    }
}
