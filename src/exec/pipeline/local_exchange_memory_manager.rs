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
//! Local-exchange memory budget controller.
//!
//! Responsibilities:
//! - Tracks rows and bytes buffered between the sinks and the source of one local exchange.
//! - Provides the full/not-full decision sinks use for backpressure.
//!
//! Key exported interfaces:
//! - Types: `LocalExchangeMemoryManager`.
//!
//! The row budget is sized by the pipeline builder as a multiple of the target
//! chunk size; the byte budget bounds exchanges fed with unusually wide chunks.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::novarocks_logging::debug;

/// Memory-budget controller shared by all endpoints of one local exchange.
#[derive(Debug)]
pub struct LocalExchangeMemoryManager {
    max_row_count: i64,
    max_bytes: i64,
    buffered_rows: AtomicI64,
    buffered_bytes: AtomicI64,
    peak_rows: AtomicI64,
    peak_bytes: AtomicI64,
}

impl LocalExchangeMemoryManager {
    pub fn new(max_row_count: usize, max_bytes: usize) -> Self {
        if max_row_count == 0 || max_bytes == 0 {
            debug!(
                "LocalExchangeMemoryManager: invalid budget max_row_count={} max_bytes={}, clamped to 1",
                max_row_count, max_bytes
            );
        }
        Self {
            max_row_count: clamp_to_i64(max_row_count).max(1),
            max_bytes: clamp_to_i64(max_bytes).max(1),
            buffered_rows: AtomicI64::new(0),
            buffered_bytes: AtomicI64::new(0),
            peak_rows: AtomicI64::new(0),
            peak_bytes: AtomicI64::new(0),
        }
    }

    /// Row budget; the builder's sizing formulas are expressed in rows.
    pub fn max_row_count(&self) -> usize {
        self.max_row_count as usize
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes as usize
    }

    /// Charges one enqueued chunk to the budget.
    pub fn on_enqueue(&self, rows: usize, bytes: usize) {
        self.update(clamp_to_i64(rows), clamp_to_i64(bytes));
    }

    /// Releases one dequeued chunk from the budget.
    pub fn on_dequeue(&self, rows: usize, bytes: usize) {
        self.update(-clamp_to_i64(rows), -clamp_to_i64(bytes));
    }

    pub fn update(&self, row_delta: i64, byte_delta: i64) {
        let rows = self
            .buffered_rows
            .fetch_add(row_delta, Ordering::AcqRel)
            .saturating_add(row_delta);
        let bytes = self
            .buffered_bytes
            .fetch_add(byte_delta, Ordering::AcqRel)
            .saturating_add(byte_delta);
        update_peak(&self.peak_rows, rows);
        update_peak(&self.peak_bytes, bytes);
    }

    pub fn is_full(&self) -> bool {
        self.buffered_rows.load(Ordering::Acquire) >= self.max_row_count
            || self.buffered_bytes.load(Ordering::Acquire) >= self.max_bytes
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffered_rows.load(Ordering::Acquire).max(0) as usize
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes.load(Ordering::Acquire).max(0) as usize
    }

    pub fn peak_rows(&self) -> usize {
        self.peak_rows.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed).max(0) as usize
    }
}

fn clamp_to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn update_peak(peak: &AtomicI64, value: i64) {
    let mut prev = peak.load(Ordering::Relaxed);
    while value > prev {
        match peak.compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => prev = actual,
        }
    }
}
