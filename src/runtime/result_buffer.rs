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
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::exec::chunk::Chunk;

#[derive(Debug, Default)]
struct BufferControlBlock {
    chunks: Vec<Chunk>,
    closed_senders: usize,
}

/// In-process collector for the chunks a fragment's result sinks produce.
#[derive(Debug, Default)]
pub struct ResultBuffer {
    block: Mutex<BufferControlBlock>,
    num_rows: AtomicUsize,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&self, chunk: Chunk) {
        if chunk.is_empty() {
            return;
        }
        self.num_rows.fetch_add(chunk.len(), Ordering::AcqRel);
        let mut guard = self.block.lock().expect("result buffer lock");
        guard.chunks.push(chunk);
    }

    pub fn close_sender(&self) {
        let mut guard = self.block.lock().expect("result buffer lock");
        guard.closed_senders += 1;
    }

    pub fn num_closed_senders(&self) -> usize {
        self.block.lock().expect("result buffer lock").closed_senders
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows.load(Ordering::Acquire)
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.block.lock().expect("result buffer lock").chunks.clone()
    }
}
