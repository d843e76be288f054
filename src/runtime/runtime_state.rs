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
use crate::common::types::UniqueId;
use crate::runtime::exec_env::RuntimeOptions;

/// RuntimeState is a per-fragment-instance execution context, similar to StarRocks BE RuntimeState.
///
/// It carries the identifiers of the fragment instance and the runtime knobs
/// operators read while they are prepared and executed (chunk size, exchange
/// byte budgets).
#[derive(Debug, Clone)]
pub struct RuntimeState {
    query_id: UniqueId,
    fragment_instance_id: UniqueId,
    chunk_size: usize,
    local_exchange_mem_limit_per_driver: usize,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(
            UniqueId::default(),
            UniqueId::default(),
            &RuntimeOptions::default(),
        )
    }
}

impl RuntimeState {
    pub fn new(query_id: UniqueId, fragment_instance_id: UniqueId, options: &RuntimeOptions) -> Self {
        Self {
            query_id,
            fragment_instance_id,
            chunk_size: options.chunk_size.max(1),
            local_exchange_mem_limit_per_driver: options
                .local_exchange_buffer_mem_limit_per_driver
                .max(1),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    /// Target number of rows per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn local_exchange_mem_limit_per_driver(&self) -> usize {
        self.local_exchange_mem_limit_per_driver
    }
}
