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
//! Morsel-driven scan source.
//!
//! Every driver of a scan pipeline pulls morsels from the same queue, so the
//! number of drivers is independent of the number of splits.

use std::any::Any;
use std::collections::VecDeque;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::pipeline::scan::morsel::MorselQueueRef;
use crate::novarocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

pub struct ScanSourceFactory {
    id: i32,
    plan_node_id: i32,
    name: String,
    degree_of_parallelism: usize,
    morsel_queue: MorselQueueRef,
}

impl ScanSourceFactory {
    pub fn new(
        id: i32,
        plan_node_id: i32,
        degree_of_parallelism: usize,
        morsel_queue: MorselQueueRef,
    ) -> Self {
        Self {
            id,
            plan_node_id,
            name: format!("SCAN (id={plan_node_id})"),
            degree_of_parallelism: degree_of_parallelism.max(1),
            morsel_queue,
        }
    }
}

impl OperatorFactory for ScanSourceFactory {
    fn id(&self) -> i32 {
        self.id
    }

    fn plan_node_id(&self) -> i32 {
        self.plan_node_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: usize, driver_sequence: usize) -> Box<dyn Operator> {
        Box::new(ScanSourceOperator {
            name: self.name.clone(),
            driver_sequence,
            morsel_queue: self.morsel_queue.clone(),
            pending: VecDeque::new(),
            morsels_read: 0,
            finished: false,
        })
    }

    fn is_source(&self) -> bool {
        true
    }

    fn degree_of_parallelism(&self) -> usize {
        self.degree_of_parallelism
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ScanSourceOperator {
    name: String,
    driver_sequence: usize,
    morsel_queue: MorselQueueRef,
    pending: VecDeque<Chunk>,
    morsels_read: usize,
    finished: bool,
}

impl Operator for ScanSourceOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self, _state: &RuntimeState) -> Result<(), String> {
        debug!(
            "{} closed: driver_sequence={} morsels_read={}",
            self.name, self.driver_sequence, self.morsels_read
        );
        self.pending.clear();
        Ok(())
    }

    fn need_input(&self) -> bool {
        false
    }

    fn has_output(&self) -> bool {
        !self.finished && (!self.pending.is_empty() || !self.morsel_queue.empty())
    }

    fn is_finished(&self) -> bool {
        self.finished
            || (self.pending.is_empty()
                && self.morsel_queue.empty()
                && !self.morsel_queue.has_more())
    }

    fn push_chunk(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<(), String> {
        Err("scan source does not accept input".to_string())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        if self.finished {
            return Ok(None);
        }
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                if chunk.is_empty() {
                    continue;
                }
                return Ok(Some(chunk));
            }
            let Some(morsel) = self.morsel_queue.try_get() else {
                return Ok(None);
            };
            self.morsels_read += 1;
            self.pending.extend(morsel.chunks);
        }
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        Ok(())
    }

    fn set_finished(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.finished = true;
        self.pending.clear();
        Ok(())
    }
}
