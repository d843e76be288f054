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
//! Source side of local in-process exchange.
//!
//! Responsibilities:
//! - Drains one partition queue of the exchange per consuming driver.
//! - Finishes once every producer is done and the queue is empty.
//!
//! Key exported interfaces:
//! - Types: `LocalExchangeSourceFactory`.

use std::any::Any;
use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::operators::local_exchanger::LocalExchanger;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::novarocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

/// Factory for local-exchange source operators.
///
/// The factory's degree of parallelism is the exchange's partition count and
/// heads the pipeline created by the interpolation that built it.
pub struct LocalExchangeSourceFactory {
    id: i32,
    plan_node_id: i32,
    name: String,
    degree_of_parallelism: usize,
    exchanger: Arc<LocalExchanger>,
}

impl LocalExchangeSourceFactory {
    pub fn new(
        id: i32,
        plan_node_id: i32,
        degree_of_parallelism: usize,
        exchanger: Arc<LocalExchanger>,
    ) -> Self {
        let name = format!(
            "LOCAL_EXCHANGE_SOURCE ({}, id={plan_node_id})",
            exchanger.routing().name()
        );
        Self {
            id,
            plan_node_id,
            name,
            degree_of_parallelism: degree_of_parallelism.max(1),
            exchanger,
        }
    }

    pub fn exchanger(&self) -> &Arc<LocalExchanger> {
        &self.exchanger
    }
}

impl OperatorFactory for LocalExchangeSourceFactory {
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
        Box::new(LocalExchangeSourceOperator {
            name: self.name.clone(),
            partition: driver_sequence % self.exchanger.num_partitions(),
            exchanger: Arc::clone(&self.exchanger),
            released: false,
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

struct LocalExchangeSourceOperator {
    name: String,
    partition: usize,
    exchanger: Arc<LocalExchanger>,
    released: bool,
}

impl LocalExchangeSourceOperator {
    /// Stops consuming the partition. Queued chunks are dropped and producers
    /// route around it from now on.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if !self.exchanger.release_partition(self.partition) {
            return;
        }
        debug!(
            "LocalExchangeSource released: exchange_id={} partition={}",
            self.exchanger.exchange_id(),
            self.partition
        );
    }
}

impl Operator for LocalExchangeSourceOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.release();
        Ok(())
    }

    fn need_input(&self) -> bool {
        false
    }

    fn has_output(&self) -> bool {
        !self.released && self.exchanger.buffered_chunks(self.partition) > 0
    }

    fn is_finished(&self) -> bool {
        self.released || self.exchanger.is_done(self.partition)
    }

    fn push_chunk(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<(), String> {
        Err("local exchange source does not accept input".to_string())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        if self.released {
            return Ok(None);
        }
        Ok(self.exchanger.pop_chunk(self.partition))
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        Ok(())
    }

    fn set_finished(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.release();
        Ok(())
    }
}
