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
//! Sink side of local in-process exchange.
//!
//! Responsibilities:
//! - Pushes chunks into the exchange according to its routing policy.
//! - Reports producer completion so the exchange source can finish.
//!
//! Key exported interfaces:
//! - Types: `LocalExchangeSinkFactory`.

use std::any::Any;
use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::operators::local_exchanger::LocalExchanger;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::novarocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

/// Factory for local-exchange sink operators; one operator per producing driver.
pub struct LocalExchangeSinkFactory {
    id: i32,
    plan_node_id: i32,
    name: String,
    exchanger: Arc<LocalExchanger>,
}

impl LocalExchangeSinkFactory {
    pub fn new(id: i32, plan_node_id: i32, exchanger: Arc<LocalExchanger>) -> Self {
        let name = format!(
            "LOCAL_EXCHANGE_SINK ({}, id={plan_node_id})",
            exchanger.routing().name()
        );
        Self {
            id,
            plan_node_id,
            name,
            exchanger,
        }
    }

    pub fn exchanger(&self) -> &Arc<LocalExchanger> {
        &self.exchanger
    }
}

impl OperatorFactory for LocalExchangeSinkFactory {
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
        Box::new(LocalExchangeSinkOperator {
            name: self.name.clone(),
            driver_sequence,
            cursor: driver_sequence,
            exchanger: Arc::clone(&self.exchanger),
            finished: false,
        })
    }

    fn is_sink(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct LocalExchangeSinkOperator {
    name: String,
    driver_sequence: usize,
    cursor: usize,
    exchanger: Arc<LocalExchanger>,
    finished: bool,
}

impl Operator for LocalExchangeSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self, state: &RuntimeState) -> Result<(), String> {
        // A driver torn down before finishing must still release its producer slot.
        self.set_finishing(state)
    }

    fn need_input(&self) -> bool {
        !self.finished && self.exchanger.need_input()
    }

    fn has_output(&self) -> bool {
        false
    }

    fn is_finished(&self) -> bool {
        self.finished || self.exchanger.is_all_sources_finished()
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        self.exchanger.accept(chunk, &mut self.cursor)
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        Err("local exchange sink does not produce output".to_string())
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let finished_all = self.exchanger.finish_producer();
        debug!(
            "LocalExchangeSink producer finished: exchange_id={} driver_sequence={} remaining_producers={} finished_all={}",
            self.exchanger.exchange_id(),
            self.driver_sequence,
            self.exchanger.remaining_producers(),
            finished_all
        );
        Ok(())
    }
}
