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
//! Result sink for buffering fragment output.
//!
//! Responsibilities:
//! - Appends every output chunk to a shared `ResultBuffer`.
//! - Reports each driver's completion to the buffer exactly once.
//!
//! Key exported interfaces:
//! - Types: `ResultSinkFactory`.

use std::any::Any;
use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::result_buffer::ResultBuffer;
use crate::runtime::runtime_state::RuntimeState;

/// Factory for result sinks that append output chunks to a fragment's result buffer.
pub struct ResultSinkFactory {
    id: i32,
    plan_node_id: i32,
    name: String,
    buffer: Arc<ResultBuffer>,
}

impl ResultSinkFactory {
    pub fn new(id: i32, plan_node_id: i32, buffer: Arc<ResultBuffer>) -> Self {
        Self {
            id,
            plan_node_id,
            name: format!("RESULT_SINK (plan_node_id={plan_node_id})"),
            buffer,
        }
    }

    pub fn buffer(&self) -> &Arc<ResultBuffer> {
        &self.buffer
    }
}

impl OperatorFactory for ResultSinkFactory {
    fn id(&self) -> i32 {
        self.id
    }

    fn plan_node_id(&self) -> i32 {
        self.plan_node_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: usize, _driver_sequence: usize) -> Box<dyn Operator> {
        Box::new(ResultSinkOperator {
            name: self.name.clone(),
            buffer: Arc::clone(&self.buffer),
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

struct ResultSinkOperator {
    name: String,
    buffer: Arc<ResultBuffer>,
    finished: bool,
}

impl Operator for ResultSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn need_input(&self) -> bool {
        !self.finished
    }

    fn has_output(&self) -> bool {
        false
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        self.buffer.add_chunk(chunk);
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        Err("result sink does not produce output".to_string())
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        if !self.finished {
            self.finished = true;
            self.buffer.close_sender();
        }
        Ok(())
    }
}
