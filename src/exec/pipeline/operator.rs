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
//! Core operator trait and blocking semantics.
//!
//! Responsibilities:
//! - Defines the push/pull contract drivers use to move chunks between adjacent operators.
//! - Defines the reasons a driver yields its worker thread.
//!
//! Key exported interfaces:
//! - Types: `BlockedReason`, `Operator`.

use crate::exec::chunk::Chunk;
use crate::runtime::runtime_state::RuntimeState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The execution engine uses cooperative scheduling.
///
/// Operators are driven by a [`PipelineDriver`](crate::exec::pipeline::driver::PipelineDriver)
/// which repeatedly tries to move data from upstream to downstream.
/// When a driver cannot make progress without blocking, it records a [`BlockedReason`]
/// and yields.
pub enum BlockedReason {
    /// Upstream currently has no data available.
    InputEmpty,
    /// Downstream cannot accept more output at the moment, e.g. a local exchange
    /// whose memory budget is exhausted.
    OutputFull,
}

/// Runtime operator instance owned by exactly one driver.
///
/// Source operators only implement the output side, sink operators only the
/// input side; processors implement both.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn prepare(&mut self, _state: &RuntimeState) -> Result<(), String> {
        Ok(())
    }

    fn close(&mut self, _state: &RuntimeState) -> Result<(), String> {
        Ok(())
    }

    fn need_input(&self) -> bool;

    fn has_output(&self) -> bool;

    fn is_finished(&self) -> bool;

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<(), String>;

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String>;

    /// Upstream will not push any more chunks; buffered output may still be pulled.
    fn set_finishing(&mut self, state: &RuntimeState) -> Result<(), String>;

    /// Downstream does not need any more output.
    fn set_finished(&mut self, state: &RuntimeState) -> Result<(), String> {
        self.set_finishing(state)
    }

    /// The owning fragment was cancelled. Defaults to `set_finished`.
    fn set_cancelled(&mut self, state: &RuntimeState) -> Result<(), String> {
        self.set_finished(state)
    }
}
