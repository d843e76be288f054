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
//! Pipeline driver state machine.
//!
//! Responsibilities:
//! - Moves chunks between adjacent operators of one pipeline partition.
//! - Propagates finishing downstream and early termination upstream.
//! - Decides when the driver must yield, and why.
//!
//! Key exported interfaces:
//! - Types: `PipelineDriver`, `DriverState`, `DriverRef`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::fragment_context::FragmentContext;
use super::operator::{BlockedReason, Operator};
use crate::novarocks_logging::{debug, warn};
use crate::runtime::runtime_state::RuntimeState;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Result of one scheduling quantum of a driver.
pub enum DriverState {
    Ready,
    Blocked(BlockedReason),
    Finished,
    Cancelled,
    Failed(String),
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DriverState::Finished | DriverState::Cancelled | DriverState::Failed(_)
        )
    }
}

/// Runtime executor of one partition of one pipeline.
pub struct PipelineDriver {
    pipeline_id: u32,
    driver_sequence: usize,
    operators: Vec<Box<dyn Operator>>,
    runtime_state: Arc<RuntimeState>,
    state: DriverState,
    first_unfinished: usize,
    prepared: bool,
    closed: bool,
}

/// Drivers are shared between the fragment context (which owns the set) and the
/// executor task currently running them; only one worker locks a driver at a time.
pub type DriverRef = Arc<Mutex<PipelineDriver>>;

impl PipelineDriver {
    pub fn new(
        pipeline_id: u32,
        driver_sequence: usize,
        operators: Vec<Box<dyn Operator>>,
        runtime_state: Arc<RuntimeState>,
    ) -> Self {
        assert!(
            operators.len() >= 2,
            "pipeline driver requires at least a source and a sink"
        );
        Self {
            pipeline_id,
            driver_sequence,
            operators,
            runtime_state,
            state: DriverState::Ready,
            first_unfinished: 0,
            prepared: false,
            closed: false,
        }
    }

    pub fn pipeline_id(&self) -> u32 {
        self.pipeline_id
    }

    pub fn driver_sequence(&self) -> usize {
        self.driver_sequence
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn source_name(&self) -> &str {
        self.operators.first().map(|op| op.name()).unwrap_or("unknown")
    }

    pub fn sink_name(&self) -> &str {
        self.operators.last().map(|op| op.name()).unwrap_or("unknown")
    }

    pub fn prepare(&mut self) -> Result<(), String> {
        if self.prepared {
            return Ok(());
        }
        self.prepared = true;
        let state = Arc::clone(&self.runtime_state);
        for op in self.operators.iter_mut() {
            op.prepare(&state)
                .map_err(|e| format!("prepare operator {} failed: {e}", op.name()))?;
        }
        Ok(())
    }

    /// Closes every operator once; returns the first close failure.
    pub fn close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let state = Arc::clone(&self.runtime_state);
        let mut first_err = None;
        for op in self.operators.iter_mut() {
            if let Err(err) = op.close(&state) {
                warn!(
                    "close operator failed: pipeline_id={} driver_sequence={} op={} error={}",
                    self.pipeline_id,
                    self.driver_sequence,
                    op.name(),
                    err
                );
                first_err.get_or_insert(err);
            }
        }
        first_err.map(Err).unwrap_or(Ok(()))
    }

    /// Runs the driver until it finishes, blocks, or `time_slice` elapses.
    pub fn process(&mut self, ctx: &FragmentContext, time_slice: Duration) -> DriverState {
        let state = self.process_inner(ctx, time_slice);
        if state.is_terminal() {
            debug!(
                "Driver terminated: pipeline_id={} driver_sequence={} source={} sink={} state={:?}",
                self.pipeline_id,
                self.driver_sequence,
                self.source_name(),
                self.sink_name(),
                state
            );
        }
        self.state = state.clone();
        state
    }

    fn process_inner(&mut self, ctx: &FragmentContext, time_slice: Duration) -> DriverState {
        let start = Instant::now();
        loop {
            if ctx.is_cancelled() {
                self.cancel_operators();
                return DriverState::Cancelled;
            }
            if self.is_finished() {
                return DriverState::Finished;
            }
            let made_progress = match self.pump() {
                Ok(progress) => progress,
                Err(err) => {
                    self.cancel_operators();
                    return DriverState::Failed(err);
                }
            };
            if self.is_finished() {
                return DriverState::Finished;
            }
            if !made_progress {
                let source = &self.operators[self.first_unfinished];
                if !source.is_finished() && !source.has_output() {
                    return DriverState::Blocked(BlockedReason::InputEmpty);
                }
                let sink = &self.operators[self.operators.len() - 1];
                if !sink.need_input() {
                    return DriverState::Blocked(BlockedReason::OutputFull);
                }
                return DriverState::Ready;
            }
            if start.elapsed() >= time_slice {
                return DriverState::Ready;
            }
        }
    }

    /// One pass over every adjacent operator pair starting at the first unfinished one.
    fn pump(&mut self) -> Result<bool, String> {
        let state = Arc::clone(&self.runtime_state);
        let last = self.operators.len() - 1;
        let mut made_progress = false;
        let mut new_first_unfinished = self.first_unfinished;
        for i in self.first_unfinished..last {
            let (curr_finished, next_finished) = {
                let (left, right) = self.operators.split_at_mut(i + 1);
                let curr = &mut left[i];
                let next = &mut right[0];
                if next.is_finished() {
                    (false, true)
                } else {
                    if curr.has_output() && next.need_input() {
                        if let Some(chunk) = curr.pull_chunk(&state)? {
                            if !chunk.is_empty() {
                                next.push_chunk(&state, chunk)?;
                            }
                            made_progress = true;
                        }
                    }
                    if curr.is_finished() {
                        next.set_finishing(&state)?;
                        (true, false)
                    } else {
                        (false, false)
                    }
                }
            };
            if next_finished {
                // Downstream needs no more output: stop everything upstream of it.
                self.set_finished_range(new_first_unfinished, i + 1)?;
                new_first_unfinished = i + 1;
                made_progress = true;
            } else if curr_finished {
                self.set_finished_range(new_first_unfinished, i)?;
                new_first_unfinished = i + 1;
                made_progress = true;
            }
        }
        self.first_unfinished = new_first_unfinished;
        Ok(made_progress)
    }

    fn set_finished_range(&mut self, from: usize, to: usize) -> Result<(), String> {
        let state = Arc::clone(&self.runtime_state);
        for op in &mut self.operators[from..to] {
            op.set_finished(&state)?;
        }
        Ok(())
    }

    fn cancel_operators(&mut self) {
        let state = Arc::clone(&self.runtime_state);
        for op in self.operators.iter_mut() {
            if let Err(err) = op.set_cancelled(&state) {
                warn!(
                    "cancel operator failed: pipeline_id={} driver_sequence={} op={} error={}",
                    self.pipeline_id,
                    self.driver_sequence,
                    op.name(),
                    err
                );
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.operators.last().map(|op| op.is_finished()).unwrap_or(true)
    }

    /// Whether a blocked driver can make progress again; polled by the blocked-driver poller.
    pub fn is_ready(&self) -> bool {
        match &self.state {
            DriverState::Blocked(BlockedReason::InputEmpty) => {
                let source = &self.operators[self.first_unfinished];
                source.has_output() || source.is_finished() || self.is_finished()
            }
            DriverState::Blocked(BlockedReason::OutputFull) => {
                let sink = &self.operators[self.operators.len() - 1];
                sink.need_input() || sink.is_finished()
            }
            _ => true,
        }
    }
}
