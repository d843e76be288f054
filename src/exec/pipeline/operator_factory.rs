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
//! Operator factory trait definitions.
//!
//! Responsibilities:
//! - Defines factory contracts used by pipeline builder to instantiate operators per driver.
//! - Separates plan-time operator configuration from runtime operator instances.
//!
//! Key exported interfaces:
//! - Types: `OperatorFactory`, `OpFactories`.

use std::any::Any;

use super::operator::Operator;
use crate::runtime::runtime_state::RuntimeState;

/// Factory contract for constructing runtime operators from plan-time configuration.
///
/// Factories are immutable once a pipeline is sealed and are shared by every
/// driver instantiated from that pipeline.
pub trait OperatorFactory: Send + Sync + Any {
    fn id(&self) -> i32;

    fn plan_node_id(&self) -> i32;

    fn name(&self) -> &str;

    fn create(&self, dop: usize, driver_sequence: usize) -> Box<dyn Operator>;

    fn is_source(&self) -> bool {
        false
    }

    fn is_sink(&self) -> bool {
        false
    }

    /// Number of drivers a pipeline headed by this factory runs with.
    /// Only meaningful for source factories.
    fn degree_of_parallelism(&self) -> usize {
        1
    }

    fn prepare(&self, _state: &RuntimeState) -> Result<(), String> {
        Ok(())
    }

    fn close(&self, _state: &RuntimeState) {}

    fn as_any(&self) -> &dyn Any;
}

/// Ordered operator factories of one (possibly still open) pipeline.
pub type OpFactories = Vec<Box<dyn OperatorFactory>>;

/// Returns the dop of the source heading `ops`.
///
/// Panics if `ops` is empty or does not start with a source; the planner
/// guarantees that shape.
pub fn source_degree_of_parallelism(ops: &OpFactories) -> usize {
    assert!(
        ops.first().is_some_and(|op| op.is_source()),
        "operator factories must start with a source"
    );
    ops[0].degree_of_parallelism()
}
