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
//! Pipeline structure metadata.
//!
//! Responsibilities:
//! - Represents one sealed pipeline: ordered operator factories, source first and sink last.
//! - Prepares/closes its factories and materializes one driver per partition.
//!
//! Key exported interfaces:
//! - Types: `Pipeline`, `PipelineRef`.

use std::sync::Arc;

use super::driver::PipelineDriver;
use super::operator_factory::{OpFactories, OperatorFactory, source_degree_of_parallelism};
use crate::novarocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

/// One immutable pipeline definition.
pub struct Pipeline {
    id: u32,
    op_factories: OpFactories,
}

pub type PipelineRef = Arc<Pipeline>;

impl Pipeline {
    /// Seals `op_factories` into a pipeline.
    ///
    /// Panics unless the sequence starts with a source and ends with a sink.
    pub fn new(id: u32, op_factories: OpFactories) -> Self {
        assert!(
            op_factories.len() >= 2,
            "pipeline {id} needs a source and a sink, got {} operator(s)",
            op_factories.len()
        );
        assert!(
            op_factories[0].is_source(),
            "pipeline {id} must start with a source, got {}",
            op_factories[0].name()
        );
        assert!(
            op_factories[op_factories.len() - 1].is_sink(),
            "pipeline {id} must end with a sink, got {}",
            op_factories[op_factories.len() - 1].name()
        );
        Self { id, op_factories }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn op_factories(&self) -> &OpFactories {
        &self.op_factories
    }

    pub fn source(&self) -> &dyn OperatorFactory {
        self.op_factories[0].as_ref()
    }

    pub fn sink(&self) -> &dyn OperatorFactory {
        self.op_factories[self.op_factories.len() - 1].as_ref()
    }

    pub fn degree_of_parallelism(&self) -> usize {
        source_degree_of_parallelism(&self.op_factories).max(1)
    }

    /// `SOURCE -> ... -> SINK` rendering used in logs.
    pub fn describe(&self) -> String {
        self.op_factories
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn prepare(&self, state: &RuntimeState) -> Result<(), String> {
        for factory in &self.op_factories {
            factory.prepare(state).map_err(|e| {
                format!(
                    "prepare pipeline {} operator {} failed: {e}",
                    self.id,
                    factory.name()
                )
            })?;
        }
        Ok(())
    }

    pub fn close(&self, state: &RuntimeState) {
        for factory in &self.op_factories {
            factory.close(state);
        }
    }

    /// Creates one driver per partition; driver `i` gets operators created with sequence `i`.
    pub fn instantiate_drivers(&self, state: &Arc<RuntimeState>) -> Vec<PipelineDriver> {
        let dop = self.degree_of_parallelism();
        debug!(
            "instantiate drivers: pipeline_id={} dop={} operators={}",
            self.id,
            dop,
            self.describe()
        );
        (0..dop)
            .map(|seq| {
                let operators = self
                    .op_factories
                    .iter()
                    .map(|factory| factory.create(dop, seq))
                    .collect();
                PipelineDriver::new(self.id, seq, operators, Arc::clone(state))
            })
            .collect()
    }
}
