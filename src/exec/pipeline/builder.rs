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
//! Pipeline graph builder.
//!
//! Responsibilities:
//! - Decomposes an exec-node tree into operator-factory sequences and seals them into pipelines.
//! - Interposes local exchanges (passthrough, broadcast, shuffle, gather) wherever adjacent
//!   stages disagree on degree of parallelism, sizing each exchange's memory budget.
//!
//! Key exported interfaces:
//! - Types: `PipelineBuilderContext`, `PipelineBuilder`.

use std::sync::Arc;

use super::fragment_context::FragmentContext;
use super::local_exchange_memory_manager::LocalExchangeMemoryManager;
use super::operator_factory::{OpFactories, OperatorFactory, source_degree_of_parallelism};
use super::pipeline::{Pipeline, PipelineRef};
use crate::exec::expr::ExprRef;
use crate::exec::node::ExecNode;
use crate::exec::operators::{
    ExchangeRouting, LocalExchangeSinkFactory, LocalExchangeSourceFactory, LocalExchanger,
    PartitionKind, PartitionSpec,
};
use crate::novarocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

const FIRST_PSEUDO_PLAN_NODE_ID: i32 = -100;

/// Mutable state threaded through `ExecNode::decompose_to_pipeline`.
///
/// Every `interpolate_*` call consumes the currently open operator sequence and
/// returns the sequence the caller keeps extending. When an exchange is needed
/// the input sequence is closed with an exchange sink and sealed as a pipeline.
pub struct PipelineBuilderContext {
    fragment_ctx: Arc<FragmentContext>,
    degree_of_parallelism: usize,
    runtime_state: Arc<RuntimeState>,
    next_operator_id: i32,
    next_pseudo_plan_node_id: i32,
    next_pipeline_id: u32,
    pipelines: Vec<PipelineRef>,
}

impl PipelineBuilderContext {
    pub fn new(fragment_ctx: Arc<FragmentContext>, degree_of_parallelism: usize) -> Self {
        let runtime_state = fragment_ctx.runtime_state();
        Self {
            fragment_ctx,
            degree_of_parallelism: degree_of_parallelism.max(1),
            runtime_state,
            next_operator_id: 0,
            next_pseudo_plan_node_id: FIRST_PSEUDO_PLAN_NODE_ID,
            next_pipeline_id: 0,
            pipelines: Vec::new(),
        }
    }

    pub fn fragment_context(&self) -> &Arc<FragmentContext> {
        &self.fragment_ctx
    }

    pub fn degree_of_parallelism(&self) -> usize {
        self.degree_of_parallelism
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeState> {
        &self.runtime_state
    }

    pub fn chunk_size(&self) -> usize {
        self.runtime_state.chunk_size()
    }

    pub fn next_operator_id(&mut self) -> i32 {
        let id = self.next_operator_id;
        self.next_operator_id += 1;
        id
    }

    /// Plan node ids for operators with no plan node of their own (exchanges).
    /// Negative and decreasing so they never collide with planner ids.
    pub fn next_pseudo_plan_node_id(&mut self) -> i32 {
        let id = self.next_pseudo_plan_node_id;
        self.next_pseudo_plan_node_id -= 1;
        id
    }

    /// Re-partitions `pred` onto `num_receivers` drivers without reordering any sender.
    pub fn interpolate_passthrough(&mut self, pred: OpFactories, num_receivers: usize) -> OpFactories {
        let pred_dop = checked_source_dop(&pred);
        assert!(num_receivers > 0, "num_receivers must be positive");
        if pred_dop == num_receivers {
            return pred;
        }
        let factor = num_receivers.max(pred_dop);
        self.interpolate_exchange(pred, ExchangeRouting::Passthrough, num_receivers, factor)
    }

    /// Copies every chunk of `pred` to each of `num_receivers` drivers.
    pub fn interpolate_broadcast(&mut self, pred: OpFactories, num_receivers: usize) -> OpFactories {
        checked_source_dop(&pred);
        assert!(num_receivers > 0, "num_receivers must be positive");
        if num_receivers == 1 {
            return self.interpolate_passthrough(pred, num_receivers);
        }
        let factor = num_receivers * num_receivers;
        self.interpolate_exchange(pred, ExchangeRouting::Broadcast, num_receivers, factor)
    }

    /// Hash-partitions `pred` on `partition_exprs` into `target_dop` drivers.
    pub fn interpolate_shuffle(
        &mut self,
        pred: OpFactories,
        partition_exprs: Vec<ExprRef>,
        partition_kind: PartitionKind,
        target_dop: usize,
    ) -> OpFactories {
        checked_source_dop(&pred);
        if target_dop <= 1 {
            return pred;
        }
        let routing = ExchangeRouting::Partition(PartitionSpec::new(partition_kind, partition_exprs));
        self.interpolate_exchange(pred, routing, target_dop, target_dop)
    }

    /// Merges several producer sequences into one, running at the context's degree of parallelism.
    pub fn gather(&mut self, mut pred_list: Vec<OpFactories>) -> OpFactories {
        assert!(!pred_list.is_empty(), "gather needs at least one input");
        if pred_list.len() == 1 {
            return pred_list.pop().unwrap_or_default();
        }
        let pred_dops = pred_list.iter().map(checked_source_dop).collect::<Vec<_>>();
        let total_producers: usize = pred_dops.iter().sum();
        let num_receivers = self.degree_of_parallelism;
        let exchanger = LocalExchanger::new(
            ExchangeRouting::Passthrough,
            num_receivers,
            total_producers,
            self.memory_manager(total_producers),
        );
        let pseudo_plan_node_id = self.next_pseudo_plan_node_id();
        debug!(
            "gather: inputs={} producers={} receivers={} exchange_id={}",
            pred_list.len(),
            total_producers,
            num_receivers,
            exchanger.exchange_id()
        );
        for mut pred in pred_list {
            let sink_id = self.next_operator_id();
            pred.push(Box::new(LocalExchangeSinkFactory::new(
                sink_id,
                pseudo_plan_node_id,
                Arc::clone(&exchanger),
            )));
            self.add_pipeline(pred);
        }
        let source_id = self.next_operator_id();
        vec![Box::new(LocalExchangeSourceFactory::new(
            source_id,
            pseudo_plan_node_id,
            num_receivers,
            exchanger,
        ))]
    }

    /// Seals `ops` as a pipeline of this fragment.
    pub fn add_pipeline(&mut self, ops: OpFactories) {
        let pipeline = Pipeline::new(self.next_pipeline_id, ops);
        self.next_pipeline_id += 1;
        debug!(
            "seal pipeline: pipeline_id={} dop={} operators={}",
            pipeline.id(),
            pipeline.degree_of_parallelism(),
            pipeline.describe()
        );
        self.pipelines.push(Arc::new(pipeline));
    }

    pub fn pipelines(&self) -> &[PipelineRef] {
        &self.pipelines
    }

    pub fn into_pipelines(self) -> Vec<PipelineRef> {
        self.pipelines
    }

    fn memory_manager(&self, factor: usize) -> Arc<LocalExchangeMemoryManager> {
        Arc::new(LocalExchangeMemoryManager::new(
            self.chunk_size().saturating_mul(factor),
            self.runtime_state
                .local_exchange_mem_limit_per_driver()
                .saturating_mul(factor),
        ))
    }

    fn interpolate_exchange(
        &mut self,
        mut pred: OpFactories,
        routing: ExchangeRouting,
        num_receivers: usize,
        factor: usize,
    ) -> OpFactories {
        let pred_dop = source_degree_of_parallelism(&pred);
        let exchanger = LocalExchanger::new(
            routing,
            num_receivers,
            pred_dop,
            self.memory_manager(factor),
        );
        let pseudo_plan_node_id = self.next_pseudo_plan_node_id();
        debug!(
            "interpolate local exchange: routing={} from_dop={} to_dop={} exchange_id={}",
            exchanger.routing().name(),
            pred_dop,
            num_receivers,
            exchanger.exchange_id()
        );
        let sink_id = self.next_operator_id();
        pred.push(Box::new(LocalExchangeSinkFactory::new(
            sink_id,
            pseudo_plan_node_id,
            Arc::clone(&exchanger),
        )));
        self.add_pipeline(pred);

        let source_id = self.next_operator_id();
        vec![Box::new(LocalExchangeSourceFactory::new(
            source_id,
            pseudo_plan_node_id,
            num_receivers,
            exchanger,
        ))]
    }
}

fn checked_source_dop(ops: &OpFactories) -> usize {
    assert!(!ops.is_empty(), "operator sequence must not be empty");
    source_degree_of_parallelism(ops)
}

/// Drives decomposition of a plan tree into the pipelines of one fragment.
pub struct PipelineBuilder {
    context: PipelineBuilderContext,
}

impl PipelineBuilder {
    pub fn new(context: PipelineBuilderContext) -> Self {
        Self { context }
    }

    pub fn context_mut(&mut self) -> &mut PipelineBuilderContext {
        &mut self.context
    }

    /// Decomposes `root`, terminates the open sequence with `sink`, and returns
    /// every sealed pipeline. Producers are sealed before their consumers.
    pub fn build(
        mut self,
        root: &dyn ExecNode,
        sink: Box<dyn OperatorFactory>,
    ) -> Result<Vec<PipelineRef>, String> {
        let mut ops = root.decompose_to_pipeline(&mut self.context)?;
        if ops.is_empty() {
            return Err(format!(
                "exec node {} (id={}) produced no operators",
                root.name(),
                root.id()
            ));
        }
        ops.push(sink);
        self.context.add_pipeline(ops);
        Ok(self.context.into_pipelines())
    }
}
