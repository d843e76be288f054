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
//! Streaming DISTINCT node.

use crate::exec::expr::ExprRef;
use crate::exec::operators::{DistinctProcessorFactory, PartitionKind};
use crate::exec::pipeline::builder::PipelineBuilderContext;
use crate::exec::pipeline::operator_factory::OpFactories;

use super::ExecNode;

/// Emits the first row seen for every distinct value of `key_exprs`.
pub struct DistinctNode {
    pub input: Box<dyn ExecNode>,
    pub node_id: i32,
    pub key_exprs: Vec<ExprRef>,
    pub partition_kind: PartitionKind,
}

impl ExecNode for DistinctNode {
    fn id(&self) -> i32 {
        self.node_id
    }

    fn name(&self) -> &str {
        "DISTINCT"
    }

    fn children(&self) -> Vec<&dyn ExecNode> {
        vec![self.input.as_ref()]
    }

    fn decompose_to_pipeline(&self, ctx: &mut PipelineBuilderContext) -> Result<OpFactories, String> {
        let ops = self.input.decompose_to_pipeline(ctx)?;
        let dop = ctx.degree_of_parallelism();
        // Each driver dedups locally, so equal keys must share a driver.
        let mut ops = if dop > 1 {
            ctx.interpolate_shuffle(ops, self.key_exprs.clone(), self.partition_kind, dop)
        } else {
            ctx.interpolate_passthrough(ops, 1)
        };
        let id = ctx.next_operator_id();
        ops.push(Box::new(DistinctProcessorFactory::new(
            id,
            self.node_id,
            self.key_exprs.clone(),
        )));
        Ok(ops)
    }
}
