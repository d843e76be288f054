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
//! LIMIT / OFFSET node.

use crate::exec::operators::LimitProcessorFactory;
use crate::exec::pipeline::builder::PipelineBuilderContext;
use crate::exec::pipeline::operator_factory::OpFactories;

use super::ExecNode;

pub struct LimitNode {
    pub input: Box<dyn ExecNode>,
    pub node_id: i32,
    /// `None` keeps every row after `offset`.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ExecNode for LimitNode {
    fn id(&self) -> i32 {
        self.node_id
    }

    fn name(&self) -> &str {
        "LIMIT"
    }

    fn children(&self) -> Vec<&dyn ExecNode> {
        vec![self.input.as_ref()]
    }

    fn decompose_to_pipeline(&self, ctx: &mut PipelineBuilderContext) -> Result<OpFactories, String> {
        let ops = self.input.decompose_to_pipeline(ctx)?;
        // Offset and limit are global, so a single driver applies them.
        let mut ops = ctx.interpolate_passthrough(ops, 1);
        let id = ctx.next_operator_id();
        ops.push(Box::new(LimitProcessorFactory::new(
            id,
            self.node_id,
            self.limit,
            self.offset,
        )));
        Ok(ops)
    }
}
