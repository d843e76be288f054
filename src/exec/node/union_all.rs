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
//! UNION ALL node.

use crate::exec::pipeline::builder::PipelineBuilderContext;
use crate::exec::pipeline::operator_factory::OpFactories;

use super::ExecNode;

/// Concatenates the rows of every child in no particular order.
pub struct UnionAllNode {
    pub inputs: Vec<Box<dyn ExecNode>>,
    pub node_id: i32,
}

impl ExecNode for UnionAllNode {
    fn id(&self) -> i32 {
        self.node_id
    }

    fn name(&self) -> &str {
        "UNION_ALL"
    }

    fn children(&self) -> Vec<&dyn ExecNode> {
        self.inputs.iter().map(|c| c.as_ref() as &dyn ExecNode).collect()
    }

    fn decompose_to_pipeline(&self, ctx: &mut PipelineBuilderContext) -> Result<OpFactories, String> {
        if self.inputs.is_empty() {
            return Err(format!("union all node {} has no inputs", self.node_id));
        }
        let mut pred_list = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            pred_list.push(input.decompose_to_pipeline(ctx)?);
        }
        Ok(ctx.gather(pred_list))
    }
}
