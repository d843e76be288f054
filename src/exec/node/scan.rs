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
//! Scan leaf node.

use crate::exec::operators::ScanSourceFactory;
use crate::exec::pipeline::builder::PipelineBuilderContext;
use crate::exec::pipeline::operator_factory::OpFactories;

use super::ExecNode;

/// Leaf reading the morsels registered for `node_id` in the fragment context.
pub struct ScanNode {
    pub node_id: i32,
}

impl ScanNode {
    pub fn new(node_id: i32) -> Self {
        Self { node_id }
    }
}

impl ExecNode for ScanNode {
    fn id(&self) -> i32 {
        self.node_id
    }

    fn name(&self) -> &str {
        "SCAN"
    }

    fn decompose_to_pipeline(&self, ctx: &mut PipelineBuilderContext) -> Result<OpFactories, String> {
        let morsel_queue = ctx
            .fragment_context()
            .morsel_queue(self.node_id)
            .ok_or_else(|| format!("no morsel queue registered for scan node {}", self.node_id))?;
        let dop = ctx.degree_of_parallelism();
        let id = ctx.next_operator_id();
        Ok(vec![Box::new(ScanSourceFactory::new(
            id,
            self.node_id,
            dop,
            morsel_queue,
        ))])
    }
}
