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
//! Physical plan nodes.
//!
//! Responsibilities:
//! - Defines the plan-tree contract the pipeline builder walks.
//! - Each node decomposes itself into operator factories, asking the builder
//!   context for local exchanges where its parallelism differs from its input's.
//!
//! Key exported interfaces:
//! - Types: `ExecNode`, `ScanNode`, `LimitNode`, `UnionAllNode`, `DistinctNode`.

pub mod distinct;
pub mod limit;
pub mod scan;
pub mod union_all;

pub use distinct::DistinctNode;
pub use limit::LimitNode;
pub use scan::ScanNode;
pub use union_all::UnionAllNode;

use crate::exec::pipeline::builder::PipelineBuilderContext;
use crate::exec::pipeline::operator_factory::OpFactories;
use crate::runtime::runtime_state::RuntimeState;

/// One node of the physical plan tree handed over by the planner.
pub trait ExecNode: Send + Sync {
    fn id(&self) -> i32;

    fn name(&self) -> &str;

    fn children(&self) -> Vec<&dyn ExecNode> {
        Vec::new()
    }

    /// Appends this node's operators to the sequences produced by its children.
    ///
    /// The returned sequence starts with a source and is still open: the
    /// caller either extends it or terminates it with a sink.
    fn decompose_to_pipeline(&self, ctx: &mut PipelineBuilderContext) -> Result<OpFactories, String>;

    /// Releases plan-level resources once every pipeline of the fragment is closed.
    fn close(&self, state: &RuntimeState) {
        for child in self.children() {
            child.close(state);
        }
    }
}
