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
//! Fragment preparation and submission.
//!
//! Responsibilities:
//! - Registers a fragment context, compiles the plan into pipelines and materializes drivers.
//! - Submits drivers to the executor; a fragment with no drivers completes immediately.
//!
//! Key exported interfaces:
//! - Types: `FragmentParams`, `FragmentExecutor`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::builder::{PipelineBuilder, PipelineBuilderContext};
use super::fragment_context::FragmentContext;
use super::global_driver_executor::DriverTask;
use super::scan::morsel::{FixedMorselQueue, MorselQueueMap, MorselQueueRef, ScanMorsel};
use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::exec::node::ExecNode;
use crate::exec::operators::ResultSinkFactory;
use crate::novarocks_logging::{debug, info, warn};
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::result_buffer::ResultBuffer;
use crate::runtime::runtime_state::RuntimeState;

/// Plan node id given to the result sink terminating the root pipeline.
const RESULT_SINK_PLAN_NODE_ID: i32 = -1;

/// Everything needed to run one fragment instance.
pub struct FragmentParams {
    pub query_id: UniqueId,
    pub fragment_instance_id: UniqueId,
    pub plan: Box<dyn ExecNode>,
    /// Scan splits per scan plan node id.
    pub scan_ranges: HashMap<i32, Vec<ScanMorsel>>,
    pub result_buffer: Arc<ResultBuffer>,
    /// 0 uses the environment's default dop.
    pub pipeline_dop: usize,
}

pub struct FragmentExecutor;

impl FragmentExecutor {
    /// Builds the fragment and leaves it registered with drivers attached but not running.
    pub fn prepare(env: &ExecEnv, params: FragmentParams) -> Result<Arc<FragmentContext>, String> {
        let FragmentParams {
            query_id,
            fragment_instance_id,
            plan,
            scan_ranges,
            result_buffer,
            pipeline_dop,
        } = params;

        let ctx = env.fragment_mgr().get_or_register(fragment_instance_id);
        if ctx.query_id().is_some() {
            return Err(format!(
                "fragment {fragment_instance_id} is already prepared"
            ));
        }
        match Self::prepare_context(env, &ctx, query_id, plan, scan_ranges, result_buffer, pipeline_dop) {
            Ok(()) => Ok(ctx),
            Err(err) => {
                warn!(
                    "prepare fragment failed: fragment_instance_id={} error={}",
                    fragment_instance_id, err
                );
                ctx.cancel(Status::internal_error(err.clone()));
                env.fragment_mgr().unregister(fragment_instance_id);
                Err(err)
            }
        }
    }

    fn prepare_context(
        env: &ExecEnv,
        ctx: &Arc<FragmentContext>,
        query_id: UniqueId,
        plan: Box<dyn ExecNode>,
        scan_ranges: HashMap<i32, Vec<ScanMorsel>>,
        result_buffer: Arc<ResultBuffer>,
        pipeline_dop: usize,
    ) -> Result<(), String> {
        let fragment_instance_id = ctx.fragment_instance_id();
        ctx.set_query_id(query_id)?;
        let runtime_state = Arc::new(RuntimeState::new(
            query_id,
            fragment_instance_id,
            env.options(),
        ));
        ctx.set_runtime_state(Arc::clone(&runtime_state))?;

        let morsel_queues: MorselQueueMap = scan_ranges
            .into_iter()
            .map(|(node_id, morsels)| (node_id, FixedMorselQueue::new(morsels) as MorselQueueRef))
            .collect();
        ctx.set_morsel_queues(morsel_queues)?;
        // Attached before building so it is closed even if decomposition fails.
        ctx.set_plan(plan)?;
        let Some(plan) = ctx.plan() else {
            return Err(format!("plan of fragment {fragment_instance_id} is missing"));
        };

        let dop = env.options().calc_pipeline_dop(pipeline_dop);
        let mut builder = PipelineBuilder::new(PipelineBuilderContext::new(Arc::clone(ctx), dop));
        let sink_id = builder.context_mut().next_operator_id();
        let sink = Box::new(ResultSinkFactory::new(
            sink_id,
            RESULT_SINK_PLAN_NODE_ID,
            result_buffer,
        ));
        let pipelines = builder.build(plan, sink)?;
        ctx.set_pipelines(pipelines.clone());
        ctx.prepare_all_pipelines()?;

        let mut drivers = pipelines
            .iter()
            .flat_map(|pipeline| pipeline.instantiate_drivers(&runtime_state))
            .collect::<Vec<_>>();
        if let Err(err) = drivers.iter_mut().try_for_each(|driver| driver.prepare()) {
            for driver in &mut drivers {
                // Close failures are already logged per operator.
                let _ = driver.close();
            }
            return Err(err);
        }
        let drivers = drivers
            .into_iter()
            .map(|driver| Arc::new(Mutex::new(driver)))
            .collect::<Vec<_>>();
        info!(
            "fragment prepared: query_id={} fragment_instance_id={} dop={} pipelines={} drivers={}",
            query_id,
            fragment_instance_id,
            dop,
            pipelines.len(),
            drivers.len()
        );
        ctx.set_drivers(drivers);
        Ok(())
    }

    /// Starts every driver of a prepared fragment.
    pub fn execute(env: &ExecEnv, ctx: &Arc<FragmentContext>) -> Result<(), String> {
        let drivers = ctx.drivers();
        let fragment_instance_id = ctx.fragment_instance_id();
        if drivers.is_empty() {
            debug!("fragment has no drivers, finishing: fragment_instance_id={fragment_instance_id}");
            ctx.set_final_status(Status::Ok);
            env.fragment_mgr().unregister(fragment_instance_id);
            return Ok(());
        }
        let tasks = drivers
            .into_iter()
            .map(|driver| DriverTask::new(Arc::clone(ctx), driver))
            .collect();
        env.driver_executor().submit(tasks).inspect_err(|err| {
            ctx.cancel(Status::internal_error(err.clone()));
            env.fragment_mgr().unregister(fragment_instance_id);
        })
    }
}
