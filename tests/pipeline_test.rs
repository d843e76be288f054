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
//! End-to-end tests: plan trees compiled into pipelines and run on an `ExecEnv`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::{
    TestConfig, kv_morsels, scan_ranges, sorted_column, test_env, test_query_id,
    unique_fragment_id,
};
use novarocks_pipeline::common::status::Status;
use novarocks_pipeline::exec::expr::ColumnRef;
use novarocks_pipeline::exec::node::{DistinctNode, ExecNode, LimitNode, ScanNode, UnionAllNode};
use novarocks_pipeline::exec::operators::{PartitionKind, ResultSinkFactory, ScanSourceFactory};
use novarocks_pipeline::exec::pipeline::fragment_executor::{FragmentExecutor, FragmentParams};
use novarocks_pipeline::exec::pipeline::pipeline::Pipeline;
use novarocks_pipeline::exec::pipeline::scan::morsel::{DynamicMorselQueue, ScanMorsel};
use novarocks_pipeline::runtime::exec_env::{ExecEnv, RuntimeOptions};
use novarocks_pipeline::runtime::result_buffer::ResultBuffer;
use novarocks_pipeline::runtime::runtime_state::RuntimeState;

mod common;

const WAIT: Duration = Duration::from_secs(20);

fn params(
    test_name: &str,
    plan: Box<dyn ExecNode>,
    ranges: Vec<(i32, Vec<ScanMorsel>)>,
    dop: usize,
) -> (FragmentParams, Arc<ResultBuffer>) {
    let buffer = Arc::new(ResultBuffer::new());
    let params = FragmentParams {
        query_id: test_query_id(),
        fragment_instance_id: unique_fragment_id(test_name),
        plan,
        scan_ranges: scan_ranges(ranges),
        result_buffer: Arc::clone(&buffer),
        pipeline_dop: dop,
    };
    (params, buffer)
}

#[test]
fn test_scan_limit_gathers_to_one_driver() {
    let env = test_env();
    let plan = Box::new(LimitNode {
        input: Box::new(ScanNode::new(1)),
        node_id: 2,
        limit: Some(5),
        offset: 2,
    });
    let (params, buffer) = params("scan_limit", plan, vec![(1, kv_morsels(8, 3, 100))], 4);
    let id = params.fragment_instance_id;

    let ctx = FragmentExecutor::prepare(&env, params).expect("prepare");
    let pipelines = ctx.pipelines();
    assert_eq!(pipelines.len(), 2);
    assert_eq!(pipelines[0].degree_of_parallelism(), 4);
    assert_eq!(pipelines[1].degree_of_parallelism(), 1);
    assert_eq!(ctx.num_drivers(), 5);

    let signal = ctx.finish_signal();
    FragmentExecutor::execute(&env, &ctx).expect("execute");
    assert!(signal.wait_timeout(WAIT));

    assert_eq!(ctx.final_status(), Some(Status::Ok));
    assert_eq!(buffer.num_rows(), 5);
    assert!(env.fragment_mgr().get(id).is_none());
}

#[test]
fn test_union_all_collects_every_child() {
    let env = test_env();
    let plan = Box::new(UnionAllNode {
        inputs: vec![Box::new(ScanNode::new(1)), Box::new(ScanNode::new(2))],
        node_id: 3,
    });
    let (params, buffer) = params(
        "union_all",
        plan,
        vec![(1, kv_morsels(5, 4, 7)), (2, kv_morsels(3, 2, 7))],
        2,
    );

    let ctx = FragmentExecutor::prepare(&env, params).expect("prepare");
    // Two scan pipelines feeding one shared exchange, plus the result pipeline.
    assert_eq!(ctx.pipelines().len(), 3);

    let signal = ctx.finish_signal();
    FragmentExecutor::execute(&env, &ctx).expect("execute");
    assert!(signal.wait_timeout(WAIT));

    assert_eq!(ctx.final_status(), Some(Status::Ok));
    assert_eq!(buffer.num_rows(), 5 * 4 + 3 * 2);
}

#[test]
fn test_distinct_shuffles_equal_keys_to_one_driver() {
    let env = test_env();
    let plan = Box::new(DistinctNode {
        input: Box::new(ScanNode::new(1)),
        node_id: 2,
        key_exprs: vec![ColumnRef::new_ref(0)],
        partition_kind: PartitionKind::Hash,
    });
    let (params, buffer) = params("distinct", plan, vec![(1, kv_morsels(16, 10, 13))], 4);

    let ctx = FragmentExecutor::prepare(&env, params).expect("prepare");
    let signal = ctx.finish_signal();
    FragmentExecutor::execute(&env, &ctx).expect("execute");
    assert!(signal.wait_timeout(WAIT));

    assert_eq!(ctx.final_status(), Some(Status::Ok));
    assert_eq!(sorted_column(&buffer, 0), (0..13).collect::<Vec<i64>>());
}

#[test]
fn test_cancelled_fragment_latches_cancel_status() {
    let env = test_env();
    let plan = Box::new(ScanNode::new(1));
    let (params, buffer) = params("cancel", plan, vec![(1, kv_morsels(4, 4, 4))], 2);

    let ctx = FragmentExecutor::prepare(&env, params).expect("prepare");
    ctx.cancel(Status::cancelled("user cancel"));
    ctx.cancel(Status::internal_error("late failure"));
    assert!(ctx.is_cancelled());

    let signal = ctx.finish_signal();
    FragmentExecutor::execute(&env, &ctx).expect("execute");
    assert!(signal.wait_timeout(WAIT));

    assert_eq!(ctx.final_status(), Some(Status::cancelled("user cancel")));
    assert_eq!(ctx.num_running_drivers(), 0);
    assert_eq!(buffer.num_rows(), 0);
}

#[test]
fn test_fragment_without_drivers_finishes_immediately() {
    let env = test_env();
    let id = unique_fragment_id("no_drivers");
    let ctx = env.fragment_mgr().get_or_register(id);
    let signal = ctx.finish_signal();

    FragmentExecutor::execute(&env, &ctx).expect("execute");

    assert!(signal.is_released());
    assert_eq!(ctx.final_status(), Some(Status::Ok));
    assert!(env.fragment_mgr().get(id).is_none());
}

#[test]
fn test_prepare_fails_without_scan_ranges() {
    let env = test_env();
    let (params, _buffer) = params("missing_ranges", Box::new(ScanNode::new(9)), Vec::new(), 2);
    let id = params.fragment_instance_id;

    let err = FragmentExecutor::prepare(&env, params)
        .err()
        .expect("prepare must fail");
    assert!(err.contains("no morsel queue"), "{err}");
    assert!(env.fragment_mgr().get(id).is_none());
}

#[test]
fn test_duplicate_prepare_is_rejected() {
    let env = test_env();
    let (first, _) = params("duplicate", Box::new(ScanNode::new(1)), vec![(1, kv_morsels(1, 1, 1))], 1);
    let (second, _) = params("duplicate", Box::new(ScanNode::new(1)), vec![(1, kv_morsels(1, 1, 1))], 1);

    let ctx = FragmentExecutor::prepare(&env, first).expect("prepare");
    assert!(FragmentExecutor::prepare(&env, second).is_err());
    let registered = env
        .fragment_mgr()
        .get(ctx.fragment_instance_id())
        .expect("still registered");
    assert!(Arc::ptr_eq(&registered, &ctx));
}

#[test]
fn test_shutdown_cancels_running_fragments() {
    let env = test_env();
    let id = unique_fragment_id("shutdown");
    let ctx = env.fragment_mgr().get_or_register(id);

    env.shutdown();

    assert!(ctx.is_cancelled());
    assert!(ctx.final_status().is_some_and(|s| s.is_cancelled()));
}

#[test]
fn test_shutdown_finalizes_parked_drivers() {
    let env = test_env();
    let id = unique_fragment_id("shutdown_parked");
    let ctx = env.fragment_mgr().get_or_register(id);
    ctx.set_runtime_state(Arc::new(RuntimeState::new(
        test_query_id(),
        id,
        env.options(),
    )))
    .expect("runtime state");

    // Sources wait on a queue that may still grow, so every driver parks.
    let queue = DynamicMorselQueue::new(Vec::new(), true);
    let buffer = Arc::new(ResultBuffer::new());
    let pipeline = Arc::new(Pipeline::new(
        0,
        vec![
            Box::new(ScanSourceFactory::new(0, 1, 3, queue)),
            Box::new(ResultSinkFactory::new(1, -1, Arc::clone(&buffer))),
        ],
    ));
    let drivers = pipeline
        .instantiate_drivers(&ctx.runtime_state())
        .into_iter()
        .map(|mut driver| {
            driver.prepare().expect("prepare driver");
            Arc::new(Mutex::new(driver))
        })
        .collect::<Vec<_>>();
    ctx.set_pipelines(vec![pipeline]);
    ctx.set_drivers(drivers);
    let signal = ctx.finish_signal();

    FragmentExecutor::execute(&env, &ctx).expect("execute");
    std::thread::sleep(Duration::from_millis(100));
    assert!(!signal.is_released());
    assert_eq!(ctx.num_running_drivers(), 3);

    env.shutdown();

    assert!(signal.wait_timeout(WAIT));
    assert!(ctx.final_status().is_some_and(|s| s.is_cancelled()));
    assert_eq!(ctx.num_running_drivers(), 0);
    assert!(env.fragment_mgr().get(id).is_none());
    assert_eq!(buffer.num_rows(), 0);
}

#[test]
fn test_options_from_config_file() {
    let test_config = TestConfig::new().expect("test config");
    test_config.init_logging();
    let cfg = test_config.load_config().expect("load config");

    let options = RuntimeOptions::from_config(&cfg.runtime);
    assert_eq!(options.chunk_size, 16);
    assert_eq!(options.pipeline_dop, 4);
    assert_eq!(options.exec_threads, 4);
    assert_eq!(options.calc_pipeline_dop(0), 4);
    assert_eq!(options.driver_time_slice, Duration::from_millis(20));

    // Once the file is loaded, the process-wide accessors read the same values.
    assert_eq!(RuntimeOptions::from_global_config(), options);
    let env = ExecEnv::new(RuntimeOptions::from_global_config()).expect("exec env");
    assert_eq!(env.driver_executor().num_threads(), 4);
}
