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
//! Global driver executor and worker pool.
//!
//! Responsibilities:
//! - Multiplexes driver tasks of every fragment over a fixed set of worker threads.
//! - Parks blocked drivers on the poller and finalizes a fragment when its last driver ends.
//!
//! Key exported interfaces:
//! - Types: `DriverTask`, `GlobalDriverExecutor`.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use super::blocked_driver_poller::BlockedDriverPoller;
use super::driver::{DriverRef, DriverState};
use super::fragment_context::FragmentContext;
use super::fragment_context_manager::FragmentContextManager;
use crate::common::status::Status;
use crate::novarocks_logging::{debug, info, warn};

/// Schedulable unit: one driver plus the fragment it belongs to.
pub struct DriverTask {
    ctx: Arc<FragmentContext>,
    driver: DriverRef,
}

impl DriverTask {
    pub fn new(ctx: Arc<FragmentContext>, driver: DriverRef) -> Self {
        Self { ctx, driver }
    }

    pub fn fragment_ctx(&self) -> &Arc<FragmentContext> {
        &self.ctx
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_ready()
    }
}

/// Shared executor internals used by worker threads and the blocked-driver poller.
pub(crate) struct ExecutorShared {
    queue: Mutex<VecDeque<DriverTask>>,
    cv: Condvar,
    shutdown: AtomicBool,
    fragment_mgr: Arc<FragmentContextManager>,
    time_slice: Duration,
}

impl ExecutorShared {
    pub(crate) fn new(fragment_mgr: Arc<FragmentContextManager>, time_slice: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            fragment_mgr,
            time_slice,
        }
    }

    pub(crate) fn enqueue(&self, tasks: Vec<DriverTask>) {
        let mut queue = self.queue.lock().expect("global executor queue lock");
        queue.extend(tasks);
        self.cv.notify_all();
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.lock().expect("global executor queue lock").len()
    }
}

/// Executor that runs pipeline drivers across worker threads.
pub struct GlobalDriverExecutor {
    shared: Arc<ExecutorShared>,
    poller: BlockedDriverPoller,
    num_threads: usize,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl GlobalDriverExecutor {
    pub fn new(
        num_threads: usize,
        time_slice: Duration,
        poll_interval: Duration,
        fragment_mgr: Arc<FragmentContextManager>,
    ) -> Result<Self, String> {
        let num_threads = num_threads.max(1);
        let shared = Arc::new(ExecutorShared::new(fragment_mgr, time_slice));
        let poller = BlockedDriverPoller::new(Arc::clone(&shared), poll_interval);

        let mut threads = Vec::with_capacity(num_threads + 1);
        threads.push(poller.start()?);
        let executor = Self {
            shared: Arc::clone(&shared),
            poller: poller.clone(),
            num_threads,
            threads: Mutex::new(Vec::new()),
        };
        for i in 0..num_threads {
            let shared_cloned = Arc::clone(&shared);
            let poller_cloned = poller.clone();
            let spawned = thread::Builder::new()
                .name(format!("pipeline_exec_{i}"))
                .spawn(move || worker_loop(shared_cloned, poller_cloned));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    *executor.threads.lock().expect("global executor threads lock") = threads;
                    executor.shutdown();
                    return Err(format!("spawn pipeline worker {i} failed: {e}"));
                }
            }
        }
        *executor.threads.lock().expect("global executor threads lock") = threads;
        info!(
            "GlobalDriverExecutor started: threads={} time_slice={:?}",
            num_threads, time_slice
        );
        Ok(executor)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn submit(&self, tasks: Vec<DriverTask>) -> Result<(), String> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut queue = self
            .shared
            .queue
            .lock()
            .expect("global executor queue lock");
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err("driver executor is shut down".to_string());
        }
        for task in tasks {
            {
                let driver = task.driver.lock().unwrap_or_else(|e| e.into_inner());
                debug!(
                    "submit driver: fragment_instance_id={} pipeline_id={} driver_sequence={} source={} sink={}",
                    task.ctx.fragment_instance_id(),
                    driver.pipeline_id(),
                    driver.driver_sequence(),
                    driver.source_name(),
                    driver.sink_name()
                );
            }
            queue.push_back(task);
        }
        self.shared.cv.notify_all();
        Ok(())
    }

    /// Stops accepting work and joins every thread. Drivers still queued are
    /// run until they observe their fragment's cancel flag.
    pub fn shutdown(&self) {
        let parked = self.poller.shutdown();
        {
            let mut queue = self
                .shared
                .queue
                .lock()
                .expect("global executor queue lock");
            for task in parked {
                task.ctx.cancel(Status::cancelled("driver executor shut down"));
                queue.push_back(task);
            }
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.cv.notify_all();

        let threads = std::mem::take(&mut *self.threads.lock().expect("global executor threads lock"));
        if threads.is_empty() {
            return;
        }
        for handle in threads {
            if handle.join().is_err() {
                warn!("pipeline worker thread panicked during shutdown");
            }
        }
        info!("GlobalDriverExecutor stopped");
    }
}

impl Drop for GlobalDriverExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<ExecutorShared>, poller: BlockedDriverPoller) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("global executor queue lock");
            while queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
                queue = shared
                    .cv
                    .wait(queue)
                    .expect("global executor queue condvar wait");
            }
            queue.pop_front()
        };
        // Queue is empty only once shut down.
        let Some(task) = task else {
            return;
        };
        run_task(&shared, &poller, task);
    }
}

fn run_task(shared: &ExecutorShared, poller: &BlockedDriverPoller, task: DriverTask) {
    let state = {
        let mut driver = task.driver.lock().unwrap_or_else(|e| e.into_inner());
        catch_unwind(AssertUnwindSafe(|| {
            driver.process(&task.ctx, shared.time_slice)
        }))
        .unwrap_or_else(|payload| {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            DriverState::Failed(format!("panic in driver execution: {msg}"))
        })
    };

    match state {
        DriverState::Ready => shared.enqueue(vec![task]),
        DriverState::Blocked(_) => {
            if let Err(task) = poller.add_blocked(task) {
                task.ctx
                    .cancel(Status::cancelled("driver executor shut down"));
                shared.enqueue(vec![task]);
            }
        }
        DriverState::Finished | DriverState::Cancelled | DriverState::Failed(_) => {
            finish_driver(shared, task, state)
        }
    }
}

fn finish_driver(shared: &ExecutorShared, task: DriverTask, state: DriverState) {
    {
        let mut driver = task.driver.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = driver.close() {
            warn!(
                "close driver failed: fragment_instance_id={} pipeline_id={} driver_sequence={} error={}",
                task.ctx.fragment_instance_id(),
                driver.pipeline_id(),
                driver.driver_sequence(),
                err
            );
        }
    }
    if let DriverState::Failed(err) = state {
        task.ctx.cancel(Status::internal_error(err));
    }
    if task.ctx.count_down_drivers() {
        finalize_fragment(shared, &task.ctx);
    }
}

fn finalize_fragment(shared: &ExecutorShared, ctx: &FragmentContext) {
    ctx.set_final_status(Status::Ok);
    let id = ctx.fragment_instance_id();
    let status = ctx.final_status().unwrap_or_default();
    info!("fragment finished: fragment_instance_id={id} status={status}");
    shared.fragment_mgr.unregister(id);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use arrow::array::{ArrayRef, Int32Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::{DriverTask, GlobalDriverExecutor};
    use crate::common::status::Status;
    use crate::common::types::UniqueId;
    use crate::exec::chunk::Chunk;
    use crate::exec::operators::{ResultSinkFactory, ScanSourceFactory};
    use crate::exec::pipeline::fragment_context_manager::FragmentContextManager;
    use crate::exec::pipeline::pipeline::Pipeline;
    use crate::exec::pipeline::scan::morsel::{FixedMorselQueue, ScanMorsel};
    use crate::runtime::result_buffer::ResultBuffer;

    fn chunk_of(values: &[i32]) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let array = Arc::new(Int32Array::from(values.to_vec())) as ArrayRef;
        Chunk::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"))
    }

    fn executor(mgr: &Arc<FragmentContextManager>) -> GlobalDriverExecutor {
        GlobalDriverExecutor::new(
            2,
            Duration::from_millis(20),
            Duration::from_millis(1),
            Arc::clone(mgr),
        )
        .expect("start executor")
    }

    #[test]
    fn last_driver_finalizes_and_unregisters_fragment() {
        let mgr = Arc::new(FragmentContextManager::new());
        let executor = executor(&mgr);
        let id = UniqueId::new(11, 1);
        let ctx = mgr.get_or_register(id);

        let morsels = (0..4)
            .map(|i| ScanMorsel::new(i, vec![chunk_of(&[i, i + 10])]))
            .collect();
        let buffer = Arc::new(ResultBuffer::new());
        let pipeline = Arc::new(Pipeline::new(
            0,
            vec![
                Box::new(ScanSourceFactory::new(0, 1, 3, FixedMorselQueue::new(morsels))),
                Box::new(ResultSinkFactory::new(1, 2, Arc::clone(&buffer))),
            ],
        ));
        let drivers = pipeline
            .instantiate_drivers(&ctx.runtime_state())
            .into_iter()
            .map(|d| Arc::new(Mutex::new(d)))
            .collect::<Vec<_>>();
        ctx.set_pipelines(vec![pipeline]);
        ctx.set_drivers(drivers.clone());
        let signal = ctx.finish_signal();

        executor
            .submit(
                drivers
                    .into_iter()
                    .map(|d| DriverTask::new(Arc::clone(&ctx), d))
                    .collect(),
            )
            .expect("submit");

        assert!(signal.wait_timeout(Duration::from_secs(10)));
        assert_eq!(ctx.final_status(), Some(Status::Ok));
        assert_eq!(ctx.num_running_drivers(), 0);
        assert!(mgr.get(id).is_none());
        assert_eq!(buffer.num_rows(), 8);
        assert_eq!(buffer.num_closed_senders(), 3);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let mgr = Arc::new(FragmentContextManager::new());
        let executor = executor(&mgr);
        executor.shutdown();
        executor.shutdown();

        let ctx = mgr.get_or_register(UniqueId::new(11, 2));
        let pipeline = Pipeline::new(
            0,
            vec![
                Box::new(ScanSourceFactory::new(0, 1, 1, FixedMorselQueue::new(Vec::new()))),
                Box::new(ResultSinkFactory::new(1, 2, Arc::new(ResultBuffer::new()))),
            ],
        );
        let driver = pipeline
            .instantiate_drivers(&ctx.runtime_state())
            .pop()
            .expect("one driver");
        let err = executor
            .submit(vec![DriverTask::new(ctx, Arc::new(Mutex::new(driver)))])
            .expect_err("rejected");
        assert!(err.contains("shut down"));
    }
}
