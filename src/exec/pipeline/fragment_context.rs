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
//! Fragment-level pipeline runtime context.
//!
//! Responsibilities:
//! - Holds the pipelines, drivers, morsel queues and plan of one fragment instance.
//! - Tracks driver completion, cancellation and the fragment's final status.
//! - Tears the fragment down in dependency order when the last reference drops.
//!
//! Key exported interfaces:
//! - Types: `FragmentContext`, `FinishSignal`.
//!
//! Concurrency: the pipeline, driver and morsel-queue sets are written during
//! the single-threaded prepare phase and only read afterwards. Running drivers
//! touch three fields concurrently: the driver counter, the cancel flag and the
//! status latch, each decided by a single atomic operation.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, RwLock};
use std::time::Duration;

use super::driver::DriverRef;
use super::pipeline::PipelineRef;
use super::scan::morsel::{MorselQueueMap, MorselQueueRef};
use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::exec::node::ExecNode;
use crate::novarocks_logging::{debug, warn};
use crate::runtime::runtime_filter_hub::RuntimeFilterHub;
use crate::runtime::runtime_state::RuntimeState;

/// One-shot completion signal released when a fragment is unregistered.
#[derive(Debug, Default)]
pub struct FinishSignal {
    released: Mutex<bool>,
    cv: Condvar,
}

impl FinishSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.released.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Releases every current and future waiter. Returns true for the first call only.
    pub fn release(&self) -> bool {
        let mut released = self.lock();
        if *released {
            return false;
        }
        *released = true;
        self.cv.notify_all();
        true
    }

    pub fn is_released(&self) -> bool {
        *self.lock()
    }

    pub fn wait(&self) {
        let mut released = self.lock();
        while !*released {
            released = self.cv.wait(released).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Waits up to `timeout`; returns whether the signal was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (released, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |released| !*released)
            .unwrap_or_else(|e| e.into_inner());
        *released
    }
}

/// Fragment-scoped runtime context shared across drivers, the executor and the manager.
pub struct FragmentContext {
    fragment_instance_id: UniqueId,
    query_id: OnceLock<UniqueId>,
    runtime_state: OnceLock<Arc<RuntimeState>>,
    plan: OnceLock<Box<dyn ExecNode>>,
    morsel_queues: OnceLock<MorselQueueMap>,
    pipelines: RwLock<Vec<PipelineRef>>,
    drivers: RwLock<Vec<DriverRef>>,
    runtime_filter_hub: RuntimeFilterHub,
    num_running_drivers: AtomicUsize,
    cancel_flag: AtomicBool,
    // Null until a status wins. Published statuses stay allocated until drop.
    final_status: AtomicPtr<Status>,
    // Statuses cleared by `set_drivers`, freed on drop.
    retired_statuses: Mutex<Vec<AtomicPtr<Status>>>,
    finish_signal: Arc<FinishSignal>,
}

impl FragmentContext {
    pub fn new(fragment_instance_id: UniqueId) -> Self {
        Self {
            fragment_instance_id,
            query_id: OnceLock::new(),
            runtime_state: OnceLock::new(),
            plan: OnceLock::new(),
            morsel_queues: OnceLock::new(),
            pipelines: RwLock::new(Vec::new()),
            drivers: RwLock::new(Vec::new()),
            runtime_filter_hub: RuntimeFilterHub::new(),
            num_running_drivers: AtomicUsize::new(0),
            cancel_flag: AtomicBool::new(false),
            final_status: AtomicPtr::new(ptr::null_mut()),
            retired_statuses: Mutex::new(Vec::new()),
            finish_signal: Arc::new(FinishSignal::new()),
        }
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn query_id(&self) -> Option<UniqueId> {
        self.query_id.get().copied()
    }

    pub fn set_query_id(&self, query_id: UniqueId) -> Result<(), String> {
        self.query_id
            .set(query_id)
            .map_err(|_| format!("query id of fragment {} already set", self.fragment_instance_id))
    }

    /// The fragment's runtime state, or defaults before preparation attached one.
    pub fn runtime_state(&self) -> Arc<RuntimeState> {
        match self.runtime_state.get() {
            Some(state) => Arc::clone(state),
            None => Arc::new(RuntimeState::default()),
        }
    }

    pub fn set_runtime_state(&self, state: Arc<RuntimeState>) -> Result<(), String> {
        self.runtime_state.set(state).map_err(|_| {
            format!(
                "runtime state of fragment {} already set",
                self.fragment_instance_id
            )
        })
    }

    pub fn set_plan(&self, plan: Box<dyn ExecNode>) -> Result<(), String> {
        self.plan
            .set(plan)
            .map_err(|_| format!("plan of fragment {} already set", self.fragment_instance_id))
    }

    pub fn plan(&self) -> Option<&dyn ExecNode> {
        self.plan.get().map(|p| p.as_ref())
    }

    pub fn set_morsel_queues(&self, queues: MorselQueueMap) -> Result<(), String> {
        self.morsel_queues.set(queues).map_err(|_| {
            format!(
                "morsel queues of fragment {} already set",
                self.fragment_instance_id
            )
        })
    }

    pub fn morsel_queue(&self, plan_node_id: i32) -> Option<MorselQueueRef> {
        self.morsel_queues.get()?.get(&plan_node_id).cloned()
    }

    pub fn runtime_filter_hub(&self) -> &RuntimeFilterHub {
        &self.runtime_filter_hub
    }

    pub fn set_pipelines(&self, pipelines: Vec<PipelineRef>) {
        *self.pipelines.write().expect("fragment pipelines lock") = pipelines;
    }

    pub fn pipelines(&self) -> Vec<PipelineRef> {
        self.pipelines.read().expect("fragment pipelines lock").clone()
    }

    /// Attaches the driver set, resets the completion counter to its size and
    /// clears any final status left from an earlier attempt.
    pub fn set_drivers(&self, drivers: Vec<DriverRef>) {
        let num_drivers = drivers.len();
        *self.drivers.write().expect("fragment drivers lock") = drivers;
        self.num_running_drivers.store(num_drivers, Ordering::Release);
        let previous = self.final_status.swap(ptr::null_mut(), Ordering::AcqRel);
        if !previous.is_null() {
            self.retired_statuses
                .lock()
                .expect("fragment retired statuses lock")
                .push(AtomicPtr::new(previous));
        }
    }

    pub fn drivers(&self) -> Vec<DriverRef> {
        self.drivers.read().expect("fragment drivers lock").clone()
    }

    pub fn num_drivers(&self) -> usize {
        self.drivers.read().expect("fragment drivers lock").len()
    }

    pub fn num_running_drivers(&self) -> usize {
        self.num_running_drivers.load(Ordering::Acquire)
    }

    /// Decrements the running-driver counter. Exactly one caller, the one that
    /// takes it to zero, gets `true` and owns fragment finalization.
    pub fn count_down_drivers(&self) -> bool {
        let mut current = self.num_running_drivers.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.num_running_drivers.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current == 1,
                Err(actual) => current = actual,
            }
        }
    }

    /// Latches `status` unless a final status is already set. Returns whether
    /// this call won.
    pub fn set_final_status(&self, status: Status) -> bool {
        if !self.final_status.load(Ordering::Acquire).is_null() {
            return false;
        }
        let fresh = Box::into_raw(Box::new(status));
        if self
            .final_status
            .compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: `fresh` lost the race and was never published.
            drop(unsafe { Box::from_raw(fresh) });
            return false;
        }
        // SAFETY: published statuses are only freed in `drop`.
        let stored = unsafe { &*fresh };
        if stored.is_cancelled() {
            warn!(
                "fragment cancelled: query_id={} fragment_instance_id={} reason={}",
                self.query_id().unwrap_or_default(),
                self.fragment_instance_id,
                stored.message()
            );
        }
        true
    }

    /// The latched final status, if any.
    pub fn final_status(&self) -> Option<Status> {
        let current = self.final_status.load(Ordering::Acquire);
        if current.is_null() {
            return None;
        }
        // SAFETY: published statuses are only freed in `drop`.
        Some(unsafe { (*current).clone() })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Acquire)
    }

    /// Raises the cancel flag, then tries to latch `status`. The flag is set
    /// even if another status already won.
    pub fn cancel(&self, status: Status) {
        self.cancel_flag.store(true, Ordering::Release);
        self.set_final_status(status);
    }

    /// Graceful stop without failure.
    pub fn finish(&self) {
        self.cancel(Status::Ok);
    }

    pub fn finish_signal(&self) -> Arc<FinishSignal> {
        Arc::clone(&self.finish_signal)
    }

    /// Prepares pipelines in order, stopping at the first failure.
    pub fn prepare_all_pipelines(&self) -> Result<(), String> {
        let state = self.runtime_state();
        for pipeline in self.pipelines.read().expect("fragment pipelines lock").iter() {
            pipeline.prepare(&state)?;
        }
        Ok(())
    }

    /// Closes every pipeline, whatever state the others are in.
    pub fn close_all_pipelines(&self) {
        let state = self.runtime_state();
        for pipeline in self.pipelines.read().expect("fragment pipelines lock").iter() {
            pipeline.close(&state);
        }
    }
}

impl Drop for FragmentContext {
    fn drop(&mut self) {
        debug!(
            "release fragment context: fragment_instance_id={}",
            self.fragment_instance_id
        );
        let state = self.runtime_state();
        self.runtime_filter_hub.close_all_in_filters(&state);
        self.drivers
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.close_all_pipelines();
        if let Some(plan) = self.plan.get() {
            plan.close(&state);
        }

        let retired = std::mem::take(
            self.retired_statuses
                .get_mut()
                .unwrap_or_else(|e| e.into_inner()),
        );
        let current = std::mem::replace(self.final_status.get_mut(), ptr::null_mut());
        for status in retired
            .into_iter()
            .map(AtomicPtr::into_inner)
            .chain(std::iter::once(current))
            .filter(|p| !p.is_null())
        {
            // SAFETY: every pointer here came from `Box::into_raw` in
            // `set_final_status` and no reader outlives `&mut self`.
            drop(unsafe { Box::from_raw(status) });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::{FinishSignal, FragmentContext};
    use crate::common::status::Status;
    use crate::common::types::UniqueId;
    use crate::exec::chunk::Chunk;
    use crate::exec::node::ExecNode;
    use crate::exec::pipeline::builder::PipelineBuilderContext;
    use crate::exec::pipeline::driver::PipelineDriver;
    use crate::exec::pipeline::operator::Operator;
    use crate::exec::pipeline::operator_factory::{OpFactories, OperatorFactory};
    use crate::exec::pipeline::pipeline::Pipeline;
    use crate::runtime::runtime_filter_hub::RuntimeFilterCollector;
    use crate::runtime::runtime_state::RuntimeState;

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn record(log: &EventLog, event: impl Into<String>) {
        log.lock().expect("event log").push(event.into());
    }

    struct LoggedOp {
        log: EventLog,
    }

    impl Operator for LoggedOp {
        fn name(&self) -> &str {
            "logged"
        }

        fn need_input(&self) -> bool {
            false
        }

        fn has_output(&self) -> bool {
            false
        }

        fn is_finished(&self) -> bool {
            true
        }

        fn push_chunk(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<(), String> {
            Ok(())
        }

        fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
            Ok(None)
        }

        fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
            Ok(())
        }
    }

    impl Drop for LoggedOp {
        fn drop(&mut self) {
            record(&self.log, "driver");
        }
    }

    struct LoggedFactory {
        id: i32,
        source: bool,
        fail_prepare: bool,
        log: EventLog,
    }

    impl OperatorFactory for LoggedFactory {
        fn id(&self) -> i32 {
            self.id
        }

        fn plan_node_id(&self) -> i32 {
            self.id
        }

        fn name(&self) -> &str {
            "logged"
        }

        fn create(&self, _dop: usize, _driver_sequence: usize) -> Box<dyn Operator> {
            Box::new(LoggedOp {
                log: Arc::clone(&self.log),
            })
        }

        fn is_source(&self) -> bool {
            self.source
        }

        fn is_sink(&self) -> bool {
            !self.source
        }

        fn prepare(&self, _state: &RuntimeState) -> Result<(), String> {
            record(&self.log, format!("prepare {}", self.id));
            if self.fail_prepare {
                return Err(format!("factory {} failed", self.id));
            }
            Ok(())
        }

        fn close(&self, _state: &RuntimeState) {
            record(&self.log, format!("close {}", self.id));
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn logged_pipeline(id: u32, log: &EventLog, fail_prepare: bool) -> Arc<Pipeline> {
        let ops: OpFactories = vec![
            Box::new(LoggedFactory {
                id: (id * 10) as i32,
                source: true,
                fail_prepare,
                log: Arc::clone(log),
            }),
            Box::new(LoggedFactory {
                id: (id * 10 + 1) as i32,
                source: false,
                fail_prepare: false,
                log: Arc::clone(log),
            }),
        ];
        Arc::new(Pipeline::new(id, ops))
    }

    struct LoggedCollector {
        log: EventLog,
    }

    impl RuntimeFilterCollector for LoggedCollector {
        fn close(&self, _state: &RuntimeState) {
            record(&self.log, "filters");
        }
    }

    struct LoggedNode {
        log: EventLog,
    }

    impl ExecNode for LoggedNode {
        fn id(&self) -> i32 {
            0
        }

        fn name(&self) -> &str {
            "logged"
        }

        fn decompose_to_pipeline(
            &self,
            _ctx: &mut PipelineBuilderContext,
        ) -> Result<OpFactories, String> {
            Err("not decomposable".to_string())
        }

        fn close(&self, _state: &RuntimeState) {
            record(&self.log, "plan");
        }
    }

    #[test]
    fn exactly_one_count_down_observes_zero() {
        const N: usize = 32;
        for _ in 0..20 {
            let log: EventLog = Arc::new(Mutex::new(Vec::new()));
            let ctx = Arc::new(FragmentContext::new(UniqueId::new(1, 2)));
            let drivers = (0..N)
                .map(|seq| {
                    let ops: Vec<Box<dyn Operator>> = vec![
                        Box::new(LoggedOp {
                            log: Arc::clone(&log),
                        }),
                        Box::new(LoggedOp {
                            log: Arc::clone(&log),
                        }),
                    ];
                    let driver =
                        PipelineDriver::new(0, seq, ops, Arc::new(RuntimeState::default()));
                    Arc::new(Mutex::new(driver))
                })
                .collect::<Vec<_>>();
            ctx.set_drivers(drivers);
            assert_eq!(ctx.num_running_drivers(), N);

            let barrier = Arc::new(Barrier::new(N));
            let winners = Arc::new(AtomicUsize::new(0));
            let handles = (0..N)
                .map(|_| {
                    let ctx = Arc::clone(&ctx);
                    let barrier = Arc::clone(&barrier);
                    let winners = Arc::clone(&winners);
                    thread::spawn(move || {
                        barrier.wait();
                        if ctx.count_down_drivers() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect::<Vec<_>>();
            for handle in handles {
                handle.join().expect("join");
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert_eq!(ctx.num_running_drivers(), 0);
            assert!(!ctx.count_down_drivers());
        }
    }

    #[test]
    fn first_final_status_wins() {
        let ctx = FragmentContext::new(UniqueId::new(1, 3));
        assert!(ctx.final_status().is_none());
        assert!(ctx.set_final_status(Status::cancelled("first")));
        assert!(!ctx.set_final_status(Status::internal_error("second")));
        assert_eq!(ctx.final_status(), Some(Status::cancelled("first")));

        // Re-attaching drivers starts a new attempt with a clear latch.
        ctx.set_drivers(Vec::new());
        assert!(ctx.final_status().is_none());
        assert!(ctx.set_final_status(Status::Ok));
        assert_eq!(ctx.final_status(), Some(Status::Ok));
    }

    #[test]
    fn each_attempt_latches_its_own_status() {
        let ctx = Arc::new(FragmentContext::new(UniqueId::new(1, 6)));
        for attempt in 0..4 {
            let reader = {
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    (0..100).filter_map(|_| ctx.final_status()).count()
                })
            };
            ctx.cancel(Status::cancelled(format!("attempt {attempt}")));
            assert_eq!(
                ctx.final_status(),
                Some(Status::cancelled(format!("attempt {attempt}")))
            );
            reader.join().expect("join reader");
            ctx.set_drivers(Vec::new());
            assert!(ctx.final_status().is_none());
        }
        assert!(ctx.set_final_status(Status::Ok));
    }

    #[test]
    fn concurrent_final_status_has_one_winner() {
        let ctx = Arc::new(FragmentContext::new(UniqueId::new(1, 4)));
        let barrier = Arc::new(Barrier::new(8));
        let handles = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ctx.set_final_status(Status::internal_error(format!("driver {i}")))
                        .then_some(i)
                })
            })
            .collect::<Vec<_>>();
        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().expect("join"))
            .collect::<Vec<_>>();
        assert_eq!(winners.len(), 1);
        assert_eq!(
            ctx.final_status(),
            Some(Status::internal_error(format!("driver {}", winners[0])))
        );
    }

    #[test]
    fn cancel_sets_flag_even_after_status_latched() {
        let ctx = FragmentContext::new(UniqueId::new(1, 5));
        assert!(ctx.set_final_status(Status::Ok));
        assert!(!ctx.is_cancelled());
        ctx.cancel(Status::cancelled("late"));
        ctx.cancel(Status::cancelled("again"));
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.final_status(), Some(Status::Ok));

        let other = FragmentContext::new(UniqueId::new(1, 6));
        other.finish();
        assert!(other.is_cancelled());
        assert_eq!(other.final_status(), Some(Status::Ok));
    }

    #[test]
    fn prepare_fails_fast_and_close_is_unconditional() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let ctx = FragmentContext::new(UniqueId::new(1, 7));
        ctx.set_pipelines(vec![
            logged_pipeline(1, &log, false),
            logged_pipeline(2, &log, true),
            logged_pipeline(3, &log, false),
        ]);
        let err = ctx.prepare_all_pipelines().expect_err("second pipeline fails");
        assert!(err.contains("factory 20 failed"));
        let prepared = log
            .lock()
            .expect("event log")
            .iter()
            .filter(|e| e.starts_with("prepare"))
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(prepared, vec!["prepare 10", "prepare 11", "prepare 20"]);

        ctx.close_all_pipelines();
        let closed = log
            .lock()
            .expect("event log")
            .iter()
            .filter(|e| e.starts_with("close"))
            .count();
        assert_eq!(closed, 6);
    }

    #[test]
    fn teardown_runs_filters_drivers_pipelines_plan_in_order() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        {
            let ctx = FragmentContext::new(UniqueId::new(1, 8));
            ctx.runtime_filter_hub().add_in_filter_collector(
                0,
                Arc::new(LoggedCollector {
                    log: Arc::clone(&log),
                }),
            );
            let pipeline = logged_pipeline(1, &log, false);
            let drivers = pipeline
                .instantiate_drivers(&Arc::new(RuntimeState::default()))
                .into_iter()
                .map(|d| Arc::new(Mutex::new(d)))
                .collect::<Vec<_>>();
            ctx.set_pipelines(vec![pipeline]);
            ctx.set_drivers(drivers);
            ctx.set_plan(Box::new(LoggedNode {
                log: Arc::clone(&log),
            }))
            .expect("set plan");
        }
        let events = log.lock().expect("event log").clone();
        assert_eq!(
            events,
            vec!["filters", "driver", "driver", "close 10", "close 11", "plan"]
        );
    }

    #[test]
    fn finish_signal_releases_waiters_once() {
        let signal = Arc::new(FinishSignal::new());
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };
        assert!(signal.release());
        assert!(!signal.release());
        waiter.join().expect("join");
        assert!(signal.is_released());
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn finish_signal_survives_a_poisoned_lock() {
        let signal = Arc::new(FinishSignal::new());
        let poisoner = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let _guard = signal.released.lock().expect("finish signal lock");
                panic!("poison finish signal");
            })
        };
        assert!(poisoner.join().is_err());
        assert!(signal.released.is_poisoned());

        assert!(!signal.is_released());
        assert!(signal.release());
        signal.wait();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }
}
