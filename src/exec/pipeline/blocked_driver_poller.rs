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
//! Blocked-driver poller.
//!
//! Responsibilities:
//! - Parks drivers that yielded on empty input or a full exchange budget.
//! - Re-queues them on the executor once they can make progress or their fragment is cancelled.
//!
//! Key exported interfaces:
//! - Types: `BlockedDriverPoller`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use super::global_driver_executor::{DriverTask, ExecutorShared};
use crate::novarocks_logging::debug;

struct PollerState {
    shared: Arc<ExecutorShared>,
    poll_interval: Duration,
    blocked: Mutex<VecDeque<DriverTask>>,
    cv: Condvar,
    cv_mutex: Mutex<()>,
    // Only flipped while `blocked` is locked.
    shutdown: AtomicBool,
}

#[derive(Clone)]
/// Poller that re-queues blocked drivers once they are ready again.
pub(crate) struct BlockedDriverPoller {
    state: Arc<PollerState>,
}

impl BlockedDriverPoller {
    pub(crate) fn new(shared: Arc<ExecutorShared>, poll_interval: Duration) -> Self {
        let state = PollerState {
            shared,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            blocked: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            cv_mutex: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub(crate) fn start(&self) -> Result<thread::JoinHandle<()>, String> {
        let state = Arc::clone(&self.state);
        thread::Builder::new()
            .name("blocked_driver_poller".to_string())
            .spawn(move || run_poller(state))
            .map_err(|e| format!("spawn blocked driver poller failed: {e}"))
    }

    /// Parks `task`; hands it back once the poller has been shut down.
    pub(crate) fn add_blocked(&self, task: DriverTask) -> Result<(), DriverTask> {
        let mut blocked = self.state.blocked.lock().expect("blocked poller lock");
        if self.state.shutdown.load(Ordering::Acquire) {
            return Err(task);
        }
        blocked.push_back(task);
        Ok(())
    }

    pub(crate) fn num_blocked(&self) -> usize {
        self.state.blocked.lock().expect("blocked poller lock").len()
    }

    /// Stops polling and returns every task still parked.
    pub(crate) fn shutdown(&self) -> Vec<DriverTask> {
        let drained = {
            let mut blocked = self.state.blocked.lock().expect("blocked poller lock");
            self.state.shutdown.store(true, Ordering::Release);
            blocked.drain(..).collect::<Vec<_>>()
        };
        self.state.cv.notify_all();
        drained
    }
}

fn run_poller(state: Arc<PollerState>) {
    debug!(
        "BlockedDriverPoller started with poll_interval={:?}",
        state.poll_interval
    );
    loop {
        if state.shutdown.load(Ordering::Acquire) {
            break;
        }

        let ready_tasks = drain_ready(&state);
        if !ready_tasks.is_empty() {
            state.shared.enqueue(ready_tasks);
        }

        let guard = state.cv_mutex.lock().expect("blocked poller cv lock");
        let _ = state
            .cv
            .wait_timeout(guard, state.poll_interval)
            .expect("blocked poller cv wait");
    }
    debug!("BlockedDriverPoller stopped");
}

fn drain_ready(state: &PollerState) -> Vec<DriverTask> {
    let mut blocked = state.blocked.lock().expect("blocked poller lock");
    let mut ready = Vec::new();
    let mut pending = VecDeque::with_capacity(blocked.len());
    while let Some(task) = blocked.pop_front() {
        if task.fragment_ctx().is_cancelled() || task.is_ready() {
            ready.push(task);
        } else {
            pending.push_back(task);
        }
    }
    *blocked = pending;
    ready
}
