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
//! Process execution environment.
//!
//! Responsibilities:
//! - Resolves runtime knobs (chunk size, dop, worker threads, exchange budgets) from config.
//! - Owns the fragment registry and the driver executor and is passed explicitly to callers.
//!
//! Key exported interfaces:
//! - Types: `RuntimeOptions`, `ExecEnv`.

use std::sync::Arc;
use std::time::Duration;

use crate::common::config;
use crate::common::status::Status;
use crate::exec::pipeline::fragment_context_manager::FragmentContextManager;
use crate::exec::pipeline::global_driver_executor::GlobalDriverExecutor;
use crate::novarocks_config::RuntimeConfig;
use crate::novarocks_logging::info;

/// Runtime knobs shared by every fragment executed in one `ExecEnv`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub chunk_size: usize,
    pub pipeline_dop: usize,
    pub exec_threads: usize,
    pub local_exchange_buffer_mem_limit_per_driver: usize,
    pub driver_time_slice: Duration,
    pub blocked_driver_poll_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl RuntimeOptions {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size.max(1),
            pipeline_dop: cfg.actual_pipeline_dop(),
            exec_threads: cfg.actual_exec_threads(),
            local_exchange_buffer_mem_limit_per_driver: cfg
                .local_exchange_buffer_mem_limit_per_driver
                .max(1),
            driver_time_slice: Duration::from_millis(cfg.driver_time_slice_ms.max(1)),
            blocked_driver_poll_interval: Duration::from_millis(
                cfg.blocked_driver_poll_interval_ms.max(1),
            ),
        }
    }

    /// Options from the loaded config file, or built-in defaults when none is loaded.
    pub fn from_global_config() -> Self {
        Self {
            chunk_size: config::chunk_size(),
            pipeline_dop: config::pipeline_dop(),
            exec_threads: config::pipeline_exec_thread_num(),
            local_exchange_buffer_mem_limit_per_driver: config::local_exchange_buffer_mem_limit_per_driver()
                .max(1),
            driver_time_slice: Duration::from_millis(config::driver_time_slice_ms().max(1)),
            blocked_driver_poll_interval: Duration::from_millis(
                config::blocked_driver_poll_interval_ms().max(1),
            ),
        }
    }

    /// Degree of parallelism for a fragment: the requested value if positive,
    /// otherwise the configured default.
    pub fn calc_pipeline_dop(&self, requested: usize) -> usize {
        if requested > 0 {
            return requested;
        }
        self.pipeline_dop.max(1)
    }
}

/// Explicit handle to the process-wide execution services.
pub struct ExecEnv {
    options: RuntimeOptions,
    fragment_mgr: Arc<FragmentContextManager>,
    driver_executor: GlobalDriverExecutor,
}

impl ExecEnv {
    pub fn new(options: RuntimeOptions) -> Result<Self, String> {
        let fragment_mgr = Arc::new(FragmentContextManager::new());
        let driver_executor = GlobalDriverExecutor::new(
            options.exec_threads,
            options.driver_time_slice,
            options.blocked_driver_poll_interval,
            Arc::clone(&fragment_mgr),
        )?;
        info!(
            "ExecEnv initialized: chunk_size={} pipeline_dop={} exec_threads={}",
            options.chunk_size, options.pipeline_dop, options.exec_threads
        );
        Ok(Self {
            options,
            fragment_mgr,
            driver_executor,
        })
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn fragment_mgr(&self) -> &Arc<FragmentContextManager> {
        &self.fragment_mgr
    }

    pub fn driver_executor(&self) -> &GlobalDriverExecutor {
        &self.driver_executor
    }

    /// Cancels every live fragment and stops the executor.
    pub fn shutdown(&self) {
        self.fragment_mgr
            .cancel(Status::cancelled("exec env shutting down"));
        self.driver_executor.shutdown();
    }
}

impl Drop for ExecEnv {
    fn drop(&mut self) {
        self.shutdown();
    }
}
