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
//! Typed accessors over the loaded config, falling back to built-in defaults
//! when no config file has been loaded.

use crate::novarocks_config::{RuntimeConfig, config as novarocks_app_config};

fn runtime_config() -> RuntimeConfig {
    novarocks_app_config()
        .ok()
        .map(|c| c.runtime.clone())
        .unwrap_or_default()
}

pub fn chunk_size() -> usize {
    runtime_config().chunk_size.max(1)
}

pub fn pipeline_dop() -> usize {
    runtime_config().actual_pipeline_dop()
}

pub fn pipeline_exec_thread_num() -> usize {
    runtime_config().actual_exec_threads()
}

pub fn local_exchange_buffer_mem_limit_per_driver() -> usize {
    runtime_config().local_exchange_buffer_mem_limit_per_driver
}

pub fn driver_time_slice_ms() -> u64 {
    runtime_config().driver_time_slice_ms
}

pub fn blocked_driver_poll_interval_ms() -> u64 {
    runtime_config().blocked_driver_poll_interval_ms
}
