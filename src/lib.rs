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
//! Pipeline compiler and fragment execution core.
//!
//! Compiles a physical plan tree into parallel pipelines, interposing local
//! exchanges where the degree of parallelism changes, and drives the
//! per-fragment lifecycle (completion, cancellation, teardown) on a shared
//! worker pool.

pub mod common;
pub mod exec;
pub mod runtime;

// StarRocks-BE-like folder layout, with `novarocks_*` convenience aliases.
pub use common::app_config as novarocks_config;
pub use common::logging as novarocks_logging;

pub use common::status::Status;
pub use common::types::UniqueId;
pub use exec::pipeline::fragment_executor::{FragmentExecutor, FragmentParams};
pub use runtime::exec_env::{ExecEnv, RuntimeOptions};
