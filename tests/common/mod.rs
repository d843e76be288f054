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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{ArrayRef, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use tempfile::TempDir;

use novarocks_pipeline::common::types::UniqueId;
use novarocks_pipeline::exec::chunk::Chunk;
use novarocks_pipeline::exec::pipeline::scan::morsel::ScanMorsel;
use novarocks_pipeline::novarocks_config;
use novarocks_pipeline::novarocks_logging;
use novarocks_pipeline::runtime::exec_env::{ExecEnv, RuntimeOptions};
use novarocks_pipeline::runtime::result_buffer::ResultBuffer;

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with small batches and a fixed worker pool.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks.toml");

        let config_content = r#"
log_level = "debug"

[runtime]
chunk_size = 16
pipeline_dop = 4
pipeline_exec_thread_num = 4
local_exchange_buffer_mem_limit_per_driver = 1048576
driver_time_slice_ms = 20
blocked_driver_poll_interval_ms = 1
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_config::NovaRocksConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Options every integration test runs with; independent of the global config.
pub fn test_options() -> RuntimeOptions {
    RuntimeOptions {
        chunk_size: 16,
        pipeline_dop: 4,
        exec_threads: 4,
        local_exchange_buffer_mem_limit_per_driver: 1024 * 1024,
        driver_time_slice: Duration::from_millis(20),
        blocked_driver_poll_interval: Duration::from_millis(1),
    }
}

pub fn test_env() -> ExecEnv {
    ExecEnv::new(test_options()).expect("exec env")
}

pub fn test_query_id() -> UniqueId {
    UniqueId::new(1234567890, 9876543210)
}

/// Generate a unique fragment instance id based on test name.
pub fn unique_fragment_id(test_name: &str) -> UniqueId {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    test_name.hash(&mut hasher);
    let hash = hasher.finish();

    UniqueId::new(hash as i64, (hash >> 32) as i64)
}

/// Two-column `(k, v)` chunk of Int64 values.
pub fn kv_chunk(keys: &[i64], values: &[i64]) -> Chunk {
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, false),
        Field::new("v", DataType::Int64, false),
    ]));
    let k = Arc::new(Int64Array::from(keys.to_vec())) as ArrayRef;
    let v = Arc::new(Int64Array::from(values.to_vec())) as ArrayRef;
    Chunk::new(RecordBatch::try_new(schema, vec![k, v]).expect("record batch"))
}

/// `num_morsels` morsels of one chunk each; row `i` of morsel `m` has
/// `k = (m * rows_per_morsel + i) % key_mod` and a globally unique `v`.
pub fn kv_morsels(num_morsels: usize, rows_per_morsel: usize, key_mod: i64) -> Vec<ScanMorsel> {
    (0..num_morsels)
        .map(|m| {
            let values = (0..rows_per_morsel)
                .map(|i| (m * rows_per_morsel + i) as i64)
                .collect::<Vec<_>>();
            let keys = values.iter().map(|v| v % key_mod).collect::<Vec<_>>();
            ScanMorsel::new(m as i32, vec![kv_chunk(&keys, &values)])
        })
        .collect()
}

pub fn scan_ranges(entries: Vec<(i32, Vec<ScanMorsel>)>) -> HashMap<i32, Vec<ScanMorsel>> {
    entries.into_iter().collect()
}

/// Values of column `col` across every chunk the buffer received, sorted.
pub fn sorted_column(buffer: &ResultBuffer, col: usize) -> Vec<i64> {
    let mut out = buffer
        .chunks()
        .iter()
        .flat_map(|chunk| {
            chunk
                .batch()
                .column(col)
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("int64 column")
                .values()
                .to_vec()
        })
        .collect::<Vec<_>>();
    out.sort_unstable();
    out
}
