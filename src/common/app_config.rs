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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = NovaRocksConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn config() -> Result<&'static NovaRocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_CONFIG")
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p));
    }

    let local = PathBuf::from("novarocks.toml");
    if local.exists() {
        return Ok(local);
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_CONFIG or create ./novarocks.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression, takes precedence over `log_level`.
    /// Example: "novarocks_pipeline=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl NovaRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }
}

impl Default for NovaRocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Target rows per chunk; every local exchange budget is a multiple of it.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 0 means half of the executor threads.
    #[serde(default)]
    pub pipeline_dop: usize,
    /// 0 means the available parallelism of the host.
    #[serde(default)]
    pub pipeline_exec_thread_num: usize,
    #[serde(default = "default_local_exchange_buffer_mem_limit_per_driver")]
    pub local_exchange_buffer_mem_limit_per_driver: usize,
    #[serde(default = "default_driver_time_slice_ms")]
    pub driver_time_slice_ms: u64,
    #[serde(default = "default_blocked_driver_poll_interval_ms")]
    pub blocked_driver_poll_interval_ms: u64,
}

fn default_chunk_size() -> usize {
    4096
}

fn default_local_exchange_buffer_mem_limit_per_driver() -> usize {
    128 * 1024 * 1024
}

fn default_driver_time_slice_ms() -> u64 {
    100
}

fn default_blocked_driver_poll_interval_ms() -> u64 {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            pipeline_dop: 0,
            pipeline_exec_thread_num: 0,
            local_exchange_buffer_mem_limit_per_driver:
                default_local_exchange_buffer_mem_limit_per_driver(),
            driver_time_slice_ms: default_driver_time_slice_ms(),
            blocked_driver_poll_interval_ms: default_blocked_driver_poll_interval_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn actual_exec_threads(&self) -> usize {
        if self.pipeline_exec_thread_num > 0 {
            return self.pipeline_exec_thread_num;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn actual_pipeline_dop(&self) -> usize {
        if self.pipeline_dop > 0 {
            return self.pipeline_dop;
        }
        (self.actual_exec_threads() / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::NovaRocksConfig;

    #[test]
    fn empty_config_uses_runtime_defaults() {
        let cfg = NovaRocksConfig::parse("").expect("parse empty config");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.runtime.chunk_size, 4096);
        assert_eq!(cfg.runtime.pipeline_dop, 0);
        assert_eq!(
            cfg.runtime.local_exchange_buffer_mem_limit_per_driver,
            128 * 1024 * 1024
        );
        assert!(cfg.runtime.actual_pipeline_dop() >= 1);
    }

    #[test]
    fn runtime_section_can_be_overridden() {
        let cfg = NovaRocksConfig::parse(
            r#"
log_filter = "novarocks_pipeline=debug"

[runtime]
chunk_size = 1024
pipeline_dop = 3
pipeline_exec_thread_num = 8
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.effective_log_filter(), "novarocks_pipeline=debug");
        assert_eq!(cfg.runtime.chunk_size, 1024);
        assert_eq!(cfg.runtime.actual_pipeline_dop(), 3);
        assert_eq!(cfg.runtime.actual_exec_threads(), 8);
    }

    #[test]
    fn auto_dop_is_half_of_exec_threads() {
        let cfg = NovaRocksConfig::parse("[runtime]\npipeline_exec_thread_num = 6\n")
            .expect("parse config");
        assert_eq!(cfg.runtime.actual_pipeline_dop(), 3);
    }
}
