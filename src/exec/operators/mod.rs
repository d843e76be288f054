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
//! Execution operator module exports.
//!
//! Responsibilities:
//! - Registers operator factories used by the pipeline builder for each exec-node kind.
//! - Provides a stable import surface for operator construction across execution modules.

mod distinct_processor;
mod limit_processor;
mod local_exchange_sink;
mod local_exchange_source;
pub mod local_exchanger;
mod result_sink;
mod scan_source;

pub use distinct_processor::DistinctProcessorFactory;
pub use limit_processor::LimitProcessorFactory;
pub use local_exchange_sink::LocalExchangeSinkFactory;
pub use local_exchange_source::LocalExchangeSourceFactory;
pub use local_exchanger::{ExchangeRouting, LocalExchanger, PartitionKind, PartitionSpec};
pub use result_sink::ResultSinkFactory;
pub use scan_source::ScanSourceFactory;
