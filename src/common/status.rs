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
//! Fragment execution status.
//!
//! `Status` is the value latched as a fragment's final outcome. Operator and
//! preparation paths keep returning `Result<_, String>`; a failed driver turns
//! its error into `Status::InternalError` when it cancels the fragment.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Ok,
    Cancelled(String),
    InternalError(String),
    MemLimitExceeded(String),
}

impl Status {
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Status::Cancelled(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Status::InternalError(msg.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Status::Cancelled(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Status::Ok => "",
            Status::Cancelled(msg) | Status::InternalError(msg) | Status::MemLimitExceeded(msg) => {
                msg
            }
        }
    }

    /// Converts into the `Result<(), String>` form used on operator paths.
    pub fn into_result(self) -> Result<(), String> {
        match self {
            Status::Ok => Ok(()),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Cancelled(msg) => write!(f, "Cancelled: {msg}"),
            Status::InternalError(msg) => write!(f, "Internal error: {msg}"),
            Status::MemLimitExceeded(msg) => write!(f, "Memory limit exceeded: {msg}"),
        }
    }
}

impl From<String> for Status {
    fn from(err: String) -> Self {
        Status::InternalError(err)
    }
}
