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
//! Expression contract consumed by partitioned local exchanges.
//!
//! The expression library lives outside this crate. Partition routing and
//! keyed operators only need "evaluate against a chunk, get one column back",
//! so that is all `Expr` asks for. `ColumnRef` covers the common case of
//! partitioning directly on an input column.

use std::fmt;
use std::sync::Arc;

use arrow::array::ArrayRef;

use crate::exec::chunk::Chunk;

pub trait Expr: Send + Sync + fmt::Debug {
    /// Evaluates the expression for every row of `chunk`; the result has `chunk.len()` rows.
    fn evaluate(&self, chunk: &Chunk) -> Result<ArrayRef, String>;
}

pub type ExprRef = Arc<dyn Expr>;

/// Reference to an input column by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef {
    index: usize,
}

impl ColumnRef {
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn new_ref(index: usize) -> ExprRef {
        Arc::new(Self::new(index))
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl Expr for ColumnRef {
    fn evaluate(&self, chunk: &Chunk) -> Result<ArrayRef, String> {
        if self.index >= chunk.num_columns() {
            return Err(format!(
                "column index {} out of range (num_columns={})",
                self.index,
                chunk.num_columns()
            ));
        }
        Ok(Arc::clone(chunk.batch().column(self.index)))
    }
}

/// Evaluates every expression of `exprs` against `chunk`.
pub fn evaluate_all(exprs: &[ExprRef], chunk: &Chunk) -> Result<Vec<ArrayRef>, String> {
    let mut arrays = Vec::with_capacity(exprs.len());
    for expr in exprs {
        let array = expr.evaluate(chunk)?;
        if array.len() != chunk.len() {
            return Err(format!(
                "expression {:?} returned {} rows for a chunk of {} rows",
                expr,
                array.len(),
                chunk.len()
            ));
        }
        arrays.push(array);
    }
    Ok(arrays)
}
