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
//! Streaming DISTINCT over key expressions.
//!
//! Each driver keeps its own set of seen keys, so correctness depends on the
//! input being hash-partitioned on the same keys: equal keys must never reach
//! two different drivers.

use std::any::Any;
use std::collections::HashSet;

use arrow::row::{OwnedRow, RowConverter, SortField};

use crate::exec::chunk::Chunk;
use crate::exec::expr::{ExprRef, evaluate_all};
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::runtime_state::RuntimeState;

pub struct DistinctProcessorFactory {
    id: i32,
    plan_node_id: i32,
    name: String,
    key_exprs: Vec<ExprRef>,
}

impl DistinctProcessorFactory {
    pub fn new(id: i32, plan_node_id: i32, key_exprs: Vec<ExprRef>) -> Self {
        Self {
            id,
            plan_node_id,
            name: format!("DISTINCT (id={plan_node_id})"),
            key_exprs,
        }
    }
}

impl OperatorFactory for DistinctProcessorFactory {
    fn id(&self) -> i32 {
        self.id
    }

    fn plan_node_id(&self) -> i32 {
        self.plan_node_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: usize, _driver_sequence: usize) -> Box<dyn Operator> {
        Box::new(DistinctProcessorOperator {
            name: self.name.clone(),
            key_exprs: self.key_exprs.clone(),
            converter: None,
            seen: HashSet::new(),
            pending_output: None,
            finishing: false,
            finished: false,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct DistinctProcessorOperator {
    name: String,
    key_exprs: Vec<ExprRef>,
    converter: Option<RowConverter>,
    seen: HashSet<OwnedRow>,
    pending_output: Option<Chunk>,
    finishing: bool,
    finished: bool,
}

impl DistinctProcessorOperator {
    fn new_rows(&mut self, chunk: &Chunk) -> Result<Vec<u32>, String> {
        let keys = evaluate_all(&self.key_exprs, chunk)?;
        if self.converter.is_none() {
            let fields = keys
                .iter()
                .map(|a| SortField::new(a.data_type().clone()))
                .collect::<Vec<_>>();
            self.converter =
                Some(RowConverter::new(fields).map_err(|e| format!("distinct key encoder: {e}"))?);
        }
        let Some(converter) = self.converter.as_ref() else {
            return Ok(Vec::new());
        };
        let rows = converter
            .convert_columns(&keys)
            .map_err(|e| format!("encode distinct keys failed: {e}"))?;
        let mut selected = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            if self.seen.insert(row.owned()) {
                selected.push(idx as u32);
            }
        }
        Ok(selected)
    }
}

impl Operator for DistinctProcessorOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.seen.clear();
        Ok(())
    }

    fn need_input(&self) -> bool {
        !self.finishing && self.pending_output.is_none()
    }

    fn has_output(&self) -> bool {
        self.pending_output.is_some()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if chunk.is_empty() || self.finishing {
            return Ok(());
        }
        let selected = self.new_rows(&chunk)?;
        if selected.is_empty() {
            return Ok(());
        }
        self.pending_output = Some(if selected.len() == chunk.len() {
            chunk
        } else {
            chunk.take(&selected)?
        });
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        let out = self.pending_output.take();
        if self.finishing {
            self.finished = true;
        }
        Ok(out)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.finishing = true;
        if self.pending_output.is_none() {
            self.finished = true;
        }
        Ok(())
    }

    fn set_finished(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.finishing = true;
        self.finished = true;
        self.pending_output = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int32Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::DistinctProcessorFactory;
    use crate::exec::chunk::Chunk;
    use crate::exec::expr::ColumnRef;
    use crate::exec::pipeline::operator_factory::OperatorFactory;
    use crate::runtime::runtime_state::RuntimeState;

    fn chunk_of(values: &[i32]) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int32, true)]));
        let array = Arc::new(Int32Array::from(values.to_vec())) as ArrayRef;
        Chunk::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"))
    }

    fn values(chunk: &Chunk) -> Vec<i32> {
        chunk
            .batch()
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32 column")
            .values()
            .to_vec()
    }

    #[test]
    fn drops_keys_seen_in_earlier_chunks() {
        let rt = RuntimeState::default();
        let factory = DistinctProcessorFactory::new(1, 3, vec![ColumnRef::new_ref(0)]);
        let mut op = factory.create(1, 0);

        op.push_chunk(&rt, chunk_of(&[1, 2, 1, 3])).expect("push");
        assert_eq!(values(&op.pull_chunk(&rt).expect("pull").expect("out")), vec![1, 2, 3]);

        op.push_chunk(&rt, chunk_of(&[3, 3, 2])).expect("push");
        assert!(!op.has_output());
        assert!(op.need_input());

        op.push_chunk(&rt, chunk_of(&[4, 1])).expect("push");
        assert_eq!(values(&op.pull_chunk(&rt).expect("pull").expect("out")), vec![4]);

        op.set_finishing(&rt).expect("finishing");
        assert!(op.is_finished());
    }
}
