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
use arrow::array::{RecordBatch, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::datatypes::SchemaRef;

/// A chunk of data, consisting of multiple rows.
///
/// The pipeline core only looks at the row count and the byte footprint; column
/// contents are read through `Expr` when a partitioned exchange routes rows.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
        }
    }

    /// Gathers the rows at `indices` into a new chunk.
    pub fn take(&self, indices: &[u32]) -> Result<Self, String> {
        let indices = UInt32Array::from(indices.to_vec());
        let batch = take_record_batch(&self.batch, &indices)
            .map_err(|e| format!("take rows from chunk failed: {e}"))?;
        Ok(Self { batch })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int32Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::Chunk;

    #[test]
    fn take_selects_rows_in_index_order() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let array = Arc::new(Int32Array::from(vec![10, 20, 30, 40])) as ArrayRef;
        let chunk = Chunk::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"));

        let taken = chunk.take(&[3, 1]).expect("take");
        assert_eq!(taken.len(), 2);
        let col = taken
            .batch()
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32 column");
        assert_eq!(col.values().to_vec(), vec![40, 20]);
        assert!(chunk.estimated_bytes() > 0);
    }
}
