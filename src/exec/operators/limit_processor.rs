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
//! Row-limit processor for LIMIT/OFFSET semantics.
//!
//! Responsibilities:
//! - Applies one offset/limit budget across every driver created from the same factory.
//! - Finishes as soon as the budget is spent, so the driver stops its upstream operators.
//!
//! Key exported interfaces:
//! - Types: `LimitProcessorFactory`.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::novarocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

/// Rows still to skip and to emit, claimed atomically by concurrent drivers.
#[derive(Debug)]
struct LimitBudget {
    offset: AtomicUsize,
    limit: Option<AtomicUsize>,
}

impl LimitBudget {
    fn new(limit: Option<usize>, offset: usize) -> Self {
        Self {
            offset: AtomicUsize::new(offset),
            limit: limit.map(AtomicUsize::new),
        }
    }

    /// Takes up to `wanted` units from `counter`; returns how many were granted.
    fn claim(counter: &AtomicUsize, wanted: usize) -> usize {
        if wanted == 0 {
            return 0;
        }
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                (left > 0).then(|| left - left.min(wanted))
            })
            .map(|left| left.min(wanted))
            .unwrap_or(0)
    }

    /// Splits an incoming chunk of `rows` into `(skipped, emitted)` row counts.
    fn split(&self, rows: usize) -> (usize, usize) {
        let skipped = Self::claim(&self.offset, rows);
        let available = rows - skipped;
        let emitted = match &self.limit {
            Some(limit) => Self::claim(limit, available),
            None => available,
        };
        (skipped, emitted)
    }

    fn is_exhausted(&self) -> bool {
        self.limit
            .as_ref()
            .is_some_and(|limit| limit.load(Ordering::Acquire) == 0)
    }
}

/// Factory for limit processors.
pub struct LimitProcessorFactory {
    id: i32,
    plan_node_id: i32,
    name: String,
    budget: Arc<LimitBudget>,
}

impl LimitProcessorFactory {
    pub fn new(id: i32, plan_node_id: i32, limit: Option<usize>, offset: usize) -> Self {
        Self {
            id,
            plan_node_id,
            name: format!("LIMIT (id={plan_node_id})"),
            budget: Arc::new(LimitBudget::new(limit, offset)),
        }
    }
}

impl OperatorFactory for LimitProcessorFactory {
    fn id(&self) -> i32 {
        self.id
    }

    fn plan_node_id(&self) -> i32 {
        self.plan_node_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: usize, driver_sequence: usize) -> Box<dyn Operator> {
        Box::new(LimitOperator {
            name: self.name.clone(),
            driver_sequence,
            budget: Arc::clone(&self.budget),
            ready: None,
            input_done: false,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct LimitOperator {
    name: String,
    driver_sequence: usize,
    budget: Arc<LimitBudget>,
    ready: Option<Chunk>,
    input_done: bool,
}

impl Operator for LimitOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn need_input(&self) -> bool {
        !self.input_done && self.ready.is_none() && !self.budget.is_exhausted()
    }

    fn has_output(&self) -> bool {
        self.ready.is_some()
    }

    /// Done once nothing is buffered and either upstream ended or any driver
    /// spent the shared limit.
    fn is_finished(&self) -> bool {
        self.ready.is_none() && (self.input_done || self.budget.is_exhausted())
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if self.input_done || self.budget.is_exhausted() {
            return Ok(());
        }
        if self.ready.is_some() {
            return Err(format!("{} pushed while holding an unread chunk", self.name));
        }
        let rows = chunk.len();
        if rows == 0 {
            return Ok(());
        }
        let (skipped, emitted) = self.budget.split(rows);
        if emitted == rows {
            self.ready = Some(chunk);
        } else if emitted > 0 {
            self.ready = Some(chunk.slice(skipped, emitted));
        }
        if self.budget.is_exhausted() {
            debug!(
                "limit reached: op={} driver_sequence={}",
                self.name, self.driver_sequence
            );
        }
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        Ok(self.ready.take())
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.input_done = true;
        Ok(())
    }

    fn set_finished(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.input_done = true;
        self.ready = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use arrow::array::{ArrayRef, Int64Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::LimitProcessorFactory;
    use crate::common::types::UniqueId;
    use crate::exec::chunk::Chunk;
    use crate::exec::operators::{
        ExchangeRouting, LocalExchangeSinkFactory, LocalExchangeSourceFactory, LocalExchanger,
        ResultSinkFactory,
    };
    use crate::exec::pipeline::driver::{DriverState, PipelineDriver};
    use crate::exec::pipeline::fragment_context::FragmentContext;
    use crate::exec::pipeline::local_exchange_memory_manager::LocalExchangeMemoryManager;
    use crate::exec::pipeline::operator::Operator;
    use crate::exec::pipeline::operator_factory::OperatorFactory;
    use crate::runtime::result_buffer::ResultBuffer;
    use crate::runtime::runtime_state::RuntimeState;

    fn rows(range: std::ops::Range<i64>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
        let array = Arc::new(Int64Array::from(range.collect::<Vec<_>>())) as ArrayRef;
        Chunk::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"))
    }

    fn values(chunk: &Chunk) -> Vec<i64> {
        chunk
            .batch()
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64 column")
            .values()
            .to_vec()
    }

    fn pull(op: &mut Box<dyn Operator>, rt: &RuntimeState) -> Vec<i64> {
        op.pull_chunk(rt)
            .expect("pull")
            .map(|c| values(&c))
            .unwrap_or_default()
    }

    #[test]
    fn offset_can_swallow_whole_chunks() {
        let rt = RuntimeState::default();
        let mut op = LimitProcessorFactory::new(1, 1, Some(3), 4).create(1, 0);

        op.push_chunk(&rt, rows(0..3)).expect("push");
        assert!(!op.has_output());
        assert!(op.need_input());

        op.push_chunk(&rt, rows(3..6)).expect("push");
        assert_eq!(pull(&mut op, &rt), vec![4, 5]);
        assert!(!op.is_finished());

        op.push_chunk(&rt, rows(6..9)).expect("push");
        assert!(!op.need_input());
        assert!(!op.is_finished());
        assert_eq!(pull(&mut op, &rt), vec![6]);
        assert!(op.is_finished());
    }

    #[test]
    fn drivers_draw_from_one_budget() {
        let rt = RuntimeState::default();
        let factory = LimitProcessorFactory::new(1, 1, Some(5), 0);
        let mut a = factory.create(2, 0);
        let mut b = factory.create(2, 1);

        a.push_chunk(&rt, rows(0..3)).expect("push a");
        b.push_chunk(&rt, rows(10..14)).expect("push b");
        assert_eq!(pull(&mut a, &rt), vec![0, 1, 2]);
        // `b` exhausted the budget, so `a` is done without seeing its input end.
        assert!(a.is_finished());
        assert!(!a.need_input());
        assert!(!b.is_finished());
        assert_eq!(pull(&mut b, &rt), vec![10, 11]);
        assert!(b.is_finished());
    }

    #[test]
    fn without_limit_only_upstream_end_finishes() {
        let rt = RuntimeState::default();
        let mut op = LimitProcessorFactory::new(1, 1, None, 2).create(1, 0);
        op.push_chunk(&rt, rows(0..3)).expect("push");
        assert_eq!(pull(&mut op, &rt), vec![2]);
        op.push_chunk(&rt, rows(3..5)).expect("push");
        assert_eq!(pull(&mut op, &rt), vec![3, 4]);
        assert!(!op.is_finished());
        op.set_finishing(&rt).expect("finishing");
        assert!(op.is_finished());
    }

    #[test]
    fn concurrent_drivers_never_exceed_the_limit() {
        let factory = Arc::new(LimitProcessorFactory::new(1, 1, Some(50), 5));
        let barrier = Arc::new(Barrier::new(8));
        let handles = (0..8)
            .map(|seq| {
                let factory = Arc::clone(&factory);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let rt = RuntimeState::default();
                    let mut op = factory.create(8, seq);
                    barrier.wait();
                    let mut emitted = 0;
                    for i in 0..10 {
                        if !op.need_input() {
                            break;
                        }
                        op.push_chunk(&rt, rows(i * 7..i * 7 + 7)).expect("push");
                        emitted += pull(&mut op, &rt).len();
                    }
                    emitted
                })
            })
            .collect::<Vec<_>>();
        let total = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .sum::<usize>();
        assert_eq!(total, 50);
    }

    #[test]
    fn spent_budget_stops_the_feeding_exchange() {
        let rt = Arc::new(RuntimeState::default());
        let exchanger = LocalExchanger::new(
            ExchangeRouting::Passthrough,
            1,
            1,
            Arc::new(LocalExchangeMemoryManager::new(1024, usize::MAX)),
        );
        let mut producer =
            LocalExchangeSinkFactory::new(1, -100, Arc::clone(&exchanger)).create(1, 0);
        producer.push_chunk(&rt, rows(0..4)).expect("push");

        let limit = LimitProcessorFactory::new(3, 7, Some(2), 0);
        // Another driver of the same limit spends the whole budget first.
        let mut other = limit.create(2, 1);
        other.push_chunk(&rt, rows(100..110)).expect("push");

        let buffer = Arc::new(ResultBuffer::new());
        let mut driver = PipelineDriver::new(
            1,
            0,
            vec![
                LocalExchangeSourceFactory::new(2, -100, 1, Arc::clone(&exchanger)).create(2, 0),
                limit.create(2, 0),
                ResultSinkFactory::new(4, -1, Arc::clone(&buffer)).create(2, 0),
            ],
            Arc::clone(&rt),
        );
        let ctx = FragmentContext::new(UniqueId::new(7, 7));
        assert_eq!(driver.process(&ctx, Duration::from_secs(5)), DriverState::Finished);

        assert_eq!(buffer.num_rows(), 0);
        assert!(producer.is_finished());
        assert!(!producer.need_input());
        assert_eq!(exchanger.memory_manager().buffered_rows(), 0);
    }
}
