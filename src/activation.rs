// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::clock::Nanos;
use crate::tracer::{SpanContext, SpanId, TraceId};

/// Whether the event marks a span becoming or ceasing to be the current span
/// on its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActivationKind {
    /// The span became current.
    Activate,
    /// The span ceased to be current.
    Deactivate,
}

/// An explicit span activation boundary observed on an instrumented thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActivationEvent {
    /// Activation or deactivation.
    pub kind: ActivationKind,
    /// The explicit span toggling.
    pub span_id: SpanId,
    /// The trace the span belongs to.
    pub trace_id: TraceId,
    /// The context enclosing the span at the time of the event.
    pub parent_context: SpanContext,
    /// When the toggle happened.
    pub timestamp: Nanos,
}

impl ActivationEvent {
    /// Convenience constructor for an activation.
    pub fn activate(
        span_id: SpanId,
        trace_id: TraceId,
        parent_context: SpanContext,
        timestamp: Nanos,
    ) -> Self {
        Self {
            kind: ActivationKind::Activate,
            span_id,
            trace_id,
            parent_context,
            timestamp,
        }
    }

    /// Convenience constructor for a deactivation.
    pub fn deactivate(
        span_id: SpanId,
        trace_id: TraceId,
        parent_context: SpanContext,
        timestamp: Nanos,
    ) -> Self {
        Self {
            kind: ActivationKind::Deactivate,
            span_id,
            trace_id,
            parent_context,
            timestamp,
        }
    }

    pub(crate) fn span_context(&self) -> SpanContext {
        SpanContext::new(self.trace_id, self.span_id)
    }
}

/// The chronologically ordered stream of activation events for one root.
///
/// Many instrumented threads [`push`](Self::push) concurrently; the profiler
/// worker drains in strict timestamp order, so globally non-monotonic
/// interleavings across threads are sorted within the drain window. Ties keep
/// their push order.
#[derive(Debug, Default)]
pub struct ActivationTimeline {
    events: Mutex<BinaryHeap<(Reverse<(Nanos, u64)>, ActivationEvent)>>,
    seq: AtomicU64,
}

impl ActivationTimeline {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event. Callable from any thread.
    pub fn push(&self, event: ActivationEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.events
            .lock()
            .push((Reverse((event.timestamp, seq)), event));
    }

    /// Dequeue every event with `timestamp <= t` in timestamp order. With
    /// `eof` set, the window is unbounded and the timeline drains completely.
    pub(crate) fn drain_up_to(&self, t: Nanos, eof: bool) -> Vec<ActivationEvent> {
        let mut events = self.events.lock();
        let mut drained = Vec::new();
        while let Some(&(Reverse((timestamp, _)), _)) = events.peek() {
            if !eof && timestamp > t {
                break;
            }
            drained.push(events.pop().unwrap().1);
        }
        drained
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
