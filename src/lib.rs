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

//! Reconstruct **inferred spans** from periodic stack-trace samples and
//! reconcile them with explicit span activations.
//!
//! Stack samples taken by a sampling profiler are merged into a prefix tree
//! counting how often each call path was observed. Activation events emitted
//! by instrumented code interleave into the same timeline, and common timing
//! skew between the two streams is resolved by re-homing activations to the
//! node whose observed lifetime actually contains them. Once a [`Root`] is
//! ended, spanification turns each qualifying node into an inferred span
//! emitted through the [`Tracer`] port, with `is_child` links wherever the
//! reconstructed hierarchy disagrees with the recorded parent pointers.
//!
//! # Example
//!
//! ```rust
//! use inferred_spans::{
//!     ActivationEvent, ActivationWindow, Config, Frame, ManualClock, NodePool, Root,
//!     SpanContext, SpanId, TraceId, Tracer,
//! };
//!
//! # struct CountingTracer(u64);
//! # impl Tracer for CountingTracer {
//! #     type Handle = SpanContext;
//! #     fn start_span(&mut self, _name: &str, parent: SpanContext, _start: u64) -> SpanContext {
//! #         self.0 += 1;
//! #         SpanContext::new(parent.trace_id(), SpanId::new(self.0))
//! #     }
//! #     fn span_context(&self, handle: &SpanContext) -> SpanContext {
//! #         *handle
//! #     }
//! #     fn add_link(&mut self, _: &mut SpanContext, _: SpanContext, _: bool) {}
//! #     fn record_stack_trace(&mut self, _: &mut SpanContext, _: &[Frame]) {}
//! #     fn end_span(&mut self, _: SpanContext, _: u64) {}
//! # }
//! #
//! let mut pool = NodePool::with_capacity(64);
//! let trace = TraceId::new(0xfeed);
//! let transaction = SpanContext::new(trace, SpanId::new(1));
//! let mut root = Root::new(&mut pool, transaction, Config::default());
//!
//! // An explicit child span toggles while the sampled methods run.
//! let timeline = root.timeline();
//! timeline.push(ActivationEvent::activate(SpanId::new(2), trace, transaction, 15));
//! timeline.push(ActivationEvent::deactivate(SpanId::new(2), trace, transaction, 35));
//!
//! let stack = [Frame::new("Server", "handle"), Frame::new("Db", "query")];
//! for t in [10, 20] {
//!     root.add_stack_trace(&mut pool, &stack[..1], t);
//! }
//! for t in [30, 40] {
//!     root.add_stack_trace(&mut pool, &stack, t);
//! }
//!
//! let clock = ManualClock::new(50);
//! root.end(&mut pool, &clock);
//!
//! let mut tracer = CountingTracer(100);
//! let emitted = root
//!     .spanify(&pool, &mut tracer, &clock, &ActivationWindow)
//!     .unwrap();
//! assert_eq!(emitted, 2);
//! assert_eq!(root.sample_count(&pool), 4);
//!
//! root.recycle(&mut pool);
//! ```

#![forbid(missing_docs)]

mod activation;
mod clock;
mod config;
mod frame;
mod pool;
mod root;
mod spanify;
mod tracer;
mod tree;

pub use activation::{ActivationEvent, ActivationKind, ActivationTimeline};
pub use clock::{Clock, ManualClock, Nanos, SystemClock};
pub use config::{Config, ConfigBuilder, ConfigBuilderError};
pub use frame::Frame;
pub use pool::NodePool;
pub use root::Root;
pub use spanify::{ActivationWindow, ParentOverride, SpanifyError};
pub use tracer::{SpanContext, SpanId, TraceId, Tracer};
pub use tree::PendingChildId;

#[cfg(test)]
mod tests;
