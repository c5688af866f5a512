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

use std::sync::Arc;

use indextree::NodeId;
use itertools::Itertools;

use crate::activation::{ActivationKind, ActivationTimeline};
use crate::clock::{Clock, Nanos};
use crate::config::Config;
use crate::frame::Frame;
use crate::pool::NodePool;
use crate::tracer::SpanContext;
use crate::tree::{NodeData, PendingChildId};

/// An explicit span currently on the activation stack, remembering the node
/// it was attributed to.
#[derive(Debug, Clone, Copy)]
struct ActiveSpan {
    context: SpanContext,
    activated_at: Nanos,
    owner: NodeId,
}

/// The root of a call tree, tied to a parent trace context.
///
/// Samples and activation events enter here in timestamp order: the root
/// advances the activation timeline to each sample's timestamp, then inserts
/// the sample into the tree. [`end`](Self::end) seals the tree for
/// spanification, and [`recycle`](Self::recycle) returns the nodes to the
/// pool afterwards.
#[derive(Debug)]
pub struct Root {
    pub(crate) node: NodeId,
    pub(crate) parent_context: SpanContext,
    pub(crate) config: Config,
    timeline: Arc<ActivationTimeline>,
    active: Vec<ActiveSpan>,
    cursor: Nanos,
    dropped_samples: u64,
    unmatched_deactivations: u64,
    sealed: bool,
}

impl Root {
    /// Create a root under `parent_context`, borrowing its root node from
    /// `pool`.
    pub fn new(pool: &mut NodePool, parent_context: SpanContext, config: Config) -> Self {
        Self {
            node: pool.acquire(NodeData::root()),
            parent_context,
            config,
            timeline: Arc::new(ActivationTimeline::new()),
            active: Vec::new(),
            cursor: 0,
            dropped_samples: 0,
            unmatched_deactivations: 0,
            sealed: false,
        }
    }

    /// The timeline activation events are pushed into, shared with the
    /// instrumented producer threads.
    pub fn timeline(&self) -> Arc<ActivationTimeline> {
        Arc::clone(&self.timeline)
    }

    /// The serialized parent trace context.
    pub fn parent_context(&self) -> SpanContext {
        self.parent_context
    }

    /// Whether [`end`](Self::end) has sealed the tree.
    pub fn is_ended(&self) -> bool {
        self.sealed
    }

    /// Number of samples dropped for arriving out of order or after sealing.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Number of deactivations without a matching activation.
    pub fn unmatched_deactivations(&self) -> u64 {
        self.unmatched_deactivations
    }

    /// Total number of samples applied to this tree.
    pub fn sample_count(&self, pool: &NodePool) -> u64 {
        pool.node(self.node).count
    }

    /// Consume every buffered activation event with a timestamp up to `t`.
    /// With `eof` set, the whole buffer is consumed regardless of `t`.
    pub fn process_activation_events_up_to(&mut self, pool: &mut NodePool, t: Nanos, eof: bool) {
        for event in self.timeline.drain_up_to(t, eof) {
            if event.trace_id != self.parent_context.trace_id() {
                tracing::debug!(?event, "activation event from a foreign trace, skipping");
                continue;
            }
            self.cursor = self.cursor.max(event.timestamp);
            match event.kind {
                ActivationKind::Activate => {
                    self.on_activation(pool, event.span_context(), event.timestamp)
                }
                ActivationKind::Deactivate => {
                    self.on_deactivation(pool, event.span_context(), event.timestamp)
                }
            }
        }
    }

    /// Insert one stack sample taken at `t`, frames ordered bottom first.
    ///
    /// Activation events up to `t` are consumed beforehand. Samples that
    /// precede the current cursor are dropped and counted.
    pub fn add_stack_trace(&mut self, pool: &mut NodePool, frames: &[Frame], t: Nanos) {
        if self.sealed {
            self.dropped_samples += 1;
            tracing::debug!(timestamp = t, "sample after end, dropping");
            return;
        }
        self.process_activation_events_up_to(pool, t, false);
        if t < self.cursor {
            self.dropped_samples += 1;
            tracing::debug!(
                timestamp = t,
                cursor = self.cursor,
                "out-of-order sample, dropping"
            );
            return;
        }
        self.cursor = t;

        let mut cursor = self.node;
        self.bump(pool, cursor, t);
        for frame in frames {
            cursor = match pool.last_child(cursor) {
                Some(tail)
                    if !pool.node(tail).ended && pool.node(tail).frame.as_ref() == Some(frame) =>
                {
                    self.bump(pool, tail, t);
                    tail
                }
                _ => {
                    // The sample diverges from the last path: whatever ran
                    // there has returned.
                    pool.end_open_children(cursor);
                    let depth = pool.node(cursor).depth + 1;
                    let child = pool.acquire(NodeData::sampled(frame.clone(), t, depth));
                    cursor.append(child, pool.arena_mut());
                    child
                }
            };
        }
        // Frames deeper than this sample's leaf are no longer on the stack;
        // a later identical frame is a new invocation, not a continuation.
        pool.end_open_children(cursor);
    }

    fn bump(&self, pool: &mut NodePool, node: NodeId, t: Nanos) {
        let data = pool.node_mut(node);
        if data.count == 0 {
            data.start = t;
        }
        data.count += 1;
        data.last_seen = t;
    }

    fn on_activation(&mut self, pool: &mut NodePool, context: SpanContext, t: Nanos) {
        let owner = pool.deepest_open(self.node);
        pool.node_mut(owner)
            .child_ids
            .push(PendingChildId::new(context, t));
        self.active.push(ActiveSpan {
            context,
            activated_at: t,
            owner,
        });
    }

    fn on_deactivation(&mut self, pool: &mut NodePool, context: SpanContext, t: Nanos) {
        let Some(pos) = self.active.iter().rposition(|a| a.context == context) else {
            self.unmatched_deactivations += 1;
            tracing::debug!(?context, "deactivation without matching activation, ignoring");
            return;
        };
        let span = self.active.remove(pos);
        if let Some(id) = pool
            .node_mut(span.owner)
            .child_ids
            .iter_mut()
            .rev()
            .find(|id| id.context() == span.context)
        {
            id.deactivate(t);
        }
        let owner = self.resolve_owner(pool, span.owner, span.activated_at, t);
        if t > pool.node(owner).last_seen {
            // Deactivation after the owner's last sample: the method must
            // have extended past it.
            pool.extend_last_seen(owner, t);
        }
    }

    /// Re-home a deactivated span's pending id to the node whose observed
    /// lifetime actually contains the activation.
    fn resolve_owner(
        &mut self,
        pool: &mut NodePool,
        mut owner: NodeId,
        activated_at: Nanos,
        deactivated_at: Nanos,
    ) -> NodeId {
        // Climb: an activation later than everything the holder observed
        // belongs to an ancestor that was still alive at activation time.
        // The id being resolved is necessarily the newest one left on the
        // holder, so moving the last id moves the right one.
        while owner != self.node {
            let data = pool.node(owner);
            if data.start <= activated_at && activated_at <= data.last_seen {
                break;
            }
            let parent = pool
                .parent(owner)
                .expect("non-root node must have a parent");
            pool.give_last_child_id_to(owner, parent);
            owner = parent;
        }
        // Descend: a child whose observed lifetime contains the activation is
        // the tighter owner. It takes every pending id activated within its
        // window along, and nothing else.
        loop {
            let children: Vec<NodeId> = owner.children(pool.arena()).collect();
            let next = children.into_iter().rev().find(|child| {
                let data = pool.node(*child);
                data.start <= activated_at
                    && activated_at <= data.last_seen
                    && (deactivated_at <= data.last_seen || !data.ended)
            });
            match next {
                Some(child) => {
                    let (since, until) = {
                        let data = pool.node(child);
                        (data.start, data.last_seen)
                    };
                    pool.steal_child_ids_from(child, owner, since, until);
                    self.rehome_active(owner, child, since, until);
                    owner = child;
                }
                None => break,
            }
        }
        debug_assert!(owner == self.node || pool.is_successor_of(owner, self.node));
        owner
    }

    /// Keep the recorded owners of still-active spans in sync after a steal.
    fn rehome_active(&mut self, from: NodeId, to: NodeId, since: Nanos, until: Nanos) {
        for span in &mut self.active {
            if span.owner == from && (since..=until).contains(&span.activated_at) {
                span.owner = to;
            }
        }
    }

    /// Seal the tree: consume the remaining activation events, treat every
    /// still-active span as deactivated at the final observed timestamp, and
    /// mark every node ended. Terminal; later samples are dropped.
    pub fn end<C: Clock>(&mut self, pool: &mut NodePool, clock: &C) {
        if self.sealed {
            return;
        }
        self.process_activation_events_up_to(pool, Nanos::MAX, true);
        let final_ts = if self.cursor > 0 {
            self.cursor
        } else {
            clock.now()
        };
        while let Some(span) = self.active.last().copied() {
            self.on_deactivation(pool, span.context, final_ts.max(span.activated_at));
        }
        let nodes: Vec<NodeId> = self.node.descendants(pool.arena()).collect();
        for node in nodes {
            pool.node_mut(node).ended = true;
        }
        self.sealed = true;
    }

    /// Return every node of this tree to the pool. Call after spanification;
    /// the root is unusable afterwards.
    pub fn recycle(self, pool: &mut NodePool) {
        pool.release(self.node);
    }

    /// Render the aggregated tree for diagnostics.
    pub fn render(&self, pool: &NodePool) -> String {
        let mut out = String::new();
        self.render_node(&mut out, pool, self.node, 0);
        out
    }

    fn render_node(&self, out: &mut String, pool: &NodePool, node: NodeId, depth: usize) {
        let data = pool.node(node);
        let name = match &data.frame {
            Some(frame) => frame.to_string(),
            None => "<root>".to_string(),
        };
        let pending = if pool.has_child_ids(node) {
            format!(" ids={}", data.child_ids.len())
        } else {
            String::new()
        };
        out.push_str(&" ".repeat(depth * 2));
        out.push_str(&format!(
            "{} count={} [{}..{}]{}{}\n",
            name,
            data.count,
            data.start,
            data.last_seen,
            if data.ended { " ended" } else { "" },
            pending,
        ));
        for child in node
            .children(pool.arena())
            .sorted_by_key(|&id| pool.node(id).start)
        {
            self.render_node(out, pool, child, depth + 1);
        }
    }
}
