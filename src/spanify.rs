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

use indextree::NodeId;

use crate::clock::{Clock, Nanos};
use crate::frame::Frame;
use crate::pool::NodePool;
use crate::root::Root;
use crate::tracer::{SpanContext, Tracer};
use crate::tree::PendingChildId;

/// Errors surfacing programmer mistakes around spanification.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SpanifyError {
    /// `spanify` was called before [`Root::end`] sealed the tree.
    #[error("the call tree has not been ended yet")]
    UnendedTree,
}

/// Strategy redirecting an inferred span to an explicit parent.
///
/// When a node is emitted, the pending child ids held by its surviving
/// ancestor are offered to the policy; returning a context makes that
/// explicit span the emitted parent instead of the ancestor itself.
pub trait ParentOverride {
    /// Choose an explicit parent for a node observed over
    /// `[start, last_seen]`, or `None` to keep the emitted ancestor chain.
    fn resolve(
        &self,
        start: Nanos,
        last_seen: Nanos,
        pending: &[PendingChildId],
        now: Nanos,
    ) -> Option<SpanContext>;
}

/// The default strategy: the innermost explicit span whose activation window
/// covers the node's whole observed lifetime becomes its parent. A window
/// without an observed deactivation extends to `now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationWindow;

impl ParentOverride for ActivationWindow {
    fn resolve(
        &self,
        start: Nanos,
        last_seen: Nanos,
        pending: &[PendingChildId],
        now: Nanos,
    ) -> Option<SpanContext> {
        pending
            .iter()
            .filter(|id| {
                id.activated_at() <= start && id.deactivated_at().unwrap_or(now) >= last_seen
            })
            .max_by_key(|id| id.activated_at())
            .map(|id| id.context())
    }
}

impl Root {
    /// Convert the sealed tree into inferred spans emitted through `tracer`.
    ///
    /// Pre-order from the root: parents start before their children, and a
    /// span ends only after its whole subtree was emitted, so links can still
    /// be attached when a dropped descendant hands its pending child ids up.
    /// Nodes below the configured minimum duration and pillars are dropped;
    /// their frames ride along to the surviving descendants as the stack
    /// trace attribute, nearest frame first. Every pending child id held by
    /// an emitted node becomes an `is_child` link on that node's span. Ids
    /// left on the root need no link: those explicit spans already are
    /// natural children of the transaction.
    ///
    /// Returns the number of emitted spans.
    pub fn spanify<T, C, P>(
        &self,
        pool: &NodePool,
        tracer: &mut T,
        clock: &C,
        policy: &P,
    ) -> Result<usize, SpanifyError>
    where
        T: Tracer,
        C: Clock,
        P: ParentOverride,
    {
        if !self.is_ended() {
            return Err(SpanifyError::UnendedTree);
        }
        let mut spanifier = Spanifier {
            pool,
            tracer,
            policy,
            min_nanos: self.config.min_nanos(),
            now: clock.now(),
            emitted: 0,
        };
        let mut held = pool.node(self.node).child_ids.clone();
        let children: Vec<NodeId> = self.node.children(pool.arena()).collect();
        for child in children {
            let bubbled = spanifier.emit(child, self.parent_context, &held, Vec::new());
            held.extend(bubbled);
        }
        Ok(spanifier.emitted)
    }
}

struct Spanifier<'a, T: Tracer, P: ParentOverride> {
    pool: &'a NodePool,
    tracer: &'a mut T,
    policy: &'a P,
    min_nanos: Nanos,
    now: Nanos,
    emitted: usize,
}

impl<T: Tracer, P: ParentOverride> Spanifier<'_, T, P> {
    /// Emit the subtree rooted at `id`. Returns the pending child ids a
    /// dropped node hands up to its first surviving ancestor.
    fn emit(
        &mut self,
        id: NodeId,
        parent: SpanContext,
        ancestor_pending: &[PendingChildId],
        skipped: Vec<Frame>,
    ) -> Vec<PendingChildId> {
        let (frame, start, last_seen, own_ids) = {
            let data = self.pool.node(id);
            (
                data.frame.clone().expect("non-root node must carry a frame"),
                data.start,
                data.last_seen,
                data.child_ids.clone(),
            )
        };
        let children: Vec<NodeId> = id.children(self.pool.arena()).collect();

        let surviving =
            self.pool.node(id).duration() >= self.min_nanos && !self.pool.is_pillar(id);
        if !surviving {
            let mut bubbled = own_ids;
            // Descendants may still be parented by the spans we hand up.
            let merged: Vec<PendingChildId> = ancestor_pending
                .iter()
                .chain(bubbled.iter())
                .copied()
                .collect();
            for child in children {
                let mut frames = vec![frame.clone()];
                frames.extend(skipped.iter().cloned());
                bubbled.extend(self.emit(child, parent, &merged, frames));
            }
            return bubbled;
        }

        let parent = self
            .policy
            .resolve(start, last_seen, ancestor_pending, self.now)
            .unwrap_or(parent);
        let mut handle = self.tracer.start_span(&frame.to_string(), parent, start);
        self.emitted += 1;
        if !skipped.is_empty() {
            self.tracer.record_stack_trace(&mut handle, &skipped);
        }
        let context = self.tracer.span_context(&handle);
        let mut held = own_ids;
        for child in children {
            let bubbled = self.emit(child, context, &held, Vec::new());
            held.extend(bubbled);
        }
        for id in &held {
            self.tracer.add_link(&mut handle, id.context(), true);
        }
        self.tracer.end_span(handle, last_seen);
        Vec::new()
    }
}
