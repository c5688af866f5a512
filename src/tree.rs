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

use crate::clock::Nanos;
use crate::frame::Frame;
use crate::pool::NodePool;
use crate::tracer::SpanContext;

/// A pending reference to an explicit span whose parent in the emitted tree
/// is determined during spanification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChildId {
    context: SpanContext,
    activated_at: Nanos,
    deactivated_at: Option<Nanos>,
}

impl PendingChildId {
    pub(crate) fn new(context: SpanContext, activated_at: Nanos) -> Self {
        Self {
            context,
            activated_at,
            deactivated_at: None,
        }
    }

    /// The explicit span this id refers to.
    pub fn context(&self) -> SpanContext {
        self.context
    }

    /// When the span became the current span on its thread.
    pub fn activated_at(&self) -> Nanos {
        self.activated_at
    }

    /// When the span ceased to be current, if that has been observed.
    pub fn deactivated_at(&self) -> Option<Nanos> {
        self.deactivated_at
    }

    pub(crate) fn deactivate(&mut self, at: Nanos) {
        self.deactivated_at = Some(at);
    }
}

/// State of one call tree vertex. Parent and child edges live in the pool's
/// arena; the order of children is the order they were first observed in, and
/// sample insertion only ever inspects the last child.
#[derive(Debug, Default)]
pub(crate) struct NodeData {
    /// The frame this node represents. `None` marks the root.
    pub(crate) frame: Option<Frame>,
    /// Number of stack samples that reached this node.
    pub(crate) count: u64,
    /// Timestamp of the first sample that reached this node.
    pub(crate) start: Nanos,
    /// Timestamp of the most recent sample, possibly extended by a late
    /// deactivation of a span this node owns.
    pub(crate) last_seen: Nanos,
    /// Distance from the root.
    pub(crate) depth: usize,
    /// Terminal flag: no further samples may merge into this node.
    pub(crate) ended: bool,
    /// Activation events attributed to this node but not yet resolved to a
    /// concrete child span in the emitted output.
    pub(crate) child_ids: Vec<PendingChildId>,
}

impl NodeData {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn sampled(frame: Frame, t: Nanos, depth: usize) -> Self {
        Self {
            frame: Some(frame),
            count: 1,
            start: t,
            last_seen: t,
            depth,
            ended: false,
            child_ids: Vec::new(),
        }
    }

    pub(crate) fn duration(&self) -> Nanos {
        self.last_seen - self.start
    }
}

/// Node-level operations. They all take the pool the nodes live in, since the
/// arena is the single owner of the graph.
impl NodePool {
    pub(crate) fn node(&self, id: NodeId) -> &NodeData {
        self.arena()[id].get()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.arena_mut()[id].get_mut()
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena()[id].parent()
    }

    pub(crate) fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.arena()[id].last_child()
    }

    /// Whether walking parent references from `node` reaches `ancestor`.
    pub(crate) fn is_successor_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        node.ancestors(self.arena()).skip(1).any(|a| a == ancestor)
    }

    /// The leaf of the last non-ended path, i.e. the node a fresh activation
    /// is attributed to. Returns `root` itself when the tree has no open path.
    pub(crate) fn deepest_open(&self, root: NodeId) -> NodeId {
        let mut node = root;
        while let Some(child) = self.last_child(node) {
            if self.node(child).ended {
                break;
            }
            node = child;
        }
        node
    }

    /// Mark every open child subtree of `id` as ended. Called when a sample
    /// diverges from the last path: a closed subtree cannot receive more
    /// samples, and a later identical frame starts a sibling.
    pub(crate) fn end_open_children(&mut self, id: NodeId) {
        let open: Vec<NodeId> = id
            .children(self.arena())
            .filter(|child| !self.node(*child).ended)
            .collect();
        for child in open {
            let subtree: Vec<NodeId> = child.descendants(self.arena()).collect();
            for node in subtree {
                self.node_mut(node).ended = true;
            }
        }
    }

    /// Move the newest pending child id from `donor` to `recipient`,
    /// preserving its activation window. A donor without pending ids is a
    /// silent no-op.
    pub(crate) fn give_last_child_id_to(&mut self, donor: NodeId, recipient: NodeId) {
        if let Some(id) = self.node_mut(donor).child_ids.pop() {
            self.node_mut(recipient).child_ids.push(id);
        }
    }

    /// Move every pending child id whose activation time lies in
    /// `[since, until]` from `donor` to `recipient`. Ids of activations that
    /// are not temporally contained stay behind.
    pub(crate) fn steal_child_ids_from(
        &mut self,
        recipient: NodeId,
        donor: NodeId,
        since: Nanos,
        until: Nanos,
    ) {
        let mut taken = Vec::new();
        self.node_mut(donor).child_ids.retain(|id| {
            if (since..=until).contains(&id.activated_at()) {
                taken.push(*id);
                false
            } else {
                true
            }
        });
        self.node_mut(recipient).child_ids.extend(taken);
    }

    pub(crate) fn has_child_ids(&self, id: NodeId) -> bool {
        !self.node(id).child_ids.is_empty()
    }

    /// Extend `last_seen` of `id` and of every ancestor to at least `t`, so
    /// that interval containment holds after a deactivation postdating the
    /// last sample.
    pub(crate) fn extend_last_seen(&mut self, id: NodeId, t: Nanos) {
        let chain: Vec<NodeId> = id.ancestors(self.arena()).collect();
        for node in chain {
            let data = self.node_mut(node);
            if data.last_seen >= t {
                break;
            }
            data.last_seen = t;
        }
    }

    /// A pillar is an intermediate node with exactly one child over its whole
    /// observed lifetime: every sample that reached it went on to the child.
    pub(crate) fn is_pillar(&self, id: NodeId) -> bool {
        let mut children = id.children(self.arena());
        match (children.next(), children.next()) {
            (Some(only), None) => self.node(only).count == self.node(id).count,
            _ => false,
        }
    }
}
