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

use indextree::{Arena, NodeId};

use crate::tree::NodeData;

/// A bounded, recyclable arena of call tree nodes.
///
/// The arena owns every node and defines the lifetime of the node graph:
/// parent and child relations are non-owning [`NodeId`] handles into it, so
/// the cyclic parent back-references of the tree need no reference counting.
///
/// The pool has process-wide lifetime and is injected explicitly wherever
/// nodes are created or released. It is used from a single worker thread and
/// needs no synchronization. The capacity is a hint, not a cap: when all
/// slots are live, `acquire` falls back to direct allocation and warns once.
#[derive(Debug)]
pub struct NodePool {
    arena: Arena<NodeData>,
    capacity: usize,
    live: usize,
    exhaustion_logged: bool,
}

impl NodePool {
    /// Create a pool keeping up to `capacity` nodes ready for reuse.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: Arena::with_capacity(capacity),
            capacity,
            live: 0,
            exhaustion_logged: false,
        }
    }

    /// Hand out a node slot holding `data`, reusing a released slot if one is
    /// available.
    pub(crate) fn acquire(&mut self, data: NodeData) -> NodeId {
        if self.live >= self.capacity && !self.exhaustion_logged {
            tracing::warn!(
                capacity = self.capacity,
                "node pool exhausted, falling back to direct allocation"
            );
            self.exhaustion_logged = true;
        }
        self.live += 1;
        self.arena.new_node(data)
    }

    /// Return `node` and its whole subtree to the pool.
    ///
    /// All node state is dropped with the slot, so a re-acquired slot exposes
    /// no data from its prior life.
    pub(crate) fn release(&mut self, node: NodeId) {
        let released = node.descendants(&self.arena).count();
        node.remove_subtree(&mut self.arena);
        self.live -= released;
    }

    /// Nodes currently handed out.
    pub fn live(&self) -> usize {
        self.live
    }

    /// The configured reuse capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn arena(&self) -> &Arena<NodeData> {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena<NodeData> {
        &mut self.arena
    }
}
