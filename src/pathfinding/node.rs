//! Search node arena and priority frontier scoped to one search call

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::map::GridPosition;

/// Index of a node inside its [`NodeArena`]
pub type NodeId = usize;

/// A discovered cell of one search invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchNode {
    /// Terrain traversal cost of this cell
    pub cost: f32,
    /// Running path cost, the priority key
    pub total_cost: f32,
    pub position: GridPosition,
    /// Back-reference into the same arena
    pub predecessor: Option<NodeId>,
    /// Steps from the origin
    pub depth: u32,
    /// Consecutive never-observed cells leading here
    pub uncertainty: u32,
}

impl SearchNode {
    /// Node the search starts from
    pub fn origin(position: GridPosition) -> Self {
        Self {
            cost: 1.0,
            total_cost: 0.0,
            position,
            predecessor: None,
            depth: 0,
            uncertainty: 0,
        }
    }

    /// Freshly discovered node, not yet reached by any relaxation
    pub fn discovered(position: GridPosition, cost: f32, unseen: bool) -> Self {
        Self {
            cost,
            total_cost: f32::INFINITY,
            position,
            predecessor: None,
            depth: 0,
            uncertainty: u32::from(unseen),
        }
    }
}

/// What the arena knows about a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Classified as impassable; never expanded
    Blocked,
    Open(NodeId),
}

/// Owns every node of a single search; dropped when the search returns
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<SearchNode>,
    slots: HashMap<GridPosition, Slot>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, position: &GridPosition) -> Option<Slot> {
        self.slots.get(position).copied()
    }

    /// Register a node for an unclassified position
    pub fn insert(&mut self, node: SearchNode) -> NodeId {
        let id = self.nodes.len();
        self.slots.insert(node.position, Slot::Open(id));
        self.nodes.push(node);
        id
    }

    pub fn block(&mut self, position: GridPosition) {
        self.slots.insert(position, Slot::Blocked);
    }

    pub fn node(&self, id: NodeId) -> &SearchNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SearchNode {
        &mut self.nodes[id]
    }

    /// Node ids from `id` back to the origin (inclusive)
    pub fn chain(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |&current| self.nodes[current].predecessor)
    }

    /// Nodes allocated so far
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    total_cost: f32,
    seq: u64,
    node: NodeId,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap; earlier insertion wins ties
        other
            .total_cost
            .total_cmp(&self.total_cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of nodes keyed on total cost
#[derive(Debug, Default)]
pub struct Frontier {
    heap: BinaryHeap<FrontierEntry>,
    next_seq: u64,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, total_cost: f32, node: NodeId) {
        self.heap.push(FrontierEntry {
            total_cost,
            seq: self.next_seq,
            node,
        });
        self.next_seq += 1;
    }

    /// Cheapest entry as (cost it was queued with, node)
    pub fn pop(&mut self) -> Option<(f32, NodeId)> {
        self.heap.pop().map(|entry| (entry.total_cost, entry.node))
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
