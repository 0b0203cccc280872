//! The primitive graph and its processing order.

use std::collections::BTreeSet;

use crate::error::GraphError;
use crate::layout::Layout;
use crate::node::{FusedOp, NodeId, PrimitiveKind, ProgramNode};

/// A lowered primitive graph plus a topological processing order.
///
/// Nodes live in an arena owned by the program and refer to each other by
/// [`NodeId`]. Removal is a tombstone: the slot stays so that ids remain
/// stable, and dead nodes are excluded from the processing order.
#[derive(Debug, Default)]
pub struct Program {
    nodes: Vec<ProgramNode>,
    /// Topological order over live nodes, rebuilt after structural edits.
    processing_order: Vec<NodeId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id. The processing order is stale until
    /// [`rebuild_processing_order`](Self::rebuild_processing_order) runs.
    pub fn add_node(
        &mut self,
        kind: PrimitiveKind,
        name: impl Into<String>,
        deps: Vec<NodeId>,
        output_layout: Layout,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for &d in &deps {
            assert!(
                d.index() < self.nodes.len(),
                "dependency {d} of new node does not exist"
            );
        }
        self.nodes.push(ProgramNode {
            id,
            kind,
            name: name.into(),
            deps,
            is_output: false,
            fused_ops: Vec::new(),
            output_layout,
            memory_deps: BTreeSet::new(),
            dead: false,
        });
        id
    }

    /// Shorthand for a constant node.
    pub fn add_data(&mut self, name: impl Into<String>, layout: Layout) -> NodeId {
        self.add_node(PrimitiveKind::Data, name, Vec::new(), layout)
    }

    /// Marks a node as a graph output.
    pub fn mark_output(&mut self, id: NodeId) {
        self.node_mut(id).is_output = true;
    }

    pub fn node(&self, id: NodeId) -> &ProgramNode {
        let n = &self.nodes[id.index()];
        assert!(!n.dead, "access to removed node {id}");
        n
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ProgramNode {
        let n = &mut self.nodes[id.index()];
        assert!(!n.dead, "access to removed node {id}");
        n
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len() && !self.nodes[id.index()].dead
    }

    /// Iterates over live nodes in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = &ProgramNode> {
        self.nodes.iter().filter(|n| !n.dead)
    }

    /// The current topological processing order.
    pub fn processing_order(&self) -> &[NodeId] {
        &self.processing_order
    }

    /// All live nodes that list `id` as a dependency, in arena order.
    pub fn users_of(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.deps.contains(&id))
            .map(|n| n.id)
            .collect()
    }

    /// Records that `a` and `b` must never share an output buffer.
    /// Always symmetric.
    pub fn add_memory_dependency(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        assert!(self.is_live(a) && self.is_live(b), "memory dep on dead node");
        self.nodes[a.index()].memory_deps.insert(b);
        self.nodes[b.index()].memory_deps.insert(a);
    }

    /// Splices a new node between `user` and its `dep_idx`-th dependency.
    ///
    /// After the call `user`'s slot points at the new node and the new node
    /// depends on the previous occupant. The processing order is rebuilt.
    pub fn add_intermediate(
        &mut self,
        user: NodeId,
        dep_idx: usize,
        kind: PrimitiveKind,
        name: impl Into<String>,
        output_layout: Layout,
    ) -> NodeId {
        let prev = self.node(user).dependency(dep_idx);
        let mid = self.add_node(kind, name, vec![prev], output_layout);
        self.node_mut(user).deps[dep_idx] = mid;
        self.rebuild_processing_order();
        mid
    }

    /// Tombstones a node. The caller must have rewired all users first.
    ///
    /// # Panics
    ///
    /// Panics if any live node still depends on `id`.
    pub fn remove_node(&mut self, id: NodeId) {
        let users = self.users_of(id);
        assert!(
            users.is_empty(),
            "removing {id} while {} node(s) still depend on it",
            users.len()
        );
        let memory_deps = std::mem::take(&mut self.nodes[id.index()].memory_deps);
        for peer in memory_deps {
            self.nodes[peer.index()].memory_deps.remove(&id);
        }
        self.nodes[id.index()].dead = true;
        self.processing_order.retain(|&n| n != id);
    }

    /// Recomputes the processing order with a deterministic Kahn sweep:
    /// among ready nodes the lowest id goes first, so the order is a pure
    /// function of the graph.
    ///
    /// # Panics
    ///
    /// Panics on a dependency cycle; construction APIs cannot create one.
    pub fn rebuild_processing_order(&mut self) {
        let mut indegree = vec![0usize; self.nodes.len()];
        for n in self.nodes.iter().filter(|n| !n.dead) {
            for &d in &n.deps {
                assert!(!self.nodes[d.index()].dead, "{}: dep {d} is dead", n.name);
            }
            indegree[n.id.index()] = n.deps.len();
        }

        let mut ready: BTreeSet<NodeId> = self
            .nodes
            .iter()
            .filter(|n| !n.dead && n.deps.is_empty())
            .map(|n| n.id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(&id) = ready.iter().next() {
            ready.remove(&id);
            order.push(id);
            for user in self.users_of(id) {
                // A user with a duplicate edge to `id` decrements once per edge.
                let edges = self.nodes[user.index()]
                    .deps
                    .iter()
                    .filter(|&&d| d == id)
                    .count();
                indegree[user.index()] -= edges.min(indegree[user.index()]);
                if indegree[user.index()] == 0 && !order.contains(&user) {
                    ready.insert(user);
                }
            }
        }

        let live = self.nodes.iter().filter(|n| !n.dead).count();
        assert_eq!(order.len(), live, "dependency cycle in primitive graph");
        self.processing_order = order;
    }

    /// Checks structural invariants, returning the first violation.
    pub fn validate(&self) -> Result<(), GraphError> {
        for n in self.nodes() {
            for &d in &n.deps {
                if !self.is_live(d) {
                    return Err(GraphError::DanglingDependency {
                        node: n.name.clone(),
                        dep: d,
                    });
                }
            }
            let spec = n.kind.operand_spec();
            let fixed = spec.input_count + spec.weight_count;
            let base = n.deps.len() - n.fused_input_count().min(n.deps.len());
            if base < fixed {
                return Err(GraphError::OperandCount {
                    node: n.name.clone(),
                    kind: n.kind,
                    expected: fixed,
                    got: base,
                });
            }
            for &peer in &n.memory_deps {
                if !self.is_live(peer) || !self.nodes[peer.index()].memory_deps.contains(&n.id) {
                    return Err(GraphError::AsymmetricMemoryDep {
                        node: n.name.clone(),
                        peer,
                    });
                }
            }
        }

        let mut seen = BTreeSet::new();
        for &id in &self.processing_order {
            let n = self.node(id);
            for &d in &n.deps {
                if !seen.contains(&d) {
                    return Err(GraphError::OrderViolation {
                        node: n.name.clone(),
                        dep: d,
                    });
                }
            }
            seen.insert(id);
        }
        if seen.len() != self.nodes().count() {
            return Err(GraphError::StaleOrder {
                ordered: seen.len(),
                live: self.nodes().count(),
            });
        }
        Ok(())
    }
}
