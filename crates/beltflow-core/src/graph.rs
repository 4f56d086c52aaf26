use crate::id::*;
use crate::ratio::Ratio;
use slotmap::SlotMap;
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Node classification
// ---------------------------------------------------------------------------

/// Structural classification of a node, derived from its degree as
/// `(min(ins, 2), min(outs, 2))`. Quantities play no part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// (0, 0)
    Island,
    /// (0, 1)
    Source,
    /// (0, 2+)
    SourceSplitter,
    /// (1, 0)
    Destination,
    /// (1, 1)
    PassThrough,
    /// (1, 2+)
    Splitter,
    /// (2+, 0)
    MergerDestination,
    /// (2+, 1)
    Merger,
    /// (2+, 2+)
    MergeSplitter,
}

impl NodeType {
    /// Classify from incoming and outgoing link counts.
    pub fn from_degree(ins: usize, outs: usize) -> Self {
        match (ins.min(2), outs.min(2)) {
            (0, 0) => NodeType::Island,
            (0, 1) => NodeType::Source,
            (0, 2) => NodeType::SourceSplitter,
            (1, 0) => NodeType::Destination,
            (1, 1) => NodeType::PassThrough,
            (1, 2) => NodeType::Splitter,
            (2, 0) => NodeType::MergerDestination,
            (2, 1) => NodeType::Merger,
            (2, 2) => NodeType::MergeSplitter,
            (i, o) => unreachable!("unknown node classification ({i}, {o})"),
        }
    }

    /// Lowercase display name.
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Island => "island",
            NodeType::Source => "source",
            NodeType::SourceSplitter => "source-splitter",
            NodeType::Destination => "destination",
            NodeType::PassThrough => "pass-through",
            NodeType::Splitter => "splitter",
            NodeType::MergerDestination => "merger-destination",
            NodeType::Merger => "merger",
            NodeType::MergeSplitter => "merge-splitter",
        }
    }
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// A junction or endpoint.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Quantity resident at the node, not yet routed onward.
    holding: Ratio,
    /// Links whose destination is this node, in creation order.
    ins: Vec<LinkId>,
    /// Links whose source is this node, in creation order.
    outs: Vec<LinkId>,
}

impl Node {
    /// Get the quantity resident at this node.
    pub fn holding(&self) -> Ratio {
        self.holding
    }

    /// Get the edges coming into this node (inputs).
    pub fn ins(&self) -> &[LinkId] {
        &self.ins
    }

    /// Get the edges leaving this node (outputs).
    pub fn outs(&self) -> &[LinkId] {
        &self.outs
    }
}

/// A directed flow edge. `carrying` is fixed for the link's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub src: NodeId,
    pub dst: NodeId,
    pub carrying: Ratio,
}

/// Nodes and links reachable from a set of roots, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct Reachable {
    pub nodes: Vec<NodeId>,
    pub links: Vec<LinkId>,
}

impl Reachable {
    /// Node count plus link count; the size measure the plan search minimizes.
    pub fn size(&self) -> usize {
        self.nodes.len() + self.links.len()
    }
}

// ---------------------------------------------------------------------------
// FlowGraph
// ---------------------------------------------------------------------------

/// Arena of nodes and links with conservation bookkeeping.
///
/// Every mutation is a paired create/destroy: creating a link moves its
/// quantity out of the source's holding and into the destination's;
/// removing it moves the quantity back. Total holding across a component is
/// therefore invariant under every operation here.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: SlotMap<NodeId, Node>,
    links: SlotMap<LinkId, Link>,
}

impl FlowGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            links: SlotMap::with_key(),
        }
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Add a node holding `holding`. Returns its id.
    pub fn add_node(&mut self, holding: Ratio) -> NodeId {
        self.nodes.insert(Node {
            holding,
            ..Node::default()
        })
    }

    /// Unlink every link touching `node`, then delete it.
    ///
    /// Panics if the node still holds a quantity afterwards: deleting it would
    /// destroy flow.
    pub fn remove_node(&mut self, node: NodeId) {
        self.unlink_all_ins(node);
        self.unlink_all_outs(node);
        if let Some(data) = self.nodes.get(node) {
            assert!(
                data.holding.is_zero(),
                "failed unlink: {node:?} left holding {}",
                data.holding
            );
            self.nodes.remove(node);
        }
    }

    /// Move resident quantity from one node to another without a link.
    ///
    /// Used when a node's supply is handed over to a freshly inserted source.
    pub fn transfer_holding(&mut self, from: NodeId, to: NodeId, qty: Ratio) {
        self.nodes[from].holding -= qty;
        self.nodes[to].holding += qty;
    }

    /// Delete every isolated node except those in `keep`. Returns how many
    /// were removed.
    pub fn remove_islands(&mut self, keep: &[NodeId]) -> usize {
        let keep: HashSet<NodeId> = keep.iter().copied().collect();
        let islands: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(id, n)| {
                n.ins.is_empty() && n.outs.is_empty() && n.holding.is_zero() && !keep.contains(id)
            })
            .map(|(id, _)| id)
            .collect();
        for &id in &islands {
            self.nodes.remove(id);
        }
        islands.len()
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Link `src -> dst` carrying `carrying`.
    pub fn link(&mut self, src: NodeId, dst: NodeId, carrying: Ratio) -> LinkId {
        let id = self.links.insert(Link { src, dst, carrying });
        let s = &mut self.nodes[src];
        s.holding -= carrying;
        s.outs.push(id);
        let d = &mut self.nodes[dst];
        d.holding += carrying;
        d.ins.push(id);
        id
    }

    /// Link `src -> dst` carrying `src`'s [`splittable`](Self::splittable)
    /// amount, so all of a splitter's outputs stay equal.
    pub fn link_splittable(&mut self, src: NodeId, dst: NodeId) -> LinkId {
        let carrying = self.splittable(src);
        self.link(src, dst, carrying)
    }

    /// Remove a link, reversing its effect on both holdings.
    /// Returns the removed link, or `None` if it no longer exists.
    pub fn unlink(&mut self, link: LinkId) -> Option<Link> {
        let data = self.links.remove(link)?;
        if let Some(s) = self.nodes.get_mut(data.src) {
            s.holding += data.carrying;
            s.outs.retain(|&l| l != link);
        }
        if let Some(d) = self.nodes.get_mut(data.dst) {
            d.holding -= data.carrying;
            d.ins.retain(|&l| l != link);
        }
        Some(data)
    }

    /// Remove every outgoing link of `node`, returning them in order.
    pub fn unlink_all_outs(&mut self, node: NodeId) -> Vec<Link> {
        let outs = self.outs(node).to_vec();
        outs.into_iter().filter_map(|l| self.unlink(l)).collect()
    }

    /// Remove every incoming link of `node`, returning them in order.
    pub fn unlink_all_ins(&mut self, node: NodeId) -> Vec<Link> {
        let ins = self.ins(node).to_vec();
        ins.into_iter().filter_map(|l| self.unlink(l)).collect()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The link's data, or `None` if it was removed.
    pub fn get_link(&self, link: LinkId) -> Option<&Link> {
        self.links.get(link)
    }

    /// Whether the node still exists.
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// Get the quantity resident at a node.
    pub fn holding(&self, node: NodeId) -> Ratio {
        self.nodes[node].holding
    }

    /// Incoming links of a node (empty if the node does not exist).
    pub fn ins(&self, node: NodeId) -> &[LinkId] {
        self.nodes.get(node).map(|n| n.ins.as_slice()).unwrap_or(&[])
    }

    /// Outgoing links of a node (empty if the node does not exist).
    pub fn outs(&self, node: NodeId) -> &[LinkId] {
        self.nodes.get(node).map(|n| n.outs.as_slice()).unwrap_or(&[])
    }

    /// Get the node a link leaves from.
    pub fn src(&self, link: LinkId) -> NodeId {
        self.links[link].src
    }

    /// Get the node a link enters.
    pub fn dst(&self, link: LinkId) -> NodeId {
        self.links[link].dst
    }

    /// Get the quantity on a link.
    pub fn carrying(&self, link: LinkId) -> Ratio {
        self.links[link].carrying
    }

    /// Destinations of a node's outgoing links, in link order.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.outs(node).iter().map(|&l| self.dst(l)).collect()
    }

    /// Total arriving over a node's incoming links.
    pub fn sum_ins(&self, node: NodeId) -> Ratio {
        self.ins(node).iter().map(|&l| self.carrying(l)).sum()
    }

    /// Total leaving over a node's outgoing links.
    pub fn sum_outs(&self, node: NodeId) -> Ratio {
        self.outs(node).iter().map(|&l| self.carrying(l)).sum()
    }

    /// Quantity a new output should carry to keep the node splitting evenly:
    /// the first existing output's quantity, or the whole holding if none.
    pub fn splittable(&self, node: NodeId) -> Ratio {
        match self.outs(node).first() {
            Some(&l) => self.carrying(l),
            None => self.holding(node),
        }
    }

    /// Quantity each of `r` equal children should carry: zero if the holding
    /// is exhausted, the existing per-child amount if already partly split,
    /// otherwise `holding / r`.
    pub fn split_into(&self, node: NodeId, r: u64) -> Ratio {
        let holding = self.holding(node);
        if holding.is_zero() {
            Ratio::ZERO
        } else if !self.outs(node).is_empty() {
            self.splittable(node)
        } else {
            holding / Ratio::from(r)
        }
    }

    /// Whether every outgoing link carries the same quantity.
    pub fn splits_evenly(&self, node: NodeId) -> bool {
        let first = self.splittable(node);
        self.outs(node).iter().all(|&l| self.carrying(l) == first)
    }

    /// Classify a node by its link degrees.
    pub fn node_type(&self, node: NodeId) -> NodeType {
        NodeType::from_degree(self.ins(node).len(), self.outs(node).len())
    }

    /// What the node would hold before internal routing cancelled it out:
    /// `holding - sum_ins + sum_outs`.
    pub fn net_throughput(&self, node: NodeId) -> Ratio {
        self.holding(node) - self.sum_ins(node) + self.sum_outs(node)
    }

    /// Number of live nodes, reachable or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Iterate over every node in storage order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Iterate over every link in storage order.
    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links.iter()
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// All nodes reachable from `roots` and the links leaving them.
    ///
    /// Depth-first preorder following outgoing links in order; each node's
    /// out-links are recorded when the node is first reached.
    pub fn collect_reachable(&self, roots: &[NodeId]) -> Reachable {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut reachable = Reachable::default();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();

        while let Some(node) = stack.pop() {
            if !self.contains_node(node) || !seen.insert(node) {
                continue;
            }
            reachable.nodes.push(node);
            let outs = self.outs(node);
            reachable.links.extend_from_slice(outs);
            stack.extend(outs.iter().rev().map(|&l| self.dst(l)));
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(v: &str) -> Ratio {
        v.parse().unwrap()
    }

    #[test]
    fn linking_moves_holding() {
        let mut g = FlowGraph::new();
        let n1 = g.add_node(r("5"));
        let n2 = g.add_node(Ratio::ZERO);
        let n3 = g.add_node(Ratio::ZERO);

        g.link_splittable(n1, n2);
        let h = g.holding(n1);
        g.link(n1, n3, h);
        assert_eq!(g.holding(n1), Ratio::ZERO);
        assert_eq!(g.holding(n2), r("5"));
        assert_eq!(g.holding(n3), Ratio::ZERO);

        g.unlink_all_outs(n1);
        assert_eq!(g.holding(n1), r("5"));
        assert_eq!(g.holding(n2), Ratio::ZERO);
        assert_eq!(g.holding(n3), Ratio::ZERO);
        assert_eq!(g.link_count(), 0);

        g.link(n1, n2, r("1"));
        g.link(n1, n2, r("1"));
        g.link(n1, n3, r("1.75"));
        assert_eq!(g.holding(n1), r("1.25"));
        assert_eq!(g.holding(n2), r("2"));
        assert_eq!(g.holding(n3), r("1.75"));
        assert_eq!(g.sum_outs(n1), r("3.75"));
        assert_eq!(g.sum_ins(n2), r("2"));
    }

    #[test]
    fn unlink_restores_and_detaches() {
        let mut g = FlowGraph::new();
        let a = g.add_node(r("4"));
        let b = g.add_node(Ratio::ZERO);
        let l = g.link(a, b, r("3"));
        let removed = g.unlink(l).unwrap();
        assert_eq!(removed.carrying, r("3"));
        assert!(g.outs(a).is_empty());
        assert!(g.ins(b).is_empty());
        assert_eq!(g.holding(a), r("4"));
        assert!(g.unlink(l).is_none());
    }

    #[test]
    fn node_types_follow_degree() {
        let mut g = FlowGraph::new();
        let a = g.add_node(r("2"));
        assert_eq!(g.node_type(a), NodeType::Island);
        let b = g.add_node(Ratio::ZERO);
        let c = g.add_node(Ratio::ZERO);
        g.link(a, b, r("1"));
        assert_eq!(g.node_type(a), NodeType::Source);
        assert_eq!(g.node_type(b), NodeType::Destination);
        g.link(a, c, r("1"));
        assert_eq!(g.node_type(a), NodeType::SourceSplitter);
        g.link(b, c, r("1"));
        assert_eq!(g.node_type(b), NodeType::PassThrough);
        assert_eq!(g.node_type(c), NodeType::MergerDestination);
        let d = g.add_node(Ratio::ZERO);
        let e = g.add_node(Ratio::ZERO);
        g.link(c, d, r("1"));
        assert_eq!(g.node_type(c), NodeType::Merger);
        g.link(c, e, r("1"));
        assert_eq!(g.node_type(c), NodeType::MergeSplitter);
        assert_eq!(NodeType::from_degree(1, 7), NodeType::Splitter);
        assert_eq!(NodeType::from_degree(5, 0).name(), "merger-destination");
    }

    #[test]
    fn split_into_and_splittable() {
        let mut g = FlowGraph::new();
        let a = g.add_node(r("6"));
        assert_eq!(g.splittable(a), r("6"));
        assert_eq!(g.split_into(a, 3), r("2"));

        let b = g.add_node(Ratio::ZERO);
        g.link_splittable(a, b);
        // Holding exhausted.
        assert_eq!(g.split_into(a, 3), Ratio::ZERO);

        let c = g.add_node(r("9"));
        let d = g.add_node(Ratio::ZERO);
        let share = g.split_into(c, 3);
        g.link(c, d, share);
        // Already partly split: keep the per-child share.
        assert_eq!(g.split_into(c, 2), r("3"));
        assert!(g.splits_evenly(c));
        let e = g.add_node(Ratio::ZERO);
        g.link(c, e, r("1"));
        assert!(!g.splits_evenly(c));
    }

    #[test]
    fn collect_reachable_handles_cycles_and_shared_nodes() {
        let mut g = FlowGraph::new();
        let n: Vec<NodeId> = ["3", "0", "0", "3", "0", "0", "0"]
            .iter()
            .map(|h| g.add_node(r(h)))
            .collect();
        g.link_splittable(n[0], n[1]);
        g.link(n[1], n[2], r("4"));
        g.link(n[2], n[1], r("1"));
        g.link_splittable(n[3], n[4]);
        g.link(n[2], n[5], r("2"));
        g.link(n[4], n[5], r("1.5"));
        g.link_splittable(n[4], n[6]);

        let found = g.collect_reachable(&[n[0], n[3]]);
        assert_eq!(found.nodes.len(), 7);
        assert_eq!(found.links.len(), 7);
        let nodes: HashSet<NodeId> = found.nodes.iter().copied().collect();
        assert!(n.iter().all(|id| nodes.contains(id)));
        assert_eq!(found.nodes[0], n[0]);
        assert_eq!(found.size(), 14);
    }

    #[test]
    fn reachability_follows_direction() {
        let mut g = FlowGraph::new();
        let a = g.add_node(r("1"));
        let b = g.add_node(Ratio::ZERO);
        let c = g.add_node(Ratio::ZERO);
        g.link_splittable(a, b);
        g.link_splittable(b, c);
        assert_eq!(g.collect_reachable(&[a]).nodes, vec![a, b, c]);
        assert_eq!(g.collect_reachable(&[c]).nodes, vec![c]);
    }

    #[test]
    fn net_throughput_recovers_original_holding() {
        let mut g = FlowGraph::new();
        let a = g.add_node(r("10"));
        let b = g.add_node(Ratio::ZERO);
        let c = g.add_node(Ratio::ZERO);
        g.link_splittable(a, b);
        g.link(b, c, r("4"));
        assert_eq!(g.net_throughput(a), r("10"));
        assert_eq!(g.net_throughput(b), Ratio::ZERO);
        assert_eq!(g.net_throughput(c), Ratio::ZERO);
    }

    #[test]
    fn transfer_and_remove() {
        let mut g = FlowGraph::new();
        let a = g.add_node(r("2"));
        let b = g.add_node(Ratio::ZERO);
        g.transfer_holding(a, b, r("2"));
        assert_eq!(g.holding(b), r("2"));
        g.remove_node(a);
        assert!(!g.contains_node(a));
        assert_eq!(g.remove_islands(&[]), 0);
        g.transfer_holding(b, b, Ratio::ZERO);
        let c = g.add_node(Ratio::ZERO);
        assert_eq!(g.remove_islands(&[b]), 1);
        assert!(!g.contains_node(c));
    }

    #[test]
    #[should_panic(expected = "failed unlink")]
    fn removing_a_node_with_residual_holding_panics() {
        let mut g = FlowGraph::new();
        let a = g.add_node(r("1"));
        g.remove_node(a);
    }
}
