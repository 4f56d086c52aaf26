//! Transport form of a flow graph.
//!
//! Nodes get dense ids in traversal order from the roots. Each node exports
//! its net throughput (`holding - sum_ins + sum_outs`) and each edge its
//! quantity, both as exact decimal strings (or `p/q` where no finite decimal
//! exists), so nothing is lost to binary floats across the boundary.
//!
//! Two encodings are offered: JSON via `serde_json` and a compact binary form
//! via `bitcode`.

use crate::graph::FlowGraph;
use crate::id::NodeId;
use crate::ratio::{Ratio, RatioError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("edge {index} references unknown node {id}")]
    UnknownNode { index: usize, id: u32 },
    #[error("invalid quantity {value:?}: {source}")]
    Quantity {
        value: String,
        #[source]
        source: RatioError,
    },
    #[error("edge {index} moves a quantity too large to track exactly")]
    Overflow { index: usize },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEdge {
    pub src: u32,
    pub dst: u32,
    pub carrying: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedGraph {
    pub edges: Vec<SerializedEdge>,
    /// Node id to net throughput.
    pub nodes: BTreeMap<u32, String>,
}

impl SerializedGraph {
    pub fn to_json(&self) -> Result<String, SerializeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SerializeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        bitcode::serialize(self).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SerializeError> {
        bitcode::deserialize(data).map_err(|e| SerializeError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Export everything reachable from `roots`.
pub fn serialize(graph: &FlowGraph, roots: &[NodeId]) -> SerializedGraph {
    let reachable = graph.collect_reachable(roots);
    let ids: HashMap<NodeId, u32> = reachable
        .nodes
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i as u32))
        .collect();

    let nodes = reachable
        .nodes
        .iter()
        .map(|&n| (ids[&n], graph.net_throughput(n).to_string()))
        .collect();
    let edges = reachable
        .links
        .iter()
        .map(|&l| SerializedEdge {
            src: ids[&graph.src(l)],
            dst: ids[&graph.dst(l)],
            carrying: graph.carrying(l).to_string(),
        })
        .collect();

    SerializedGraph { edges, nodes }
}

/// Rebuild a graph. Returns it with every node that has no incoming link,
/// in id order, as the roots.
pub fn deserialize(data: &SerializedGraph) -> Result<(FlowGraph, Vec<NodeId>), SerializeError> {
    let mut graph = FlowGraph::new();
    let mut ids: HashMap<u32, NodeId> = HashMap::with_capacity(data.nodes.len());
    let mut order = Vec::with_capacity(data.nodes.len());

    for (&id, value) in &data.nodes {
        let node = graph.add_node(parse_quantity(value)?);
        ids.insert(id, node);
        order.push(node);
    }

    for (index, edge) in data.edges.iter().enumerate() {
        let lookup = |id: u32| {
            ids.get(&id)
                .copied()
                .ok_or(SerializeError::UnknownNode { index, id })
        };
        let src = lookup(edge.src)?;
        let dst = lookup(edge.dst)?;
        let carrying = parse_quantity(&edge.carrying)?;
        let fits = graph.holding(src).checked_sub(carrying).is_some()
            && graph.holding(dst).checked_add(carrying).is_some();
        if !fits {
            return Err(SerializeError::Overflow { index });
        }
        graph.link(src, dst, carrying);
    }

    let roots = order
        .into_iter()
        .filter(|&n| graph.ins(n).is_empty())
        .collect();
    Ok((graph, roots))
}

fn parse_quantity(value: &str) -> Result<Ratio, SerializeError> {
    value.parse().map_err(|source| SerializeError::Quantity {
        value: value.to_string(),
        source,
    })
}
