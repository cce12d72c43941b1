//! The declared join structure between population and peripheral tables.
//!
//! Clients describe the data model as a tree of placeholders: the population
//! at the root, peripheral tables joined below it, possibly nested. The
//! serde shape (`PlaceholderSpec`) is converted into an arena of
//! integer-id nodes with adjacency lists - joins reference tables by name,
//! so the same peripheral may appear under several parents without any
//! self-referential ownership.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The wire shape of the data model, as sent in a pipeline command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaceholderSpec {
    pub name: String,
    /// Joined tables below this one.
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinSpec {
    /// Name of the joined (peripheral) table.
    pub table: String,
    /// Join-key pairs `(this_side, other_side)`; all must match (AND).
    pub keys: Vec<(String, String)>,
    /// Time-stamp pair `(this_side, other_side)` enabling the time filter.
    #[serde(default)]
    pub time_stamps: Option<(String, String)>,
    /// Upper time stamp on the joined table; rows whose upper time stamp is
    /// not strictly greater than the population time stamp are filtered out.
    #[serde(default)]
    pub upper_time_stamp: Option<String>,
    /// Nested joins below the joined table.
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
}

/// One node of the arena.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    /// Outgoing joins, as indices into [`JoinGraph::edges`].
    pub joins: Vec<usize>,
}

/// One edge of the arena: a join from `parent` to `child`.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub parent: usize,
    pub child: usize,
    pub keys: Vec<(String, String)>,
    pub time_stamps: Option<(String, String)>,
    pub upper_time_stamp: Option<String>,
}

/// Arena form of the placeholder tree. Node 0 is the population.
#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl JoinGraph {
    /// Builds the arena from a placeholder spec. Depth is bounded by the
    /// spec itself (it is a finite tree); repeated table names are distinct
    /// uses, each getting its own node.
    pub fn from_spec(spec: &PlaceholderSpec) -> Result<Self> {
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument(
                "the data model needs a population table name".to_string(),
            ));
        }
        let mut graph = JoinGraph::default();
        graph.nodes.push(GraphNode {
            name: spec.name.clone(),
            joins: Vec::new(),
        });
        graph.add_joins(0, &spec.joins)?;
        Ok(graph)
    }

    fn add_joins(&mut self, parent: usize, joins: &[JoinSpec]) -> Result<()> {
        for join in joins {
            if join.keys.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "join onto '{}' declares no join keys",
                    join.table
                )));
            }
            let child = self.nodes.len();
            self.nodes.push(GraphNode {
                name: join.table.clone(),
                joins: Vec::new(),
            });
            let edge = self.edges.len();
            self.edges.push(GraphEdge {
                parent,
                child,
                keys: join.keys.clone(),
                time_stamps: join.time_stamps.clone(),
                upper_time_stamp: join.upper_time_stamp.clone(),
            });
            self.nodes[parent].joins.push(edge);
            self.add_joins(child, &join.joins)?;
        }
        Ok(())
    }

    /// The joins leaving `node`, in declaration order.
    pub fn joins_of(&self, node: usize) -> impl Iterator<Item = &GraphEdge> {
        self.nodes[node].joins.iter().map(move |&e| &self.edges[e])
    }

    /// Maximum join depth below the population (0 = no joins at all).
    pub fn depth(&self) -> usize {
        fn walk(graph: &JoinGraph, node: usize) -> usize {
            graph
                .joins_of(node)
                .map(|e| 1 + walk(graph, e.child))
                .max()
                .unwrap_or(0)
        }
        walk(self, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PlaceholderSpec {
        serde_json::from_value(serde_json::json!({
            "name": "population",
            "joins": [{
                "table": "orders",
                "keys": [["customer_id", "customer_id"]],
                "time_stamps": ["ts", "ts"],
                "joins": [{
                    "table": "items",
                    "keys": [["order_id", "order_id"]]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_arena_shape() {
        let graph = JoinGraph::from_spec(&spec()).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[0].name, "population");
        assert_eq!(graph.depth(), 2);

        let first = graph.joins_of(0).next().unwrap();
        assert_eq!(graph.nodes[first.child].name, "orders");
        assert_eq!(first.time_stamps, Some(("ts".to_string(), "ts".to_string())));
    }

    #[test]
    fn test_join_without_keys_rejected() {
        let bad: PlaceholderSpec = serde_json::from_value(serde_json::json!({
            "name": "population",
            "joins": [{"table": "orders", "keys": []}]
        }))
        .unwrap();
        assert!(JoinGraph::from_spec(&bad).is_err());
    }

    #[test]
    fn test_repeated_table_gets_distinct_nodes() {
        let spec: PlaceholderSpec = serde_json::from_value(serde_json::json!({
            "name": "population",
            "joins": [
                {"table": "orders", "keys": [["id", "a"]]},
                {"table": "orders", "keys": [["id", "b"]]}
            ]
        }))
        .unwrap();
        let graph = JoinGraph::from_spec(&spec).unwrap();
        assert_eq!(graph.nodes.len(), 3);
    }
}
