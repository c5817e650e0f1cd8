use crate::error::{ExtractionError, Result};
use crate::graph::edge::{Edge, EdgeKind};
use crate::graph::node::{Node, NodeKind, NodeType};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Typed node/edge graph of one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: String,

    pub frame_url: String,

    /// View of the frame hosting this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_view: Option<String>,

    /// Frame element in the parent view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_node: Option<String>,

    nodes: IndexMap<String, Node>,

    edges: IndexMap<String, Edge>,
}

impl View {
    pub fn new(id: impl Into<String>, frame_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frame_url: frame_url.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, view: impl Into<String>, node: impl Into<String>) -> Self {
        self.parent_view = Some(view.into());
        self.parent_node = Some(node.into());
        self
    }

    /// Add a node; an id already present keeps its first node
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Add an edge between two nodes that already exist
    pub fn add_edge(&mut self, edge: Edge) -> Result<String> {
        for end in [&edge.from, &edge.to] {
            if !self.nodes.contains_key(&end.id) {
                return Err(ExtractionError::Consistency(format!(
                    "Edge {} references missing {} node {}",
                    edge.kind.as_str(),
                    end.kind.as_str(),
                    end.id
                )));
            }
        }
        Ok(self.add_edge_unchecked(edge))
    }

    /// Add an edge whose endpoints may not exist yet. [`connect_edges`](Self::connect_edges)
    /// attaches or prunes it later.
    pub fn add_edge_unchecked(&mut self, edge: Edge) -> String {
        let id = edge.id.clone();
        if let Some(from) = self.nodes.get_mut(&edge.from.id) {
            from.out_edges.push(id.clone());
        }
        if let Some(to) = self.nodes.get_mut(&edge.to.id) {
            to.in_edges.push(id.clone());
        }
        self.edges.insert(id.clone(), edge);
        id
    }

    /// Repair pass: drop every edge with a missing endpoint and attach the rest to both
    /// endpoints. Returns the number of edges dropped.
    pub fn connect_edges(&mut self) -> usize {
        let dangling: Vec<String> = self
            .edges
            .values()
            .filter(|e| !self.nodes.contains_key(&e.from.id) || !self.nodes.contains_key(&e.to.id))
            .map(|e| e.id.clone())
            .collect();
        for id in &dangling {
            self.drop_edge(id);
        }

        for edge in self.edges.values() {
            if let Some(from) = self.nodes.get_mut(&edge.from.id) {
                if !from.out_edges.contains(&edge.id) {
                    from.out_edges.push(edge.id.clone());
                }
            }
            if let Some(to) = self.nodes.get_mut(&edge.to.id) {
                if !to.in_edges.contains(&edge.id) {
                    to.in_edges.push(edge.id.clone());
                }
            }
        }
        dangling.len()
    }

    fn drop_edge(&mut self, id: &str) -> Option<Edge> {
        let edge = self.edges.shift_remove(id)?;
        for end in [&edge.from.id, &edge.to.id] {
            if let Some(node) = self.nodes.get_mut(end) {
                node.detach(id);
            }
        }
        Some(edge)
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let node = self.nodes.shift_remove(id)?;
        for edge_id in node.in_edges.iter().chain(node.out_edges.iter()) {
            self.drop_edge(edge_id);
        }
        Some(node)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes_of(&self, kind: NodeType) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.node_type() == kind).collect()
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.kind == kind).collect()
    }

    pub fn in_edges(&self, id: &str) -> Vec<&Edge> {
        self.nodes
            .get(id)
            .map(|n| n.in_edges.iter().filter_map(|e| self.edges.get(e)).collect())
            .unwrap_or_default()
    }

    pub fn out_edges(&self, id: &str) -> Vec<&Edge> {
        self.nodes
            .get(id)
            .map(|n| n.out_edges.iter().filter_map(|e| self.edges.get(e)).collect())
            .unwrap_or_default()
    }

    pub fn find_network_by_url(&self, url: &str) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| matches!(&n.kind, NodeKind::Network { url: u, .. } if u == url))
            .collect()
    }

    pub fn find_markup_by_tag(&self, tag: &str) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| matches!(&n.kind, NodeKind::Markup { tag: t, .. } if t.eq_ignore_ascii_case(tag)))
            .collect()
    }

    /// Nodes reachable from `id` over outgoing `kind` edges, each once, `id` excluded
    pub fn descendants(&self, id: &str, kind: EdgeKind) -> Vec<&Node> {
        self.bfs(id, kind)
            .into_iter()
            .skip(1)
            .filter_map(|n| self.nodes.get(n))
            .collect()
    }

    /// Breadth-first visit order from `id` over outgoing `kind` edges, starting with `id`
    pub fn bfs(&self, id: &str, kind: EdgeKind) -> Vec<&str> {
        let Some((_, start, _)) = self.nodes.get_full(id) else {
            return Vec::new();
        };
        let mut seen: IndexSet<&str> = IndexSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(start.as_str());
        queue.push_back(start.as_str());

        while let Some(current) = queue.pop_front() {
            for edge in self.out_edges(current).into_iter().filter(|e| e.kind == kind) {
                if self.nodes.contains_key(&edge.to.id) && seen.insert(edge.to.id.as_str()) {
                    queue.push_back(edge.to.id.as_str());
                }
            }
        }
        seen.into_iter().collect()
    }
}

/// Views of every extracted frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub root: Option<String>,

    pub views: IndexMap<String, View>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a view; the first one added is the root
    pub fn add_view(&mut self, view: View) {
        if self.root.is_none() {
            self.root = Some(view.id.clone());
        }
        self.views.insert(view.id.clone(), view);
    }

    pub fn view(&self, id: &str) -> Option<&View> {
        self.views.get(id)
    }

    pub fn view_mut(&mut self, id: &str) -> Option<&mut View> {
        self.views.get_mut(id)
    }

    pub fn root_view(&self) -> Option<&View> {
        self.root.as_deref().and_then(|id| self.views.get(id))
    }

    /// Views hosted directly by `id`
    pub fn child_views(&self, id: &str) -> Vec<&View> {
        self.views
            .values()
            .filter(|v| v.parent_view.as_deref() == Some(id))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.views.values().map(View::node_count).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.views.values().map(View::edge_count).sum()
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeRef;

    fn markup(id: &str, tag: &str) -> Node {
        Node::new(
            id,
            NodeKind::Markup {
                tag: tag.to_string(),
                initial: true,
                deleted: false,
                shadow: false,
            },
        )
    }

    fn link(view: &mut View, id: &str, from: &str, to: &str) {
        view.add_edge_unchecked(Edge::new(id, EdgeKind::ParentChild, NodeRef::markup(from), NodeRef::markup(to)));
    }

    fn chain() -> View {
        let mut view = View::new("v", "https://site.test/");
        for id in ["1", "2", "3", "4", "5"] {
            view.add_node(markup(id, "div"));
        }
        link(&mut view, "a", "1", "2");
        link(&mut view, "b", "2", "3");
        link(&mut view, "c", "2", "4");
        link(&mut view, "d", "3", "5");
        link(&mut view, "e", "4", "5");
        view
    }

    #[test]
    fn test_chain_reachability() {
        let view = chain();
        assert_eq!(view.descendants("1", EdgeKind::ParentChild).len(), 4);
        assert_eq!(view.bfs("1", EdgeKind::ParentChild), vec!["1", "2", "3", "4", "5"]);
        assert!(view.descendants("1", EdgeKind::Contains).is_empty());
        assert_eq!(view.in_edges("5").len(), 2);
    }

    #[test]
    fn test_checked_edge_needs_endpoints() {
        let mut view = chain();
        let edge = Edge::new("x", EdgeKind::ParentChild, NodeRef::markup("1"), NodeRef::markup("9"));
        assert!(view.add_edge(edge).is_err());
        assert_eq!(view.edge_count(), 5);
    }

    #[test]
    fn test_repair_pass() {
        let mut view = chain();
        link(&mut view, "f", "5", "late");
        link(&mut view, "g", "1", "gone");
        view.add_node(markup("late", "span"));

        assert_eq!(view.connect_edges(), 1);
        assert!(view.edge("g").is_none());
        assert_eq!(view.in_edges("late").len(), 1);
        for edge in view.edges() {
            assert!(view.node(&edge.from.id).is_some() && view.node(&edge.to.id).is_some());
        }
        assert!(view.node("1").unwrap().out_edges.iter().all(|e| e != "g"));
    }

    #[test]
    fn test_remove_node_breaks_connections() {
        let mut view = chain();
        view.remove_node("2").unwrap();
        assert_eq!(view.edge_count(), 2);
        assert!(view.out_edges("1").is_empty());
        assert_eq!(view.descendants("1", EdgeKind::ParentChild).len(), 0);
    }

    #[test]
    fn test_graph_views() {
        let mut graph = Graph::new();
        graph.add_view(chain());
        graph.add_view(View::new("child", "https://ads.test/").with_parent("v", "3"));

        assert_eq!(graph.root_view().unwrap().id, "v");
        assert_eq!(graph.child_views("v").len(), 1);
        assert_eq!(graph.node_count(), 5);
        let json = graph.to_json(false).unwrap();
        assert!(json.contains("\"parent_node\":\"3\""));
    }
}
