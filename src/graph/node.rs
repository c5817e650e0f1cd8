use crate::script::ScriptKind;
use crate::style::{RuleKind, StyleOrigin};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Type of a graph node, also used to type flow and effect endpoints before assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Markup,
    StyleBlock,
    StyleRule,
    Script,
    Network,
    FrameReference,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Markup => "markup",
            NodeType::StyleBlock => "style-block",
            NodeType::StyleRule => "style-rule",
            NodeType::Script => "script",
            NodeType::Network => "network",
            NodeType::FrameReference => "frame-reference",
        }
    }
}

/// Typed reference to a node by id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
    pub kind: NodeType,
}

impl NodeRef {
    pub fn new(id: impl Into<String>, kind: NodeType) -> Self {
        Self { id: id.into(), kind }
    }

    pub fn markup(id: impl Into<String>) -> Self {
        Self::new(id, NodeType::Markup)
    }
}

/// Kind-specific part of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeKind {
    Markup {
        tag: String,
        initial: bool,
        deleted: bool,
        shadow: bool,
    },
    StyleBlock {
        origin: StyleOrigin,
    },
    StyleRule {
        rule_kind: RuleKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Script {
        script_kind: ScriptKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        src: Option<String>,
    },
    Network {
        url: String,
        method: String,
        potential: bool,
        messages: usize,
    },
    FrameReference {
        /// View built for the frame, if it could be entered
        #[serde(skip_serializing_if = "Option::is_none")]
        view_id: Option<String>,
    },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Markup { .. } => NodeType::Markup,
            NodeKind::StyleBlock { .. } => NodeType::StyleBlock,
            NodeKind::StyleRule { .. } => NodeType::StyleRule,
            NodeKind::Script { .. } => NodeType::Script,
            NodeKind::Network { .. } => NodeType::Network,
            NodeKind::FrameReference { .. } => NodeType::FrameReference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    #[serde(flatten)]
    pub kind: NodeKind,

    pub in_edges: Vec<String>,

    pub out_edges: Vec<String>,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            annotations: IndexMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn to_ref(&self) -> NodeRef {
        NodeRef::new(self.id.clone(), self.node_type())
    }

    /// Number of connected edges
    pub fn degree(&self) -> usize {
        self.in_edges.len() + self.out_edges.len()
    }

    pub(crate) fn detach(&mut self, edge_id: &str) {
        self.in_edges.retain(|e| e != edge_id);
        self.out_edges.retain(|e| e != edge_id);
    }
}
