use crate::graph::node::NodeRef;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// Element to child element
    ParentChild,
    /// Element to the style or script block it embeds
    Contains,
    /// Style block to rule
    StyleRuleContainer,
    /// Sender to the request it causes
    NetworkRequest,
    /// Request to the node built from its response
    NetworkResponse,
    /// Script to an element it created, deleted or changed
    Mutation,
    /// Style rule to a matched element
    AppliesTo,
    /// Shadow host to its shadow root
    ShadowHost,
    /// Frame element to the frame it hosts
    FrameContainer,
    /// Caller to the script it invoked
    Call,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::ParentChild => "parent-child",
            EdgeKind::Contains => "contains",
            EdgeKind::StyleRuleContainer => "style-rule-container",
            EdgeKind::NetworkRequest => "network-request",
            EdgeKind::NetworkResponse => "network-response",
            EdgeKind::Mutation => "mutation",
            EdgeKind::AppliesTo => "applies-to",
            EdgeKind::ShadowHost => "shadow-host",
            EdgeKind::FrameContainer => "frame-container",
            EdgeKind::Call => "call",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,

    pub kind: EdgeKind,

    pub from: NodeRef,

    pub to: NodeRef,

    /// Happened while the page loaded, as opposed to only being possible
    pub realized: bool,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, kind: EdgeKind, from: NodeRef, to: NodeRef) -> Self {
        Self {
            id: id.into(),
            kind,
            from,
            to,
            realized: true,
            annotations: IndexMap::new(),
        }
    }

    pub fn with_realized(mut self, realized: bool) -> Self {
        self.realized = realized;
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Whether `id` is one of the endpoints
    pub fn touches(&self, id: &str) -> bool {
        self.from.id == id || self.to.id == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeType;

    #[test]
    fn test_edge_serialization() {
        let edge = Edge::new(
            "e1",
            EdgeKind::Mutation,
            NodeRef::new("s1", NodeType::Script),
            NodeRef::markup("m1"),
        )
        .with_annotation("operation", "create");

        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["kind"], "mutation");
        assert_eq!(json["from"]["kind"], "script");
        assert_eq!(json["annotations"]["operation"], "create");
        assert_eq!(edge.annotation("operation"), Some("create"));
        assert!(edge.touches("m1"));
        assert_eq!(EdgeKind::StyleRuleContainer.as_str(), "style-rule-container");
    }
}
