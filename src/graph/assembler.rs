//! Conversion of the per-frame layer stores into typed views.

use crate::dom::DomSnapshotExtractor;
use crate::events::SharedLog;
use crate::frame::{FrameArena, FrameContext, FrameId};
use crate::graph::edge::{Edge, EdgeKind};
use crate::graph::node::{Node, NodeKind, NodeRef, NodeType};
use crate::graph::view::{Graph, View};
use crate::network::NetworkCorrelator;
use crate::script::{Cause, ScriptExtractor};
use crate::style::{RuleKind, StyleExtractor};
use std::collections::HashMap;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct GraphAssembler {
    log: SharedLog,
}

impl GraphAssembler {
    pub fn new(log: SharedLog) -> Self {
        Self { log }
    }

    /// Build one view per frame context. Child views are linked to the frame element hosting them.
    pub fn assemble(&self, arena: &FrameArena) -> Graph {
        let mut graph = Graph::new();
        let mut view_ids: HashMap<FrameId, String> = HashMap::new();

        // Creation order is a pre-order walk, so a parent's view exists before its children's.
        for context in arena.iter() {
            let view_id = context.frame_ref.clone().unwrap_or_else(new_id);
            let hosted: Vec<String> = arena.children(context.id).iter().filter_map(|c| c.frame_ref.clone()).collect();

            let mut view = self.assemble_view(context, &view_id, &hosted);
            if let (Some(parent), Some(host)) = (context.parent, &context.host_element) {
                match view_ids.get(&parent) {
                    Some(parent_view) => view = view.with_parent(parent_view.clone(), host.clone()),
                    None => self
                        .log
                        .error(&format!("Frame {} was assembled before its parent", context.id)),
                }
            }
            view_ids.insert(context.id, view_id);
            graph.add_view(view);
        }
        graph
    }

    /// View of a single frame. `hosted` lists the frame references that have a view of their own.
    pub fn assemble_view(&self, context: &FrameContext, view_id: &str, hosted: &[String]) -> View {
        let mut view = View::new(view_id, context.url.clone());

        if let Some(dom) = &context.dom {
            self.add_markup(&mut view, dom, hosted);
        }
        if let Some(style) = &context.style {
            self.add_style(&mut view, style);
        }
        if let Some(script) = &context.script {
            self.add_scripts(&mut view, script);
        }
        if let Some(network) = &context.network {
            self.add_network(&mut view, network);
        }

        let pruned = view.connect_edges();
        if pruned > 0 {
            self.log
                .debug(&format!("Pruned {} dangling edges from view of {}", pruned, context.url));
        }
        self.log.info(&format!(
            "Assembled view of {}: {} nodes, {} edges",
            context.url,
            view.node_count(),
            view.edge_count()
        ));
        view
    }

    fn add_markup(&self, view: &mut View, dom: &DomSnapshotExtractor, hosted: &[String]) {
        for element in dom.elements() {
            let mut node = Node::new(
                element.id.clone(),
                NodeKind::Markup {
                    tag: element.tag_name.clone(),
                    initial: element.initial,
                    deleted: element.deleted,
                    shadow: element.is_shadow_root(),
                },
            );
            if let Some(dom_id) = &element.identify_id {
                node = node.with_annotation("id", dom_id.clone());
            }
            if let Some(class) = &element.class_names {
                node = node.with_annotation("class", class.clone());
            }
            if !element.interactive.is_empty() {
                node = node.with_annotation("interactive", element.interactive.join(";"));
            }
            view.add_node(node);
        }

        for element in dom.elements() {
            let from = NodeRef::markup(element.id.clone());
            for child in &element.children {
                view.add_edge_unchecked(Edge::new(new_id(), EdgeKind::ParentChild, from.clone(), NodeRef::markup(child)));
            }
            if let Some(shadow) = &element.shadow_root {
                view.add_edge_unchecked(Edge::new(new_id(), EdgeKind::ShadowHost, from.clone(), NodeRef::markup(shadow)));
            }
        }

        for (host, frame_ref) in dom.frame_elements() {
            let view_id = hosted.iter().any(|h| h == frame_ref).then(|| frame_ref.to_string());
            view.add_node(Node::new(frame_ref, NodeKind::FrameReference { view_id }));
            view.add_edge_unchecked(Edge::new(
                new_id(),
                EdgeKind::FrameContainer,
                NodeRef::markup(host),
                NodeRef::new(frame_ref, NodeType::FrameReference),
            ));
        }
    }

    fn add_style(&self, view: &mut View, style: &StyleExtractor) {
        for block in style.blocks() {
            let mut node = Node::new(block.id.clone(), NodeKind::StyleBlock { origin: block.origin });
            if let Some(src) = &block.src {
                node = node.with_annotation("src", src.clone());
            }
            if block.deleted {
                node = node.with_annotation("deleted", "true");
            }
            view.add_node(node);

            let block_ref = NodeRef::new(block.id.clone(), NodeType::StyleBlock);
            if let (Some(owner), false) = (&block.owner, block.is_external()) {
                view.add_edge_unchecked(Edge::new(new_id(), EdgeKind::Contains, NodeRef::markup(owner), block_ref.clone()));
            }

            for rule in style.rules_of(&block.id) {
                view.add_node(Node::new(
                    rule.id.clone(),
                    NodeKind::StyleRule {
                        rule_kind: rule.kind,
                        selector: rule.selector.clone(),
                    },
                ));
                let rule_ref = NodeRef::new(rule.id.clone(), NodeType::StyleRule);
                view.add_edge_unchecked(Edge::new(
                    new_id(),
                    EdgeKind::StyleRuleContainer,
                    block_ref.clone(),
                    rule_ref.clone(),
                ));
                if rule.kind == RuleKind::Style {
                    for target in &rule.applies_to {
                        view.add_edge_unchecked(Edge::new(new_id(), EdgeKind::AppliesTo, rule_ref.clone(), NodeRef::markup(target)));
                    }
                }
            }
        }
    }

    fn add_scripts(&self, view: &mut View, scripts: &ScriptExtractor) {
        for block in scripts.blocks() {
            let mut node = Node::new(
                block.id.clone(),
                NodeKind::Script {
                    script_kind: block.kind,
                    src: block.src.clone(),
                },
            );
            if block.deleted {
                node = node.with_annotation("deleted", "true");
            }
            view.add_node(node);

            let script_ref = NodeRef::new(block.id.clone(), NodeType::Script);
            if let (Some(owner), false) = (&block.owner, block.is_external()) {
                view.add_edge_unchecked(Edge::new(new_id(), EdgeKind::Contains, NodeRef::markup(owner), script_ref.clone()));
            }

            for (cause, effects) in &block.interaction {
                let caller_edge = match cause {
                    Cause::PageLoad => None,
                    Cause::Caller { id, kind } => Some(view.add_edge_unchecked(Edge::new(
                        new_id(),
                        EdgeKind::Call,
                        NodeRef::new(id.clone(), *kind),
                        script_ref.clone(),
                    ))),
                };
                for effect in effects {
                    let mut edge = Edge::new(
                        new_id(),
                        EdgeKind::Mutation,
                        script_ref.clone(),
                        NodeRef::new(effect.target.clone(), effect.target_kind),
                    )
                    .with_annotation("operation", effect.operation.clone());
                    if let Some(changes) = &effect.changes {
                        edge = edge.with_annotation("change", changes.join(";"));
                    }
                    if let Some(caller) = &caller_edge {
                        edge = edge.with_annotation("callerEdgeId", caller.clone());
                    }
                    view.add_edge_unchecked(edge);
                }
            }
        }
    }

    fn add_network(&self, view: &mut View, network: &NetworkCorrelator) {
        for request in network.all_requests().filter(|r| r.has_flows()) {
            view.add_node(Node::new(
                request.id.clone(),
                NodeKind::Network {
                    url: request.url.clone(),
                    method: request.method.clone(),
                    potential: !request.is_realized(),
                    messages: request.messages.len(),
                },
            ));

            let request_ref = NodeRef::new(request.id.clone(), NodeType::Network);
            for flow in &request.flows {
                let sender_edge = view.add_edge_unchecked(
                    Edge::new(new_id(), EdgeKind::NetworkRequest, flow.sender.clone(), request_ref.clone())
                        .with_realized(flow.realized),
                );
                if let Some(receiver) = &flow.receiver {
                    view.add_edge_unchecked(
                        Edge::new(new_id(), EdgeKind::NetworkResponse, request_ref.clone(), receiver.clone())
                            .with_realized(flow.realized)
                            .with_annotation("senderEdgeId", sender_edge),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{NetworkExchange, RawNode};
    use crate::error::{ExtractionError, Result};
    use crate::events::MemoryLog;
    use crate::fetch::{FetchedResource, ResourceFetcher};
    use crate::script::{Effect, ScriptBlock};

    const URL: &str = "https://site.test/";

    struct NoNetwork;

    impl ResourceFetcher for NoNetwork {
        fn fetch(&self, url: &str) -> Result<FetchedResource> {
            Err(ExtractionError::Fetch(url.to_string()))
        }
    }

    fn page() -> RawNode {
        RawNode::element("html").with_children(vec![
            RawNode::element("head").with_children(vec![RawNode::element("style").with_inner_html("p { color: red }")]),
            RawNode::element("body").with_children(vec![
                RawNode::element("p").with_attribute("id", "intro"),
                RawNode::element("iframe").with_attribute("src", "https://ads.test/"),
                RawNode::element("script").with_inner_html("grow()"),
            ]),
        ])
    }

    fn arena(log: SharedLog) -> (FrameArena, FrameId) {
        let mut arena = FrameArena::new();
        let root = arena.add_root(URL).unwrap();
        let context = arena.get_mut(root).unwrap();

        let mut dom = DomSnapshotExtractor::new(URL, false, log.clone());
        dom.snapshot(&page()).unwrap();

        let mut style = StyleExtractor::new(log.clone());
        let style_element = dom.find_by_tag("style")[0].id.clone();
        style.extract_internal(&style_element, "p { color: red }", URL);

        let mut scripts = ScriptExtractor::new(URL, log.clone());
        let script_element = dom.find_by_tag("script")[0];
        scripts.extract_element(script_element, &NoNetwork, false);

        let mut network = NetworkCorrelator::new(log);
        network.process_capture(&[NetworkExchange::new("https://ads.test/", "GET").with_status(200)]);
        network.process_capture(&[NetworkExchange::new("https://cdn.test/unclaimed.js", "GET")]);
        network.element_matching(Some(&dom), Some(&style), Some(&scripts));

        context.dom = Some(dom);
        context.style = Some(style);
        context.script = Some(scripts);
        context.network = Some(network);
        (arena, root)
    }

    #[test]
    fn test_view_layers_and_consistency() {
        let log = MemoryLog::new();
        let (arena, _) = arena(log.clone());
        let graph = GraphAssembler::new(log).assemble(&arena);
        let view = graph.root_view().unwrap();

        assert_eq!(view.nodes_of(NodeType::Markup).len(), 7);
        assert_eq!(view.edges_of_kind(EdgeKind::ParentChild).len(), 6);
        assert_eq!(view.edges_of_kind(EdgeKind::Contains).len(), 2);
        assert_eq!(view.edges_of_kind(EdgeKind::StyleRuleContainer).len(), 1);
        assert_eq!(view.nodes_of(NodeType::FrameReference).len(), 1);
        assert_eq!(view.edges_of_kind(EdgeKind::FrameContainer).len(), 1);

        // The unclaimed capture has no flows and is left out.
        assert!(view.find_network_by_url("https://cdn.test/unclaimed.js").is_empty());
        let frame_request = &view.find_network_by_url("https://ads.test/")[0];
        let response = view.out_edges(&frame_request.id);
        assert_eq!(response.len(), 1);
        assert_eq!(response[0].kind, EdgeKind::NetworkResponse);
        assert!(response[0].realized);
        assert_eq!(response[0].to.kind, NodeType::FrameReference);
        let sender_edge = response[0].annotation("senderEdgeId").unwrap();
        assert_eq!(view.edge(sender_edge).unwrap().kind, EdgeKind::NetworkRequest);

        for edge in view.edges() {
            assert!(view.node(&edge.from.id).is_some(), "dangling from in {:?}", edge.kind);
            assert!(view.node(&edge.to.id).is_some(), "dangling to in {:?}", edge.kind);
        }
    }

    #[test]
    fn test_mutation_and_call_edges() {
        let log = MemoryLog::new();
        let (mut arena, root) = arena(log.clone());
        let context = arena.get_mut(root).unwrap();
        let target = context.dom.as_ref().unwrap().find_by_identify_id("intro").unwrap().id.clone();
        let button = context.dom.as_ref().unwrap().find_by_tag("body")[0].id.clone();

        let scripts = context.script.as_mut().unwrap();
        let script_id = scripts.blocks().next().unwrap().id.clone();
        let block: &mut ScriptBlock = scripts.get_mut(&script_id).unwrap();
        block.add_page_load_effect(
            Effect::new(target.clone(), NodeType::Markup, "change").with_changes(vec!["class::a".into(), "title::b".into()]),
        );
        block.add_interaction(
            Cause::caller(button.clone(), NodeType::Markup),
            vec![Effect::new(target.clone(), NodeType::Markup, "delete"), Effect::new("gone", NodeType::Markup, "create")],
        );

        let graph = GraphAssembler::new(log).assemble(&arena);
        let view = graph.root_view().unwrap();

        let mutations = view.edges_of_kind(EdgeKind::Mutation);
        assert_eq!(mutations.len(), 2);
        assert_eq!(mutations[0].annotation("change"), Some("class::a;title::b"));
        assert!(mutations[0].annotation("callerEdgeId").is_none());

        let call = view.edges_of_kind(EdgeKind::Call)[0];
        assert_eq!(call.from.id, button);
        assert_eq!(mutations[1].annotation("callerEdgeId"), Some(call.id.as_str()));
        assert_eq!(mutations[1].annotation("operation"), Some("delete"));
    }

    #[test]
    fn test_child_view_links_to_host() {
        let log = MemoryLog::new();
        let (mut arena, root) = arena(log.clone());
        let (host, frame_ref) = {
            let dom = arena.get(root).unwrap().dom.as_ref().unwrap();
            let (host, frame_ref) = dom.frame_elements()[0];
            (host.to_string(), frame_ref.to_string())
        };
        let child = arena.add_child(root, "https://ads.test/", host.clone(), frame_ref.clone()).unwrap();
        let mut dom = DomSnapshotExtractor::new("https://ads.test/", false, log.clone());
        dom.snapshot(&RawNode::element("html")).unwrap();
        arena.get_mut(child).unwrap().dom = Some(dom);

        let graph = GraphAssembler::new(log).assemble(&arena);
        assert_eq!(graph.views.len(), 2);

        let child_view = graph.view(&frame_ref).unwrap();
        assert_eq!(child_view.parent_node.as_deref(), Some(host.as_str()));
        assert_eq!(child_view.parent_view, graph.root);

        let reference = graph.root_view().unwrap().node(&frame_ref).unwrap();
        assert_eq!(reference.kind, NodeKind::FrameReference { view_id: Some(frame_ref.clone()) });
    }
}
