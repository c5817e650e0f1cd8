//! In-memory browser double for the integration tests.
//!
//! `FakeDriver` holds a live element tree per frame and computes structural diffs the same way
//! the page-side observer does: nodes are identified by token, a node is created when it is new
//! or its parent changed, and tracked nodes that disappear are deleted at their old path.

#![allow(dead_code)]

use page_graph::browser::{DiffEntry, NetworkExchange, NodeKind, RawNode, ScriptStep};
use page_graph::fetch::{FetchedResource, ResourceFetcher};
use page_graph::{BrowserDriver, ExtractionError, NodePath, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub type Mutation = Box<dyn FnMut(&mut RawNode)>;

/// One script the page replays, with what it does when run
pub struct Replay {
    pub step: ScriptStep,
    pub mutate: Mutation,
    pub requests: Vec<NetworkExchange>,
}

impl Replay {
    pub fn new(step: ScriptStep, mutate: impl FnMut(&mut RawNode) + 'static) -> Self {
        Self {
            step,
            mutate: Box::new(mutate),
            requests: Vec::new(),
        }
    }

    pub fn with_request(mut self, exchange: NetworkExchange) -> Self {
        self.requests.push(exchange);
        self
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    path: NodePath,
    parent: Option<u64>,
    kind: NodeKind,
    attributes: HashMap<String, String>,
    order: usize,
}

/// Live state of one frame
pub struct FakePage {
    pub url: String,
    pub document: RawNode,
    pub replays: VecDeque<Replay>,
    pub load_capture: Vec<NetworkExchange>,
    /// Child frames by the path of their frame element
    pub frames: HashMap<String, FakePage>,
    captured: Vec<NetworkExchange>,
    previous: HashMap<u64, Tracked>,
}

impl FakePage {
    pub fn new(url: impl Into<String>, document: RawNode) -> Self {
        Self {
            url: url.into(),
            document,
            replays: VecDeque::new(),
            load_capture: Vec::new(),
            frames: HashMap::new(),
            captured: Vec::new(),
            previous: HashMap::new(),
        }
    }

    pub fn with_replay(mut self, replay: Replay) -> Self {
        self.replays.push_back(replay);
        self
    }

    pub fn with_capture(mut self, exchange: NetworkExchange) -> Self {
        self.load_capture.push(exchange);
        self
    }

    pub fn with_frame(mut self, path: &str, page: FakePage) -> Self {
        self.frames.insert(path.to_string(), page);
        self
    }

    fn record(&mut self) {
        let mut next = HashMap::new();
        let mut order = 0;
        track(&self.document, NodePath::root(), None, &mut next, &mut order);
        self.previous = next;
    }

    fn diff(&mut self) -> Vec<DiffEntry> {
        let mut next = HashMap::new();
        let mut creates = Vec::new();
        let mut changes = Vec::new();
        let mut order = 0;
        let document = self.document.clone();
        self.walk(&document, NodePath::root(), None, false, &mut next, &mut creates, &mut changes, &mut order);

        let mut gone: Vec<(u64, Tracked)> = self.previous.drain().collect();
        gone.sort_by(|a, b| b.1.order.cmp(&a.1.order));
        let deletes = gone
            .into_iter()
            .map(|(token, info)| DiffEntry::delete(info.path, info.kind).with_token(token));

        self.previous = next;
        deletes.chain(creates).chain(changes).collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &mut self,
        node: &RawNode,
        path: NodePath,
        parent: Option<u64>,
        fresh: bool,
        next: &mut HashMap<u64, Tracked>,
        creates: &mut Vec<DiffEntry>,
        changes: &mut Vec<DiffEntry>,
        order: &mut usize,
    ) {
        let token = node.token.expect("every fake node carries a token");
        let known = self.previous.get(&token).cloned();
        let mut created = false;

        match known {
            Some(info) if !fresh && info.parent == parent => {
                if node.kind == NodeKind::Node && info.attributes != node.attributes {
                    changes.push(DiffEntry::change(path.clone(), describe(node)));
                }
                self.previous.remove(&token);
            }
            _ => {
                creates.push(DiffEntry::create(path.clone(), describe(node)));
                created = true;
            }
        }

        next.insert(
            token,
            Tracked {
                path: path.clone(),
                parent,
                kind: node.kind,
                attributes: node.attributes.clone(),
                order: *order,
            },
        );
        *order += 1;

        for (index, child) in node.children.iter().enumerate() {
            self.walk(child, path.child(index), Some(token), created, next, creates, changes, order);
        }
        if let Some(shadow) = &node.shadow_root {
            self.walk(shadow, path.shadow_root(), Some(token), created, next, creates, changes, order);
        }
    }

    /// Paths of the live nodes matching a tag, `.class` or `#id` selector
    fn select(&self, selector: &str) -> Vec<NodePath> {
        let mut found = Vec::new();
        select_in(&self.document, NodePath::root(), selector, &mut found);
        found
    }
}

fn track(node: &RawNode, path: NodePath, parent: Option<u64>, map: &mut HashMap<u64, Tracked>, order: &mut usize) {
    let token = node.token.expect("every fake node carries a token");
    map.insert(
        token,
        Tracked {
            path: path.clone(),
            parent,
            kind: node.kind,
            attributes: node.attributes.clone(),
            order: *order,
        },
    );
    *order += 1;
    for (index, child) in node.children.iter().enumerate() {
        track(child, path.child(index), Some(token), map, order);
    }
    if let Some(shadow) = &node.shadow_root {
        track(shadow, path.shadow_root(), Some(token), map, order);
    }
}

fn describe(node: &RawNode) -> RawNode {
    RawNode {
        children: Vec::new(),
        shadow_root: None,
        ..node.clone()
    }
}

fn matches(node: &RawNode, selector: &str) -> bool {
    if node.kind == NodeKind::ShadowRoot {
        return false;
    }
    if let Some(class) = selector.strip_prefix('.') {
        return node
            .attributes
            .get("class")
            .is_some_and(|c| c.split_whitespace().any(|name| name == class));
    }
    if let Some(id) = selector.strip_prefix('#') {
        return node.attributes.get("id").map(String::as_str) == Some(id);
    }
    node.tag_name == selector
}

fn select_in(node: &RawNode, path: NodePath, selector: &str, found: &mut Vec<NodePath>) {
    if matches(node, selector) {
        found.push(path.clone());
    }
    for (index, child) in node.children.iter().enumerate() {
        select_in(child, path.child(index), selector, found);
    }
    if let Some(shadow) = &node.shadow_root {
        select_in(shadow, path.shadow_root(), selector, found);
    }
}

fn without_shadow(node: &RawNode) -> RawNode {
    RawNode {
        children: node.children.iter().map(without_shadow).collect(),
        shadow_root: None,
        ..node.clone()
    }
}

/// Give every node without a token a fresh one, in document order starting at 1
pub fn tokenized(mut document: RawNode) -> RawNode {
    fn assign(node: &mut RawNode, next: &mut u64) {
        if node.token.is_none() {
            node.token = Some(*next);
            *next += 1;
        }
        for child in &mut node.children {
            assign(child, next);
        }
        if let Some(shadow) = node.shadow_root.as_deref_mut() {
            assign(shadow, next);
        }
    }
    let mut next = 1;
    assign(&mut document, &mut next);
    document
}

/// Node at a `0>i>j` path; panics on a bad path
pub fn node_at<'a>(root: &'a mut RawNode, path: &str) -> &'a mut RawNode {
    let mut current = root;
    for step in path.split('>').skip(1) {
        current = if step == "shadowRoot" {
            current.shadow_root.as_deref_mut().expect("shadow root present")
        } else {
            let index: usize = step.parse().expect("numeric step");
            &mut current.children[index]
        };
    }
    current
}

/// Browser double over a tree of fake pages
pub struct FakeDriver {
    pub top: FakePage,
    stack: Vec<String>,
    pub scripts_enabled: bool,
    pub steps_taken: usize,
}

impl FakeDriver {
    pub fn new(top: FakePage) -> Self {
        Self {
            top,
            stack: Vec::new(),
            scripts_enabled: true,
            steps_taken: 0,
        }
    }

    pub fn active(&mut self) -> &mut FakePage {
        let mut page = &mut self.top;
        for path in &self.stack {
            page = page.frames.get_mut(path).expect("entered frame exists");
        }
        page
    }
}

impl BrowserDriver for FakeDriver {
    fn navigate(&mut self, _url: &str) -> Result<()> {
        self.stack.clear();
        let page = &mut self.top;
        page.captured = page.load_capture.clone();
        Ok(())
    }

    fn current_url(&mut self) -> Result<String> {
        Ok(self.active().url.clone())
    }

    fn wait_for_load(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    fn set_script_execution(&mut self, enabled: bool) -> Result<()> {
        self.scripts_enabled = enabled;
        Ok(())
    }

    fn evaluate(&mut self, _script: &str) -> Result<Value> {
        Ok(Value::Bool(true))
    }

    fn capture_network_log(&mut self) -> Result<Vec<NetworkExchange>> {
        Ok(self.active().captured.clone())
    }

    fn reset_network_log(&mut self) -> Result<()> {
        self.active().captured.clear();
        Ok(())
    }

    fn enter_frame(&mut self, frame: &NodePath) -> Result<()> {
        let key = frame.to_string();
        if !self.active().frames.contains_key(&key) {
            return Err(ExtractionError::Extraction(format!("No frame at {}", key)));
        }
        self.stack.push(key);
        let page = self.active();
        page.captured = page.load_capture.clone();
        Ok(())
    }

    fn leave_frame(&mut self) -> Result<()> {
        self.stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| ExtractionError::Consistency("not inside a frame".to_string()))
    }

    fn settle(&mut self, _interval: Duration) {}

    fn snapshot_document(&mut self, include_shadow: bool) -> Result<RawNode> {
        let document = &self.active().document;
        Ok(if include_shadow { document.clone() } else { without_shadow(document) })
    }

    fn install_script_queue(&mut self) -> Result<()> {
        Ok(())
    }

    fn install_observer(&mut self) -> Result<()> {
        self.active().record();
        Ok(())
    }

    fn step_next_script(&mut self) -> Result<ScriptStep> {
        let page = self.active();
        let Some(mut replay) = page.replays.pop_front() else {
            return Ok(ScriptStep::finished());
        };
        (replay.mutate)(&mut page.document);
        page.captured.extend(replay.requests.drain(..));
        self.steps_taken += 1;
        Ok(replay.step)
    }

    fn diff_since_last_snapshot(&mut self) -> Result<Vec<DiffEntry>> {
        Ok(self.active().diff())
    }

    fn find_by_selector(&mut self, selector: &str) -> Result<Vec<NodePath>> {
        Ok(self.active().select(selector))
    }
}

/// Fetcher serving canned bodies; anything else fails
#[derive(Default)]
pub struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.as_bytes().to_vec());
        self
    }
}

impl ResourceFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedResource> {
        self.bodies
            .get(url)
            .map(|bytes| FetchedResource::new(url, bytes.clone()))
            .ok_or_else(|| ExtractionError::Fetch(format!("{} not served", url)))
    }
}
