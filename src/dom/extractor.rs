use crate::browser::{NodeKind, RawNode};
use crate::dom::classify::classify;
use crate::dom::element::Element;
use crate::dom::path::{NodePath, PathStep};
use crate::error::{ExtractionError, Result};
use crate::events::SharedLog;
use indexmap::IndexMap;
use std::collections::HashMap;
use uuid::Uuid;

/// What happened to the inline `style` attribute during an attribute change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineStyleChange {
    Updated(String),
    Removed,
}

/// Result of reconciling an element's attributes against a fresh copy from the page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeChange {
    /// `key::new` for added, `key:old:new` for changed, `key:old:` for removed
    pub deltas: Vec<String>,
    pub style: Option<InlineStyleChange>,
}

impl AttributeChange {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Markup layer of one frame: identified element records with tree links and classification
pub struct DomSnapshotExtractor {
    /// Base URL for resolving references
    url: String,

    include_shadow: bool,

    elements: IndexMap<String, Element>,

    root: Option<String>,

    /// Live-node token to element id
    tokens: HashMap<u64, String>,

    log: SharedLog,
}

impl DomSnapshotExtractor {
    pub fn new(url: impl Into<String>, include_shadow: bool, log: SharedLog) -> Self {
        Self {
            url: url.into(),
            include_shadow,
            elements: IndexMap::new(),
            root: None,
            tokens: HashMap::new(),
            log,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn include_shadow(&self) -> bool {
        self.include_shadow
    }

    /// Record every element of `document` (the document element and its subtree)
    pub fn snapshot(&mut self, document: &RawNode) -> Result<String> {
        self.elements.clear();
        self.tokens.clear();
        let root = self.visit(document, None, 0, None).ok_or_else(|| {
            ExtractionError::Extraction("Document element could not be read".to_string())
        })?;
        self.root = Some(root.clone());
        self.log.info(&format!("Extracted {} elements from {}", self.elements.len(), self.url));
        Ok(root)
    }

    fn visit(&mut self, raw: &RawNode, parent: Option<&str>, depth: usize, shadow_host: Option<&str>) -> Option<String> {
        if raw.kind == NodeKind::Node && raw.tag_name.is_empty() {
            self.log.warn(&format!(
                "Skipping unreadable subtree under {}",
                parent.unwrap_or("the document root")
            ));
            return None;
        }

        let id = self.save_element(raw, parent, depth, shadow_host, true);

        let children: Vec<String> = raw
            .children
            .iter()
            .filter_map(|child| self.visit(child, Some(id.as_str()), depth + 1, shadow_host))
            .collect();
        if let Some(element) = self.elements.get_mut(&id) {
            element.children = children;
        }

        if self.include_shadow {
            if let Some(shadow) = &raw.shadow_root {
                self.attach_shadow_subtree(&id, shadow, depth);
            }
        }
        Some(id)
    }

    fn attach_shadow_subtree(&mut self, host: &str, shadow: &RawNode, host_depth: usize) {
        let root_id = self.save_element(shadow, Some(host), host_depth + 1, Some(host), true);
        if let Some(host_element) = self.elements.get_mut(host) {
            host_element.shadow_root = Some(root_id.clone());
        }

        let children: Vec<String> = shadow
            .children
            .iter()
            .filter_map(|child| self.visit(child, Some(root_id.as_str()), host_depth + 2, Some(host)))
            .collect();
        if let Some(root) = self.elements.get_mut(&root_id) {
            root.children = children;
        }
    }

    /// Build and store the record for one node without recursing
    fn save_element(
        &mut self,
        raw: &RawNode,
        parent: Option<&str>,
        depth: usize,
        shadow_host: Option<&str>,
        initial: bool,
    ) -> String {
        let id = Uuid::new_v4().to_string();

        let mut element = match raw.kind {
            NodeKind::ShadowRoot => Element::shadow_root(&id, shadow_host.unwrap_or_default()),
            NodeKind::Node => {
                let mut element = Element::new(&id, raw.tag_name.to_string());
                element.attributes = raw.attributes.clone();
                element.text = raw.text.clone();
                element.inner_html = raw.inner_html.clone();
                element.class_names = raw.attributes.get("class").cloned();
                element.identify_id = raw.attributes.get("id").cloned();
                element.shadow_host = shadow_host.map(str::to_string);
                element
            }
        };
        element.parent = parent.map(str::to_string);
        element.depth = depth;
        element.initial = initial;
        element.live_token = raw.token;

        if element.is_frame() {
            element.related_frame_id = Some(Uuid::new_v4().to_string());
        }
        if !element.is_shadow_root() {
            classify(&mut element, &self.url, self.log.as_ref());
        }

        if let Some(token) = raw.token {
            self.tokens.insert(token, id.clone());
        }
        self.elements.insert(id.clone(), element);
        id
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.elements.get_mut(id)
    }

    /// All records, deleted ones included, in creation order
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn live_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values().filter(|e| !e.deleted)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live_elements().count()
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<&Element> {
        self.live_elements().filter(|e| e.is_tag(tag)).collect()
    }

    pub fn find_by_class(&self, class_name: &str) -> Vec<&Element> {
        self.live_elements().filter(|e| e.has_class(class_name)).collect()
    }

    /// Live element with record id `id`
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        self.get(id).filter(|e| !e.deleted)
    }

    pub fn find_by_identify_id(&self, dom_id: &str) -> Option<&Element> {
        self.live_elements().find(|e| e.identify_id.as_deref() == Some(dom_id))
    }

    pub fn find_by_token(&self, token: u64) -> Option<&Element> {
        self.tokens
            .get(&token)
            .and_then(|id| self.elements.get(id))
            .filter(|e| !e.deleted)
    }

    /// `<style>` and stylesheet `<link>` elements
    pub fn css_elements(&self) -> Vec<&Element> {
        self.live_elements().filter(|e| e.is_style_bearing()).collect()
    }

    pub fn script_elements(&self) -> Vec<&Element> {
        self.live_elements().filter(|e| e.is_script()).collect()
    }

    /// Elements carrying an inline `style` attribute
    pub fn inline_style_elements(&self) -> Vec<&Element> {
        self.live_elements().filter(|e| e.inline_style().is_some()).collect()
    }

    /// `(element id, frame id)` for every live frame element
    pub fn frame_elements(&self) -> Vec<(&str, &str)> {
        self.live_elements()
            .filter_map(|e| e.related_frame_id.as_deref().map(|f| (e.id.as_str(), f)))
            .collect()
    }

    pub fn interactive_elements(&self) -> Vec<&Element> {
        self.live_elements().filter(|e| e.is_interactive()).collect()
    }

    /// Walk `path` from the document element
    pub fn find_by_path(&self, path: &NodePath) -> Result<&Element> {
        let missing = || ExtractionError::Consistency(format!("No element at path {}", path));

        let mut current = self.root.as_deref().and_then(|id| self.elements.get(id)).ok_or_else(missing)?;
        for step in path.steps() {
            let next = match step {
                PathStep::Child(index) => current.children.get(*index),
                PathStep::ShadowRoot => current.shadow_root.as_ref(),
            };
            current = next.and_then(|id| self.elements.get(id)).ok_or_else(missing)?;
        }
        Ok(current)
    }

    /// Resolve `path`, falling back to the live-node token when the index is stale
    pub fn resolve(&self, path: &NodePath, token: Option<u64>) -> Result<&Element> {
        match self.find_by_path(path) {
            Ok(element) => Ok(element),
            Err(err) => match token.and_then(|t| self.find_by_token(t)) {
                Some(element) => {
                    self.log.debug(&format!("Path {} resolved by node identity", path));
                    Ok(element)
                }
                None => Err(err),
            },
        }
    }

    /// Current path of every live element reachable from the root
    pub fn build_path_map(&self) -> HashMap<NodePath, String> {
        let mut map = HashMap::new();
        if let Some(root) = &self.root {
            self.collect_paths(root, NodePath::root(), &mut map);
        }
        map
    }

    fn collect_paths(&self, id: &str, path: NodePath, map: &mut HashMap<NodePath, String>) {
        let Some(element) = self.elements.get(id) else {
            return;
        };
        for (index, child) in element.children.iter().enumerate() {
            self.collect_paths(child, path.child(index), map);
        }
        if let Some(shadow) = &element.shadow_root {
            self.collect_paths(shadow, path.shadow_root(), map);
        }
        map.insert(path, id.to_string());
    }

    /// Path of a single element, if it is still attached
    pub fn path_of(&self, id: &str) -> Option<NodePath> {
        let mut steps = Vec::new();
        let mut current = self.elements.get(id)?;
        while let Some(parent_id) = &current.parent {
            let parent = self.elements.get(parent_id)?;
            if current.is_shadow_root() {
                if parent.shadow_root.as_deref() != Some(current.id.as_str()) {
                    return None;
                }
                steps.push(PathStep::ShadowRoot);
            } else {
                let index = parent.children.iter().position(|c| c == &current.id)?;
                steps.push(PathStep::Child(index));
            }
            current = parent;
        }
        if self.root.as_deref() != Some(current.id.as_str()) {
            return None;
        }

        let mut path = NodePath::root();
        for step in steps.into_iter().rev() {
            path = match step {
                PathStep::Child(i) => path.child(i),
                PathStep::ShadowRoot => path.shadow_root(),
            };
        }
        Some(path)
    }

    /// Create the record for a node that appeared at `path` after the initial snapshot
    pub fn create_at(&mut self, path: &NodePath, raw: &RawNode) -> Result<String> {
        let (parent_path, last) = path
            .split_last()
            .ok_or_else(|| ExtractionError::Consistency("Cannot create a second document element".to_string()))?;

        match (last, raw.kind) {
            (PathStep::ShadowRoot, NodeKind::Node) | (PathStep::Child(_), NodeKind::ShadowRoot) => {
                return Err(ExtractionError::Desync {
                    path: path.to_string(),
                    expected: if last == PathStep::ShadowRoot { "shadowRoot" } else { "node" }.to_string(),
                    reported: raw.kind.as_str().to_string(),
                });
            }
            _ => {}
        }

        let parent = self.find_by_path(&parent_path)?;
        let parent_id = parent.id.clone();
        let depth = parent.depth + 1;
        let shadow_host = match last {
            PathStep::ShadowRoot => Some(parent_id.clone()),
            PathStep::Child(_) => parent.shadow_host.clone(),
        };

        let id = self.save_element(raw, Some(parent_id.as_str()), depth, shadow_host.as_deref(), false);
        let parent = self
            .elements
            .get_mut(&parent_id)
            .ok_or_else(|| ExtractionError::Consistency(format!("Parent {} vanished", parent_id)))?;
        match last {
            PathStep::ShadowRoot => parent.shadow_root = Some(id.clone()),
            PathStep::Child(index) => {
                let index = index.min(parent.children.len());
                parent.children.insert(index, id.clone());
            }
        }
        Ok(id)
    }

    /// Flag `id` and its subtree deleted and detach it from its parent or host.
    ///
    /// Returns every id flagged by this call, `id` first.
    pub fn delete_subtree(&mut self, id: &str) -> Result<Vec<String>> {
        let element = self
            .elements
            .get(id)
            .ok_or_else(|| ExtractionError::Consistency(format!("No element with id {}", id)))?;
        let is_shadow = element.is_shadow_root();

        if let Some(parent_id) = element.parent.clone() {
            if let Some(parent) = self.elements.get_mut(&parent_id) {
                if is_shadow {
                    parent.shadow_root = None;
                } else {
                    parent.children.retain(|c| c != id);
                }
            }
        }

        let mut deleted = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            let Some(element) = self.elements.get_mut(&current) else {
                continue;
            };
            if element.deleted {
                continue;
            }
            element.deleted = true;
            stack.extend(element.children.iter().rev().cloned());
            stack.extend(element.shadow_root.iter().cloned());
            deleted.push(current);
        }
        Ok(deleted)
    }

    /// Reconcile `id`'s attributes against the page's current attributes
    pub fn apply_attributes(&mut self, id: &str, fresh: &HashMap<String, String>) -> Result<AttributeChange> {
        let url = self.url.clone();
        let element = self
            .elements
            .get_mut(id)
            .ok_or_else(|| ExtractionError::Consistency(format!("No element with id {}", id)))?;

        // Normalise URL-bearing attributes the same way stored ones were.
        let mut normalized = Element::new(id, element.tag_name.clone());
        normalized.attributes = fresh.clone();
        classify(&mut normalized, &url, self.log.as_ref());

        let mut change = AttributeChange::default();
        let mut keys: Vec<&String> = normalized.attributes.keys().collect();
        keys.sort();
        for key in keys {
            let new_value = &normalized.attributes[key];
            match element.attributes.get(key) {
                Some(old) if old == new_value => continue,
                Some(old) => change.deltas.push(format!("{}:{}:{}", key, old, new_value)),
                None => change.deltas.push(format!("{}::{}", key, new_value)),
            }
            if key == "style" {
                change.style = Some(InlineStyleChange::Updated(new_value.clone()));
            }
        }

        let mut removed: Vec<(&String, &String)> = element
            .attributes
            .iter()
            .filter(|(k, _)| !normalized.attributes.contains_key(*k))
            .collect();
        removed.sort();
        for (key, old) in removed {
            change.deltas.push(format!("{}:{}:", key, old));
            if key == "style" {
                change.style = Some(InlineStyleChange::Removed);
            }
        }

        if !change.is_empty() {
            element.class_names = normalized.attributes.get("class").cloned();
            element.identify_id = normalized.attributes.get("id").cloned();
            element.attributes = normalized.attributes;
            element.interactive = normalized.interactive;
            element.active_requests = normalized.active_requests;
            element.passive_requests = normalized.passive_requests;
        }
        Ok(change)
    }
}
