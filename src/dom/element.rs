use crate::browser::NodeKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tag and text used for shadow-root records
pub const SHADOW_ROOT_TAG: &str = "shadowRoot";

/// A URL an element can cause to be requested
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub url: String,
    pub method: String,
}

impl OutboundRequest {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, "GET")
    }
}

/// Markup record for one element (or attached shadow root) of a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,

    pub kind: NodeKind,

    /// HTML tag name (`shadowRoot` for shadow roots)
    pub tag_name: String,

    pub attributes: HashMap<String, String>,

    /// The element's own text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_names: Option<String>,

    /// The DOM `id` attribute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identify_id: Option<String>,

    /// Body of style and script elements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_html: Option<String>,

    pub parent: Option<String>,

    pub children: Vec<String>,

    pub shadow_root: Option<String>,

    pub shadow_host: Option<String>,

    pub depth: usize,

    /// Recognised event-handler attributes present on the element
    pub interactive: Vec<String>,

    pub active_requests: Vec<OutboundRequest>,

    pub passive_requests: Vec<OutboundRequest>,

    /// Id of the frame context created for iframe/frame elements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_frame_id: Option<String>,

    /// Present at the first snapshot rather than created by a script
    pub initial: bool,

    pub deleted: bool,

    /// Page-side identity of the live node
    #[serde(skip)]
    pub live_token: Option<u64>,
}

impl Element {
    pub fn new(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Node,
            tag_name: tag_name.into(),
            attributes: HashMap::new(),
            text: None,
            class_names: None,
            identify_id: None,
            inner_html: None,
            parent: None,
            children: Vec::new(),
            shadow_root: None,
            shadow_host: None,
            depth: 0,
            interactive: Vec::new(),
            active_requests: Vec::new(),
            passive_requests: Vec::new(),
            related_frame_id: None,
            initial: true,
            deleted: false,
            live_token: None,
        }
    }

    /// Record for a shadow root attached to `host`
    pub fn shadow_root(id: impl Into<String>, host: impl Into<String>) -> Self {
        let mut element = Self::new(id, SHADOW_ROOT_TAG);
        element.kind = NodeKind::ShadowRoot;
        element.class_names = Some(SHADOW_ROOT_TAG.to_string());
        element.text = Some(SHADOW_ROOT_TAG.to_string());
        element.shadow_host = Some(host.into());
        element
    }

    pub fn is_shadow_root(&self) -> bool {
        self.kind == NodeKind::ShadowRoot
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag_name.eq_ignore_ascii_case(tag)
    }

    pub fn get_attribute(&self, key: &str) -> Option<&String> {
        self.attributes.get(key)
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.class_names
            .as_deref()
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class_name))
    }

    /// `<style>` or `<link rel=stylesheet>`
    pub fn is_style_bearing(&self) -> bool {
        self.is_tag("style")
            || (self.is_tag("link")
                && self
                    .get_attribute("rel")
                    .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet"))))
    }

    pub fn is_script(&self) -> bool {
        self.is_tag("script")
    }

    pub fn is_frame(&self) -> bool {
        self.is_tag("iframe") || self.is_tag("frame")
    }

    pub fn is_interactive(&self) -> bool {
        !self.interactive.is_empty()
    }

    /// Inline style text, if the element carries a `style` attribute
    pub fn inline_style(&self) -> Option<&str> {
        self.get_attribute("style").map(String::as_str)
    }
}
