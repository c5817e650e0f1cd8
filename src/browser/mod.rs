//! Browser collaborator contract.
//!
//! The extraction engine talks to the running page only through [`BrowserDriver`]. The
//! page-side halves of the protocol (identity observer, script replay queue, tree snapshot) are
//! JavaScript resources evaluated through [`BrowserDriver::evaluate`]; the provided trait methods
//! wrap them, so an implementation only has to supply evaluation, navigation, frames and network
//! capture. [`ChromeSession`] is the `headless_chrome` implementation.

pub mod config;
pub mod session;

pub use config::{ConnectionOptions, LaunchOptions};
pub use session::ChromeSession;

use crate::dom::NodePath;
use crate::error::{ExtractionError, Result};
use crate::script::ScriptKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const SNAPSHOT_JS: &str = include_str!("js/snapshot.js");
const OBSERVER_JS: &str = include_str!("js/observer.js");
const SCRIPT_QUEUE_JS: &str = include_str!("js/script_queue.js");

/// Whether a live node is an ordinary element or an attached shadow root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    #[default]
    #[serde(rename = "node")]
    Node,
    #[serde(rename = "shadowRoot")]
    ShadowRoot,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Node => "node",
            NodeKind::ShadowRoot => "shadowRoot",
        }
    }
}

/// Serialized view of a live node as reported by the page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawNode {
    pub kind: NodeKind,

    /// Opaque identity the page assigns to the underlying live node
    pub token: Option<u64>,

    pub tag_name: String,

    pub attributes: HashMap<String, String>,

    /// The node's own text, excluding descendants
    pub text: Option<String>,

    pub inner_html: Option<String>,

    pub children: Vec<RawNode>,

    pub shadow_root: Option<Box<RawNode>>,
}

impl RawNode {
    pub fn element(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            ..Self::default()
        }
    }

    pub fn shadow() -> Self {
        Self {
            kind: NodeKind::ShadowRoot,
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_inner_html(mut self, html: impl Into<String>) -> Self {
        self.inner_html = Some(html.into());
        self
    }

    pub fn with_token(mut self, token: u64) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_children(mut self, children: Vec<RawNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_shadow_root(mut self, root: RawNode) -> Self {
        self.shadow_root = Some(Box::new(root));
        self
    }

    /// Number of nodes in this subtree, shadow roots included
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(RawNode::count).sum::<usize>()
            + self.shadow_root.as_ref().map_or(0, |s| s.count())
    }
}

/// Structural operation reported by the identity observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOp {
    Create,
    Delete,
    Change,
}

impl DiffOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffOp::Create => "create",
            DiffOp::Delete => "delete",
            DiffOp::Change => "change",
        }
    }
}

/// One entry of the structural diff since the last snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: NodePath,

    pub op: DiffOp,

    #[serde(rename = "type", default)]
    pub node_kind: NodeKind,

    /// Page-side identity of the node, used when the path is stale
    #[serde(default)]
    pub token: Option<u64>,

    /// The node as it is now; absent for deletes
    #[serde(default)]
    pub node: Option<RawNode>,
}

impl DiffEntry {
    pub fn create(path: NodePath, node: RawNode) -> Self {
        Self {
            path,
            op: DiffOp::Create,
            node_kind: node.kind,
            token: node.token,
            node: Some(node),
        }
    }

    pub fn delete(path: NodePath, node_kind: NodeKind) -> Self {
        Self {
            path,
            op: DiffOp::Delete,
            node_kind,
            token: None,
            node: None,
        }
    }

    pub fn with_token(mut self, token: u64) -> Self {
        self.token = Some(token);
        self
    }

    pub fn change(path: NodePath, node: RawNode) -> Self {
        Self {
            path,
            op: DiffOp::Change,
            node_kind: node.kind,
            token: node.token,
            node: Some(node),
        }
    }
}

/// Result of advancing the page's script replay queue by one script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub kind: Option<ScriptKind>,

    /// Source URL for external scripts, script text for internal ones
    pub match_content: String,

    pub has_more: bool,
}

impl ScriptStep {
    pub fn finished() -> Self {
        Self {
            kind: None,
            match_content: String::new(),
            has_more: false,
        }
    }

    pub fn external(src: impl Into<String>) -> Self {
        Self {
            kind: Some(ScriptKind::External),
            match_content: src.into(),
            has_more: true,
        }
    }

    pub fn internal(content: impl Into<String>) -> Self {
        Self {
            kind: Some(ScriptKind::Internal),
            match_content: content.into(),
            has_more: true,
        }
    }

    /// Decode the `[type, match, "true"|"false"]` triple returned by the replay queue
    fn from_triple(triple: Vec<String>) -> Result<Self> {
        let [kind, match_content, more]: [String; 3] = triple
            .try_into()
            .map_err(|v: Vec<String>| ExtractionError::Evaluation(format!("Expected 3 step fields, got {}", v.len())))?;

        let kind = match kind.as_str() {
            "internal" => Some(ScriptKind::Internal),
            "external" => Some(ScriptKind::External),
            _ => None,
        };

        Ok(Self {
            kind,
            match_content,
            has_more: more == "true",
        })
    }
}

/// One captured request/response exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkExchange {
    pub url: String,
    pub method: String,
    pub timestamp: f64,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    pub status: Option<u16>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<String>,
}

impl NetworkExchange {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    pub fn with_request_body(mut self, body: impl Into<String>) -> Self {
        self.request_body = Some(body.into());
        self
    }
}

/// Everything the extraction engine needs from a running browser.
///
/// Only one frame is the evaluation target at a time; [`enter_frame`](Self::enter_frame) and
/// [`leave_frame`](Self::leave_frame) must be strictly nested.
pub trait BrowserDriver {
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// URL of the active frame
    fn current_url(&mut self) -> Result<String>;

    /// Wait until `document.readyState` is complete. Returns false on timeout.
    fn wait_for_load(&mut self, timeout: Duration) -> Result<bool>;

    /// Allow or block the page's own scripts. Blocked during load so the replay queue can run them one at a time.
    fn set_script_execution(&mut self, enabled: bool) -> Result<()>;

    /// Run code in the active frame and return its value
    fn evaluate(&mut self, script: &str) -> Result<Value>;

    /// Exchanges captured since the last reset
    fn capture_network_log(&mut self) -> Result<Vec<NetworkExchange>>;

    fn reset_network_log(&mut self) -> Result<()>;

    /// Make the frame element at `frame` (relative to the active frame) the evaluation target
    fn enter_frame(&mut self, frame: &NodePath) -> Result<()>;

    fn leave_frame(&mut self) -> Result<()>;

    /// Block for the settle interval after a script step
    fn settle(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }

    /// Serialized element tree of the active frame, rooted at the document element
    fn snapshot_document(&mut self, include_shadow: bool) -> Result<RawNode> {
        let script = format!("({})({})", SNAPSHOT_JS.trim(), include_shadow);
        evaluate_json(self, &script)
    }

    /// Install the page's script replay queue
    fn install_script_queue(&mut self) -> Result<()> {
        self.evaluate(SCRIPT_QUEUE_JS)?;
        Ok(())
    }

    /// Install the path/attribute identity tracker. Safe to call more than once.
    fn install_observer(&mut self) -> Result<()> {
        self.evaluate(OBSERVER_JS)?;
        Ok(())
    }

    /// Run the next pending script, or report that none are left
    fn step_next_script(&mut self) -> Result<ScriptStep> {
        let triple: Vec<String> = evaluate_json(self, "JSON.stringify(window.__pageGraph.executeNextScript())")?;
        ScriptStep::from_triple(triple)
    }

    /// Structural diff against the last identity snapshot; the snapshot is replaced
    fn diff_since_last_snapshot(&mut self) -> Result<Vec<DiffEntry>> {
        evaluate_json(self, "JSON.stringify(window.__pageGraph.compareElements())")
    }

    /// Paths of the tracked nodes currently matching `selector`
    fn find_by_selector(&mut self, selector: &str) -> Result<Vec<NodePath>> {
        let quoted = serde_json::to_string(selector)?;
        let script = format!("JSON.stringify(window.__pageGraph.findPathsBySelector({}))", quoted);
        evaluate_json(self, &script)
    }
}

/// Evaluate a script that returns a JSON string and decode it
pub fn evaluate_json<D, T>(driver: &mut D, script: &str) -> Result<T>
where
    D: BrowserDriver + ?Sized,
    T: DeserializeOwned,
{
    let value = driver.evaluate(script)?;
    let json = match value {
        Value::String(s) => s,
        Value::Null => {
            return Err(ExtractionError::Evaluation(format!(
                "No value returned from script: {}",
                script.chars().take(80).collect::<String>()
            )));
        }
        other => return Ok(serde_json::from_value(other)?),
    };
    Ok(serde_json::from_str(&json)?)
}
