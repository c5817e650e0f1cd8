//! Frame contexts.
//!
//! Every extracted frame gets a [`FrameContext`] holding its four layer stores. Contexts live in a
//! [`FrameArena`] and refer to their parent and children by [`FrameId`].

use crate::dom::DomSnapshotExtractor;
use crate::error::{ExtractionError, Result};
use crate::network::NetworkCorrelator;
use crate::script::ScriptExtractor;
use crate::style::StyleExtractor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a frame context in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(usize);

impl FrameId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame-{}", self.0)
    }
}

/// Extraction state of one frame
pub struct FrameContext {
    pub id: FrameId,

    pub parent: Option<FrameId>,

    /// `<iframe>`/`<frame>` element in the parent frame
    pub host_element: Option<String>,

    /// Frame-reference id the host element carries
    pub frame_ref: Option<String>,

    pub children: Vec<FrameId>,

    pub url: String,

    pub dom: Option<DomSnapshotExtractor>,

    pub style: Option<StyleExtractor>,

    pub script: Option<ScriptExtractor>,

    pub network: Option<NetworkCorrelator>,
}

impl FrameContext {
    fn new(id: FrameId, url: impl Into<String>) -> Self {
        Self {
            id,
            parent: None,
            host_element: None,
            frame_ref: None,
            children: Vec::new(),
            url: url.into(),
            dom: None,
            style: None,
            script: None,
            network: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Live element count, zero when markup was not extracted
    pub fn element_count(&self) -> usize {
        self.dom.as_ref().map_or(0, DomSnapshotExtractor::live_count)
    }
}

/// Tree of frame contexts
#[derive(Default)]
pub struct FrameArena {
    frames: Vec<FrameContext>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Add the top-level frame. An arena has exactly one root.
    pub fn add_root(&mut self, url: impl Into<String>) -> Result<FrameId> {
        if !self.frames.is_empty() {
            return Err(ExtractionError::Consistency("Frame arena already has a root".to_string()));
        }
        let id = FrameId(0);
        self.frames.push(FrameContext::new(id, url));
        Ok(id)
    }

    /// Add a frame nested in `parent`, hosted by `host_element`
    pub fn add_child(
        &mut self,
        parent: FrameId,
        url: impl Into<String>,
        host_element: impl Into<String>,
        frame_ref: impl Into<String>,
    ) -> Result<FrameId> {
        let id = FrameId(self.frames.len());
        let parent_context = self
            .frames
            .get_mut(parent.0)
            .ok_or_else(|| ExtractionError::Consistency(format!("No frame {}", parent)))?;
        parent_context.children.push(id);

        let mut context = FrameContext::new(id, url);
        context.parent = Some(parent);
        context.host_element = Some(host_element.into());
        context.frame_ref = Some(frame_ref.into());
        self.frames.push(context);
        Ok(id)
    }

    pub fn get(&self, id: FrameId) -> Option<&FrameContext> {
        self.frames.get(id.0)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameContext> {
        self.frames.get_mut(id.0)
    }

    pub fn root(&self) -> Option<&FrameContext> {
        self.frames.first()
    }

    pub fn children(&self, id: FrameId) -> Vec<&FrameContext> {
        self.get(id)
            .map(|f| f.children.iter().filter_map(|c| self.get(*c)).collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: FrameId) -> Option<&FrameContext> {
        self.get(id).and_then(|f| f.parent).and_then(|p| self.get(p))
    }

    /// Nesting depth; the root is 0
    pub fn depth(&self, id: FrameId) -> usize {
        let mut depth = 0;
        let mut current = self.get(id).and_then(|f| f.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.get(parent).and_then(|f| f.parent);
        }
        depth
    }

    /// Frames in creation order, which is a pre-order walk of the tree
    pub fn iter(&self) -> impl Iterator<Item = &FrameContext> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_links_are_ids() {
        let mut arena = FrameArena::new();
        let root = arena.add_root("https://top.test/").unwrap();
        let child = arena.add_child(root, "https://ads.test/", "iframe-el", "frame-ref").unwrap();
        let grandchild = arena.add_child(child, "https://ads.test/inner", "inner-el", "inner-ref").unwrap();

        assert_eq!(arena.len(), 3);
        assert!(arena.root().unwrap().is_root());
        assert_eq!(arena.children(root).len(), 1);
        assert_eq!(arena.parent(grandchild).unwrap().id, child);
        assert_eq!(arena.depth(grandchild), 2);
        assert_eq!(arena.get(child).unwrap().host_element.as_deref(), Some("iframe-el"));
        assert_eq!(grandchild.to_string(), "frame-2");
    }

    #[test]
    fn test_single_root() {
        let mut arena = FrameArena::new();
        arena.add_root("a").unwrap();
        assert!(arena.add_root("b").is_err());
        assert!(arena.add_child(FrameId(9), "c", "h", "r").is_err());
    }
}
