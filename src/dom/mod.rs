//! Markup layer extraction
//!
//! This module walks the live element tree of a frame and keeps identified element records.
//! It includes:
//! - Element: one markup record with tree links and classification
//! - NodePath: positional addresses used by the page-side identity observer
//! - DomSnapshotExtractor: the per-frame element store and its structural operations

pub mod classify;
pub mod element;
pub mod extractor;
pub mod path;

pub use classify::{classify, is_event_attribute};
pub use element::{Element, OutboundRequest, SHADOW_ROOT_TAG};
pub use extractor::{AttributeChange, DomSnapshotExtractor, InlineStyleChange};
pub use path::{NodePath, PathStep, SHADOW_ROOT};

use crate::browser::BrowserDriver;
use crate::error::Result;
use crate::events::SharedLog;

/// Snapshot the active frame of `driver` into a fresh extractor
pub fn extract_dom<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    url: &str,
    include_shadow: bool,
    log: SharedLog,
) -> Result<DomSnapshotExtractor> {
    let document = driver.snapshot_document(include_shadow)?;
    let mut dom = DomSnapshotExtractor::new(url, include_shadow, log);
    dom.snapshot(&document)?;
    Ok(dom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryLog;

    #[test]
    fn test_element_export() {
        let element = Element::new("e1", "div");
        assert_eq!(element.tag_name, "div");
    }

    #[test]
    fn test_extractor_export() {
        let dom = DomSnapshotExtractor::new("https://example.com", false, MemoryLog::new());
        assert!(dom.is_empty());
        assert!(dom.root_id().is_none());
    }
}
