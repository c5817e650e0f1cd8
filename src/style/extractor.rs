use crate::browser::BrowserDriver;
use crate::dom::{DomSnapshotExtractor, Element, NodePath};
use crate::error::{ExtractionError, Result};
use crate::events::SharedLog;
use crate::fetch::ResourceFetcher;
use crate::style::block::{RuleKind, StyleBlock, StyleOrigin, StyleRule};
use crate::style::parser::{extract_links, parse_rules};
use crate::style::selector_index::SelectorIndex;
use indexmap::IndexMap;
use std::collections::HashMap;
use uuid::Uuid;

/// Style layer of one frame
pub struct StyleExtractor {
    blocks: IndexMap<String, StyleBlock>,

    rules: IndexMap<String, StyleRule>,

    selectors: SelectorIndex,

    /// Stylesheet URL to external block ids
    links: IndexMap<String, Vec<String>>,

    /// Element id to the block built from its `style` attribute
    inline_by_owner: HashMap<String, String>,

    /// Element id to the block built from its `<style>` or `<link>`
    sheet_by_owner: HashMap<String, String>,

    log: SharedLog,
}

impl StyleExtractor {
    pub fn new(log: SharedLog) -> Self {
        Self {
            blocks: IndexMap::new(),
            rules: IndexMap::new(),
            selectors: SelectorIndex::new(),
            links: IndexMap::new(),
            inline_by_owner: HashMap::new(),
            sheet_by_owner: HashMap::new(),
            log,
        }
    }

    /// Collect every style block referenced by the live elements of `dom`
    pub fn extract_all(&mut self, dom: &DomSnapshotExtractor, fetcher: &dyn ResourceFetcher) {
        let owners: Vec<&Element> = dom
            .live_elements()
            .filter(|e| e.is_style_bearing() || e.inline_style().is_some())
            .collect();
        for element in owners {
            self.extract_element(element, dom.url(), fetcher);
        }
        self.log.info(&format!(
            "Extracted {} style blocks with {} rules",
            self.blocks.len(),
            self.rules.len()
        ));
    }

    /// Build the blocks `element` carries: an inline block for its `style` attribute, and an
    /// internal or external block for `<style>` or `<link rel=stylesheet>`
    pub fn extract_element(&mut self, element: &Element, frame_url: &str, fetcher: &dyn ResourceFetcher) {
        if let Some(text) = element.inline_style() {
            self.extract_inline(&element.id, text, frame_url);
        }
        if element.is_tag("style") {
            let content = element.inner_html.as_deref().or(element.text.as_deref()).unwrap_or_default();
            self.extract_internal(&element.id, content, frame_url);
        } else if element.is_style_bearing() {
            match element.get_attribute("href") {
                Some(href) => {
                    self.extract_external(&element.id, href, fetcher);
                }
                None => self
                    .log
                    .warn(&format!("Stylesheet link {} has no href", element.id)),
            }
        }
    }

    pub fn extract_inline(&mut self, owner: &str, text: &str, base_url: &str) -> String {
        let block = StyleBlock::new(Uuid::new_v4().to_string(), StyleOrigin::Inline, base_url)
            .with_owner(owner)
            .with_content(text);
        let block_id = self.insert_block(block);
        self.inline_by_owner.insert(owner.to_string(), block_id.clone());
        self.add_inline_rule(&block_id, owner, text, base_url);
        block_id
    }

    pub fn extract_internal(&mut self, owner: &str, content: &str, base_url: &str) -> String {
        let block = StyleBlock::new(Uuid::new_v4().to_string(), StyleOrigin::Internal, base_url)
            .with_owner(owner)
            .with_content(content);
        let block_id = self.insert_block(block);
        self.sheet_by_owner.insert(owner.to_string(), block_id.clone());
        self.parse_block(&block_id);
        block_id
    }

    /// Fetch and parse the stylesheet at `url`. A failed fetch leaves an empty block that can be
    /// corrected later from captured network content.
    pub fn extract_external(&mut self, owner: &str, url: &str, fetcher: &dyn ResourceFetcher) -> String {
        let content = match fetcher.fetch_text(url, self.log.as_ref()) {
            Ok(content) => content,
            Err(e) => {
                self.log
                    .warn(&ExtractionError::Extraction(format!("Stylesheet {} unreadable: {}", url, e)).to_string());
                String::new()
            }
        };

        let block = StyleBlock::new(Uuid::new_v4().to_string(), StyleOrigin::External, url)
            .with_owner(owner)
            .with_src(url)
            .with_content(content);
        let block_id = self.insert_block(block);
        self.sheet_by_owner.insert(owner.to_string(), block_id.clone());
        self.links.entry(url.to_string()).or_default().push(block_id.clone());
        self.parse_block(&block_id);

        if self.blocks.get(&block_id).is_some_and(|b| b.rules.is_empty()) {
            self.log.debug(&format!("Stylesheet {} yielded no rules", url));
        }
        block_id
    }

    fn insert_block(&mut self, block: StyleBlock) -> String {
        let id = block.id.clone();
        self.blocks.insert(id.clone(), block);
        id
    }

    fn add_inline_rule(&mut self, block_id: &str, owner: &str, text: &str, base_url: &str) {
        let rule = StyleRule {
            id: Uuid::new_v4().to_string(),
            block: block_id.to_string(),
            kind: RuleKind::Style,
            selector: Some(String::new()),
            text: text.to_string(),
            links: extract_links(text, base_url, self.log.as_ref()),
            applies_to: vec![owner.to_string()],
            deleted: false,
        };
        if let Some(block) = self.blocks.get_mut(block_id) {
            block.rules.push(rule.id.clone());
        }
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Parse the block's content into rule records and index their selectors
    fn parse_block(&mut self, block_id: &str) {
        let Some(block) = self.blocks.get(block_id) else {
            return;
        };
        let base_url = block.base_url.clone();
        let parsed = parse_rules(&block.content);

        let mut ids = Vec::with_capacity(parsed.len());
        for parsed_rule in parsed {
            let rule = StyleRule {
                id: Uuid::new_v4().to_string(),
                block: block_id.to_string(),
                kind: parsed_rule.kind,
                links: extract_links(&parsed_rule.text, &base_url, self.log.as_ref()),
                selector: parsed_rule.selector,
                text: parsed_rule.text,
                applies_to: Vec::new(),
                deleted: false,
            };
            if let Some(selector) = &rule.selector {
                self.selectors.register(selector.clone(), rule.id.clone());
            }
            ids.push(rule.id.clone());
            self.rules.insert(rule.id.clone(), rule);
        }

        if let Some(block) = self.blocks.get_mut(block_id) {
            block.rules = ids;
        }
    }

    /// Drop the block's rules and their selector entries
    fn clear_rules(&mut self, block_id: &str) {
        let Some(block) = self.blocks.get_mut(block_id) else {
            return;
        };
        for rule_id in std::mem::take(&mut block.rules) {
            if let Some(rule) = self.rules.shift_remove(&rule_id) {
                if let Some(selector) = &rule.selector {
                    self.selectors.remove_rule(selector, &rule_id);
                }
            }
        }
    }

    /// Create or rewrite the inline block for `owner`'s `style` attribute
    pub fn update_inline_block(&mut self, owner: &str, text: &str, base_url: &str) -> String {
        let Some(block_id) = self.inline_by_owner.get(owner).cloned() else {
            return self.extract_inline(owner, text, base_url);
        };
        self.clear_rules(&block_id);
        if let Some(block) = self.blocks.get_mut(&block_id) {
            block.content = text.to_string();
            block.deleted = false;
        }
        self.add_inline_rule(&block_id, owner, text, base_url);
        block_id
    }

    /// Retire the inline block built from `owner`'s `style` attribute
    pub fn delete_inline_block(&mut self, owner: &str) -> bool {
        match self.inline_by_owner.remove(owner) {
            Some(block_id) => {
                self.retire_block(&block_id);
                true
            }
            None => false,
        }
    }

    /// Retire every block owned by the element `owner`
    pub fn delete_block_by_element(&mut self, owner: &str) -> usize {
        let owned: Vec<String> = [self.inline_by_owner.remove(owner), self.sheet_by_owner.remove(owner)]
            .into_iter()
            .flatten()
            .collect();
        for block_id in &owned {
            self.retire_block(block_id);
        }
        owned.len()
    }

    fn retire_block(&mut self, block_id: &str) {
        let Some(block) = self.blocks.get_mut(block_id) else {
            return;
        };
        block.deleted = true;
        for rule_id in block.rules.clone() {
            if let Some(rule) = self.rules.get_mut(&rule_id) {
                rule.deleted = true;
                rule.applies_to.clear();
                if let Some(selector) = &rule.selector {
                    self.selectors.remove_rule(selector, &rule_id);
                }
            }
        }
    }

    /// Re-parse an external block from captured content when its first parse found no rules.
    ///
    /// Returns whether the block was rebuilt.
    pub fn correct_external_content(&mut self, block_id: &str, body: &str) -> Result<bool> {
        let block = self
            .blocks
            .get(block_id)
            .ok_or_else(|| ExtractionError::Consistency(format!("No style block with id {}", block_id)))?;
        if !block.is_external() || !block.rules.is_empty() || body.trim().is_empty() {
            return Ok(false);
        }

        self.clear_rules(block_id);
        if let Some(block) = self.blocks.get_mut(block_id) {
            block.content = body.to_string();
        }
        self.parse_block(block_id);

        let count = self.blocks.get(block_id).map_or(0, |b| b.rules.len());
        self.log
            .info(&format!("Corrected stylesheet {} from network content: {} rules", block_id, count));
        Ok(count > 0)
    }

    /// Bind every indexed selector to the live elements matching it.
    ///
    /// Selectors the page rejects match nothing.
    pub fn match_css_selector<D: BrowserDriver + ?Sized>(&mut self, driver: &mut D, dom: &DomSnapshotExtractor) {
        let path_map: HashMap<NodePath, String> = dom.build_path_map();
        let selectors: Vec<String> = self.selectors.selectors().filter(|s| !s.is_empty()).cloned().collect();

        for selector in selectors {
            let matched: Vec<String> = match driver.find_by_selector(&selector) {
                Ok(paths) => paths.iter().filter_map(|p| path_map.get(p).cloned()).collect(),
                Err(e) => {
                    self.log.debug(&format!("Selector '{}' not matched: {}", selector, e));
                    Vec::new()
                }
            };
            for rule_id in self.selectors.get(&selector).to_vec() {
                if let Some(rule) = self.rules.get_mut(&rule_id) {
                    rule.applies_to = matched.clone();
                }
            }
        }
    }

    pub fn block(&self, id: &str) -> Option<&StyleBlock> {
        self.blocks.get(id)
    }

    pub fn rule(&self, id: &str) -> Option<&StyleRule> {
        self.rules.get(id)
    }

    /// All blocks, retired ones included
    pub fn blocks(&self) -> impl Iterator<Item = &StyleBlock> {
        self.blocks.values()
    }

    pub fn live_blocks(&self) -> impl Iterator<Item = &StyleBlock> {
        self.blocks.values().filter(|b| !b.deleted)
    }

    pub fn rules(&self) -> impl Iterator<Item = &StyleRule> {
        self.rules.values()
    }

    pub fn rules_of(&self, block_id: &str) -> Vec<&StyleRule> {
        self.blocks
            .get(block_id)
            .map(|b| b.rules.iter().filter_map(|r| self.rules.get(r)).collect())
            .unwrap_or_default()
    }

    /// Live rules that reference external resources
    pub fn rules_with_links(&self) -> Vec<&StyleRule> {
        self.rules.values().filter(|r| !r.deleted && r.has_links()).collect()
    }

    pub fn external_blocks(&self) -> Vec<&StyleBlock> {
        self.live_blocks().filter(|b| b.is_external()).collect()
    }

    /// External blocks loaded from `url`
    pub fn blocks_for_url(&self, url: &str) -> Vec<&StyleBlock> {
        self.links
            .get(url)
            .map(|ids| ids.iter().filter_map(|id| self.blocks.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn inline_block_of(&self, owner: &str) -> Option<&StyleBlock> {
        self.inline_by_owner.get(owner).and_then(|id| self.blocks.get(id))
    }

    pub fn sheet_block_of(&self, owner: &str) -> Option<&StyleBlock> {
        self.sheet_by_owner.get(owner).and_then(|id| self.blocks.get(id))
    }

    pub fn selector_index(&self) -> &SelectorIndex {
        &self.selectors
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryLog;
    use crate::fetch::FetchedResource;

    const BASE: &str = "https://site.test/index.html";

    struct Bodies(HashMap<String, String>);

    impl ResourceFetcher for Bodies {
        fn fetch(&self, url: &str) -> Result<FetchedResource> {
            self.0
                .get(url)
                .map(|body| FetchedResource::new(url, body.as_bytes().to_vec()))
                .ok_or_else(|| ExtractionError::Fetch(format!("404 {}", url)))
        }
    }

    fn bodies(pairs: &[(&str, &str)]) -> Bodies {
        Bodies(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn test_internal_block_rules_and_index() {
        let log = MemoryLog::new();
        let mut style = StyleExtractor::new(log);
        let block = style.extract_internal("e1", "p { color: red } .x { background: url(bg.png) } p{margin:0}", BASE);

        let rules = style.rules_of(&block);
        assert_eq!(rules.len(), 3);
        assert_eq!(style.selector_index().get("p").len(), 2);
        assert_eq!(style.rules_with_links().len(), 1);
        assert_eq!(style.rules_with_links()[0].links, vec!["https://site.test/bg.png".to_string()]);
        assert_eq!(style.block(&block).unwrap().base_url, BASE);
    }

    #[test]
    fn test_inline_block_applies_to_owner() {
        let mut style = StyleExtractor::new(MemoryLog::new());
        let block = style.extract_inline("e7", "color: red", BASE);

        let rules = style.rules_of(&block);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].applies_to, vec!["e7".to_string()]);
        assert_eq!(rules[0].selector.as_deref(), Some(""));
        assert!(style.selector_index().is_empty());

        let again = style.update_inline_block("e7", "color: blue", BASE);
        assert_eq!(again, block);
        assert_eq!(style.rules_of(&block)[0].text, "color: blue");
        assert_eq!(style.rule_count(), 1);

        assert!(style.delete_inline_block("e7"));
        assert!(style.block(&block).unwrap().deleted);
    }

    #[test]
    fn test_external_fetch_failure_is_corrected_later() {
        let log = MemoryLog::new();
        let mut style = StyleExtractor::new(log.clone());
        let url = "https://cdn.test/site.css";
        let block = style.extract_external("link1", url, &bodies(&[]));

        assert!(log.contains("unreadable"));
        assert!(style.block(&block).unwrap().rules.is_empty());
        assert_eq!(style.blocks_for_url(url).len(), 1);

        assert!(!style.correct_external_content(&block, "   ").unwrap());
        assert!(style.correct_external_content(&block, "a { color: red } b { top: 0 }").unwrap());
        assert_eq!(style.rules_of(&block).len(), 2);
        assert_eq!(style.selector_index().get("a").len(), 1);

        // A block that already has rules is left alone
        assert!(!style.correct_external_content(&block, "c {}").unwrap());
        assert!(!style.selector_index().contains("c"));
    }

    #[test]
    fn test_external_block_uses_its_own_base() {
        let mut style = StyleExtractor::new(MemoryLog::new());
        let url = "https://cdn.test/css/site.css";
        let fetcher = bodies(&[(url, "h1 { background: url(../img/h.png) }")]);
        let block = style.extract_external("l", url, &fetcher);

        let rule = &style.rules_of(&block)[0];
        assert_eq!(rule.links, vec!["https://cdn.test/img/h.png".to_string()]);
    }

    #[test]
    fn test_delete_block_by_element() {
        let mut style = StyleExtractor::new(MemoryLog::new());
        let block = style.extract_internal("s1", "div { top: 0 }", BASE);
        style.extract_inline("s1", "color: red", BASE);

        assert_eq!(style.delete_block_by_element("s1"), 2);
        assert!(style.block(&block).unwrap().deleted);
        assert!(style.rules_of(&block).iter().all(|r| r.deleted));
        assert!(!style.selector_index().contains("div"));
        assert_eq!(style.live_blocks().count(), 0);
    }

    #[test]
    fn test_unknown_block_correction_is_consistency_error() {
        let mut style = StyleExtractor::new(MemoryLog::new());
        assert!(matches!(
            style.correct_external_content("nope", "a{}"),
            Err(ExtractionError::Consistency(_))
        ));
    }
}
