use crate::browser::ScriptStep;
use crate::dom::{DomSnapshotExtractor, Element};
use crate::events::SharedLog;
use crate::fetch::ResourceFetcher;
use crate::resolve::resolve;
use crate::script::block::{ScriptBlock, ScriptKind};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Script layer of one frame
pub struct ScriptExtractor {
    /// Frame URL, for resolving relative step sources
    url: String,

    blocks: IndexMap<String, ScriptBlock>,

    internal: Vec<String>,

    external: Vec<String>,

    /// Script URL to block ids
    links: IndexMap<String, Vec<String>>,

    /// Run-immediately scripts in document order
    instant: Vec<String>,

    /// Scripts first seen while the replay loop was running
    discovered: Vec<String>,

    /// `defer` scripts in document order
    deferred: Vec<String>,

    by_owner: HashMap<String, String>,

    /// Blocks already matched to a replay step
    executed: HashSet<String>,

    /// Frame-level block for steps whose script could not be identified
    page_load: Option<String>,

    log: SharedLog,
}

impl ScriptExtractor {
    pub fn new(url: impl Into<String>, log: SharedLog) -> Self {
        Self {
            url: url.into(),
            blocks: IndexMap::new(),
            internal: Vec::new(),
            external: Vec::new(),
            links: IndexMap::new(),
            instant: Vec::new(),
            discovered: Vec::new(),
            deferred: Vec::new(),
            by_owner: HashMap::new(),
            executed: HashSet::new(),
            page_load: None,
            log,
        }
    }

    /// Collect a block for every live `<script>` element of `dom`
    pub fn extract_all(&mut self, dom: &DomSnapshotExtractor, fetcher: &dyn ResourceFetcher) {
        for element in dom.script_elements() {
            self.extract_element(element, fetcher, false);
        }
        self.log.info(&format!(
            "Extracted {} scripts ({} instant, {} deferred)",
            self.blocks.len(),
            self.instant.len(),
            self.deferred.len()
        ));
    }

    /// Build the block for a `<script>` element. `discovered` marks scripts that appeared while
    /// the replay loop was running.
    pub fn extract_element(&mut self, element: &Element, fetcher: &dyn ResourceFetcher, discovered: bool) -> Option<String> {
        if !element.is_script() {
            return None;
        }

        let src = element.get_attribute("src").filter(|s| !s.is_empty());
        let mut block = match src {
            Some(src) => {
                let content = fetcher.fetch_text(src, self.log.as_ref()).unwrap_or_else(|e| {
                    self.log.warn(&format!("Script {} unreadable: {}", src, e));
                    String::new()
                });
                ScriptBlock::new(Uuid::new_v4().to_string(), ScriptKind::External)
                    .with_src(src.clone())
                    .with_content(content)
            }
            None => ScriptBlock::new(Uuid::new_v4().to_string(), ScriptKind::Internal)
                .with_content(element.inner_html.clone().or_else(|| element.text.clone()).unwrap_or_default()),
        };
        block.is_async = element.attributes.contains_key("async");
        block.is_defer = element.attributes.contains_key("defer");
        block.owner = Some(element.id.clone());

        Some(self.save(block, discovered))
    }

    fn save(&mut self, block: ScriptBlock, discovered: bool) -> String {
        let id = block.id.clone();
        match block.kind {
            ScriptKind::Internal => self.internal.push(id.clone()),
            ScriptKind::External => {
                self.external.push(id.clone());
                if let Some(src) = &block.src {
                    self.links.entry(src.clone()).or_default().push(id.clone());
                }
            }
        }

        if discovered {
            self.discovered.push(id.clone());
        } else if block.is_defer {
            self.deferred.push(id.clone());
        } else {
            self.instant.push(id.clone());
        }

        if let Some(owner) = &block.owner {
            self.by_owner.insert(owner.clone(), id.clone());
        }
        self.blocks.insert(id.clone(), block);
        id
    }

    /// Block matching a replay step: external steps by resolved `src`, internal steps by content.
    ///
    /// Of several equal candidates the first one not yet run wins.
    pub fn find_by_step(&self, step: &ScriptStep) -> Option<&str> {
        let kind = step.kind?;
        let candidates: Vec<&str> = match kind {
            ScriptKind::External => {
                let src = self.resolve_step_src(&step.match_content);
                self.links
                    .get(&src)
                    .map(|ids| ids.iter().map(String::as_str).collect())
                    .unwrap_or_default()
            }
            ScriptKind::Internal => self
                .internal
                .iter()
                .filter(|id| self.blocks.get(*id).is_some_and(|b| b.content == step.match_content))
                .map(String::as_str)
                .collect(),
        };

        candidates
            .iter()
            .copied()
            .find(|id| !self.executed.contains(*id))
            .or_else(|| candidates.last().copied())
    }

    fn resolve_step_src(&self, raw: &str) -> String {
        match resolve(&self.url, raw) {
            Ok(url) => url,
            Err(e) => {
                self.log
                    .warn(&format!("Failed to resolve replayed script '{}' against {}: {}", raw, self.url, e));
                raw.to_string()
            }
        }
    }

    /// Block for the step, creating one when no extracted script matches. The block is marked run.
    pub fn match_step(&mut self, step: &ScriptStep) -> Option<String> {
        let kind = step.kind?;
        let id = match self.find_by_step(step) {
            Some(id) => id.to_string(),
            None => {
                self.log.info(&format!(
                    "No extracted {} script matches the replayed one, recording a new block",
                    kind.as_str()
                ));
                let block = match kind {
                    ScriptKind::Internal => {
                        ScriptBlock::new(Uuid::new_v4().to_string(), kind).with_content(step.match_content.clone())
                    }
                    ScriptKind::External => {
                        ScriptBlock::new(Uuid::new_v4().to_string(), kind).with_src(self.resolve_step_src(&step.match_content))
                    }
                };
                self.save(block, true)
            }
        };
        self.executed.insert(id.clone());
        Some(id)
    }

    /// Block a replay step's effects are recorded on: the matched script, or the frame's
    /// page-load block when the replayed script carried neither source nor text
    pub fn attribute_step(&mut self, step: &ScriptStep) -> String {
        match self.match_step(step) {
            Some(id) => id,
            None => {
                self.log.debug("Replayed script has neither source nor text, attributing to page load");
                self.page_load_block()
            }
        }
    }

    /// The frame's page-load block, created on first use. It has no owner and takes no part in
    /// run order or step matching.
    pub fn page_load_block(&mut self) -> String {
        if let Some(id) = &self.page_load {
            return id.clone();
        }
        let id = Uuid::new_v4().to_string();
        self.blocks
            .insert(id.clone(), ScriptBlock::new(id.clone(), ScriptKind::Internal));
        self.page_load = Some(id.clone());
        id
    }

    pub fn page_load_block_id(&self) -> Option<&str> {
        self.page_load.as_deref()
    }

    /// Replace the content of external scripts loaded from `url` with captured content.
    ///
    /// Returns the number of blocks updated.
    pub fn correct_external_content(&mut self, url: &str, body: &str) -> usize {
        if body.trim().is_empty() {
            return 0;
        }
        let Some(ids) = self.links.get(url) else {
            return 0;
        };

        let mut updated = 0;
        for id in ids {
            match self.blocks.get_mut(id) {
                Some(block) if block.content != body => {
                    block.content = body.to_string();
                    updated += 1;
                }
                Some(_) => {}
                None => self
                    .log
                    .error(&format!("Script {} listed for {} but not stored", id, url)),
            }
        }
        if updated > 0 {
            self.log.debug(&format!("Corrected {} script block(s) for {}", updated, url));
        }
        updated
    }

    /// Flag the block owned by the `<script>` element `owner` deleted
    pub fn delete_block_by_element(&mut self, owner: &str) -> bool {
        let Some(id) = self.by_owner.remove(owner) else {
            return false;
        };
        match self.blocks.get_mut(&id) {
            Some(block) => {
                block.deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ScriptBlock> {
        self.blocks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ScriptBlock> {
        self.blocks.get_mut(id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &ScriptBlock> {
        self.blocks.values()
    }

    pub fn live_blocks(&self) -> impl Iterator<Item = &ScriptBlock> {
        self.blocks.values().filter(|b| !b.deleted)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks_of_kind(&self, kind: ScriptKind) -> Vec<&ScriptBlock> {
        let ids = match kind {
            ScriptKind::Internal => &self.internal,
            ScriptKind::External => &self.external,
        };
        self.lookup(ids)
    }

    pub fn blocks_for_url(&self, url: &str) -> Vec<&ScriptBlock> {
        self.links.get(url).map(|ids| self.lookup(ids)).unwrap_or_default()
    }

    pub fn external_links(&self) -> impl Iterator<Item = &String> {
        self.links.keys()
    }

    pub fn block_of(&self, owner: &str) -> Option<&ScriptBlock> {
        self.by_owner.get(owner).and_then(|id| self.blocks.get(id))
    }

    pub fn instant_scripts(&self) -> Vec<&ScriptBlock> {
        self.lookup(&self.instant)
    }

    pub fn deferred_scripts(&self) -> Vec<&ScriptBlock> {
        self.lookup(&self.deferred)
    }

    /// Expected run order: instant scripts, then scripts discovered during the replay loop,
    /// then deferred scripts
    pub fn run_order(&self) -> Vec<&ScriptBlock> {
        let mut order = self.lookup(&self.instant);
        order.extend(self.lookup(&self.discovered));
        order.extend(self.lookup(&self.deferred));
        order
    }

    fn lookup(&self, ids: &[String]) -> Vec<&ScriptBlock> {
        ids.iter()
            .filter_map(|id| {
                let block = self.blocks.get(id);
                if block.is_none() {
                    self.log.warn(&format!("Script id {} is listed but not stored", id));
                }
                block
            })
            .collect()
    }
}
