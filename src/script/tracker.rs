//! Script-stepping mutation tracker.
//!
//! The page's own scripts are held back while it loads and replayed one at a time. After each
//! script the tracker waits for the page to settle, asks the identity observer what changed, folds
//! the changes into the frame's layer stores and attributes them to the script that just ran.
//!
//! The loop is an explicit state machine. [`MutationTracker::advance`] performs exactly one
//! transition, so every browser call is a single suspension point.

use crate::browser::{BrowserDriver, DiffEntry, DiffOp, NodeKind};
use crate::dom::{DomSnapshotExtractor, InlineStyleChange};
use crate::error::{ExtractionError, Result};
use crate::events::SharedLog;
use crate::fetch::ResourceFetcher;
use crate::frame::FrameContext;
use crate::graph::NodeType;
use crate::script::block::Effect;
use crate::script::extractor::ScriptExtractor;
use crate::style::StyleExtractor;
use std::cmp::Ordering;
use std::time::Duration;

/// Default wait after each replayed script
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(3);

/// Upper bound on replayed scripts per frame
pub const DEFAULT_MAX_STEPS: usize = 1000;

/// Where the tracker is within one script step
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerPhase {
    /// Before a step: the network log is reset here
    Ready,
    /// Asking the page to run its next pending script
    Stepping,
    Settling { script: Option<String> },
    Diffing { script: Option<String> },
    Reconciling { script: Option<String>, entries: Vec<DiffEntry> },
    /// Attributing the step's captured requests
    Binding { report: StepReport },
    Finished,
}

/// Outcome of one replayed script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Block the step was attributed to; `None` only when the script layer is off
    pub script: Option<String>,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub changed: Vec<String>,
    /// Diff entries that could not be applied
    pub skipped: usize,
    /// Requests the script caused
    pub requests: usize,
}

impl StepReport {
    fn new(script: Option<String>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn effect_count(&self) -> usize {
        self.created.len() + self.deleted.len() + self.changed.len()
    }
}

pub struct MutationTracker {
    settle: Duration,
    max_steps: usize,
    phase: TrackerPhase,
    steps: usize,
    log: SharedLog,
}

impl MutationTracker {
    pub fn new(log: SharedLog) -> Self {
        Self {
            settle: DEFAULT_SETTLE_INTERVAL,
            max_steps: DEFAULT_MAX_STEPS,
            phase: TrackerPhase::Ready,
            steps: 0,
            log,
        }
    }

    pub fn with_settle_interval(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn phase(&self) -> &TrackerPhase {
        &self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == TrackerPhase::Finished
    }

    /// Scripts replayed so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Replay every pending script of the active frame
    pub fn run<D: BrowserDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        frame: &mut FrameContext,
        fetcher: &dyn ResourceFetcher,
    ) -> Result<Vec<StepReport>> {
        let mut reports = Vec::new();
        while !self.is_finished() {
            if let Some(report) = self.advance(driver, frame, fetcher)? {
                reports.push(report);
            }
        }
        self.log.info(&format!(
            "Replayed {} scripts in {}: {} effects",
            reports.len(),
            frame.url,
            reports.iter().map(StepReport::effect_count).sum::<usize>()
        ));
        Ok(reports)
    }

    /// Perform one transition. Returns the report of a step when its last phase completes.
    pub fn advance<D: BrowserDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        frame: &mut FrameContext,
        fetcher: &dyn ResourceFetcher,
    ) -> Result<Option<StepReport>> {
        let phase = std::mem::replace(&mut self.phase, TrackerPhase::Finished);
        let mut finished_step = None;

        self.phase = match phase {
            TrackerPhase::Ready => {
                if frame.network.is_some() {
                    driver.reset_network_log()?;
                }
                TrackerPhase::Stepping
            }
            TrackerPhase::Stepping => {
                if self.steps >= self.max_steps {
                    self.log.warn(&format!(
                        "Stopping script replay in {} after {} steps",
                        frame.url, self.max_steps
                    ));
                    TrackerPhase::Finished
                } else {
                    let step = driver.step_next_script()?;
                    if step.has_more {
                        self.steps += 1;
                        let script = frame.script.as_mut().map(|s| s.attribute_step(&step));
                        TrackerPhase::Settling { script }
                    } else {
                        TrackerPhase::Finished
                    }
                }
            }
            TrackerPhase::Settling { script } => {
                driver.settle(self.settle);
                TrackerPhase::Diffing { script }
            }
            TrackerPhase::Diffing { script } => {
                let entries = driver.diff_since_last_snapshot()?;
                TrackerPhase::Reconciling { script, entries }
            }
            TrackerPhase::Reconciling { script, entries } => {
                let report = self.reconcile(frame, script, entries, fetcher)?;
                TrackerPhase::Binding { report }
            }
            TrackerPhase::Binding { mut report } => {
                if let Some(network) = frame.network.as_mut() {
                    let exchanges = driver.capture_network_log()?;
                    let touched = network.process_capture(&exchanges);
                    if let Some(script_id) = &report.script {
                        let src = frame
                            .script
                            .as_ref()
                            .and_then(|s| s.get(script_id))
                            .and_then(|b| b.src.clone());
                        report.requests = network.bind_step_requests(&touched, script_id, src.as_deref());
                    }
                }
                finished_step = Some(report);
                TrackerPhase::Ready
            }
            TrackerPhase::Finished => TrackerPhase::Finished,
        };
        Ok(finished_step)
    }

    /// Apply one step's diff: deletes bottom-up at their old paths, then creates top-down at their
    /// new paths, then attribute changes
    fn reconcile(
        &self,
        frame: &mut FrameContext,
        script: Option<String>,
        entries: Vec<DiffEntry>,
        fetcher: &dyn ResourceFetcher,
    ) -> Result<StepReport> {
        let mut report = StepReport::new(script);
        let FrameContext {
            dom,
            style,
            script: scripts,
            ..
        } = frame;

        let Some(dom) = dom.as_mut() else {
            report.skipped = entries.len();
            return Ok(report);
        };

        let mut deletes = Vec::new();
        let mut creates = Vec::new();
        let mut changes = Vec::new();
        for entry in entries {
            if !dom.include_shadow() && entry.path.crosses_shadow_root() {
                continue;
            }
            match entry.op {
                DiffOp::Delete => deletes.push(entry),
                DiffOp::Create => creates.push(entry),
                DiffOp::Change => changes.push(entry),
            }
        }
        deletes.sort_by(|a, b| bottom_up(a, b));
        creates.sort_by(|a, b| bottom_up(b, a));

        let mut effects = Vec::new();
        let mut layers = Layers {
            dom,
            style: style.as_mut(),
            scripts: scripts.as_mut(),
            log: &self.log,
        };

        for entry in &deletes {
            if let Some(effect) = layers.apply_delete(entry, &mut report)? {
                effects.push(effect);
            }
        }
        for entry in &creates {
            if let Some(effect) = layers.apply_create(entry, fetcher, &mut report)? {
                effects.push(effect);
            }
        }
        for entry in &changes {
            if let Some(effect) = layers.apply_change(entry, &mut report)? {
                effects.push(effect);
            }
        }

        match (layers.scripts, &report.script) {
            (Some(scripts), Some(script_id)) => match scripts.get_mut(script_id) {
                Some(block) => effects.into_iter().for_each(|e| block.add_page_load_effect(e)),
                None => self
                    .log
                    .error(&format!("Replayed script {} is not stored", script_id)),
            },
            _ if !effects.is_empty() => self
                .log
                .info(&format!("{} changes could not be attributed to a script", effects.len())),
            _ => {}
        }

        if report.skipped > 0 {
            self.log
                .warn(&format!("Skipped {} unresolvable diff entries", report.skipped));
        }
        Ok(report)
    }
}

/// Deeper paths first; among equal depths, later positions first
fn bottom_up(a: &DiffEntry, b: &DiffEntry) -> Ordering {
    b.path
        .depth()
        .cmp(&a.path.depth())
        .then_with(|| b.path.steps().cmp(a.path.steps()))
}

/// Mutable borrows of one frame's layer stores during reconciliation
struct Layers<'a> {
    dom: &'a mut DomSnapshotExtractor,
    style: Option<&'a mut StyleExtractor>,
    scripts: Option<&'a mut ScriptExtractor>,
    log: &'a SharedLog,
}

impl Layers<'_> {
    /// Id of the tracked element the entry refers to, if any
    fn locate(&self, entry: &DiffEntry, report: &mut StepReport) -> Result<Option<String>> {
        let element = match self.dom.resolve(&entry.path, entry.token) {
            Ok(element) => element,
            Err(e) => {
                self.log.warn(&format!("{} {}: {}", entry.op.as_str(), entry.path, e));
                report.skipped += 1;
                return Ok(None);
            }
        };
        if element.kind != entry.node_kind {
            return Err(ExtractionError::Desync {
                path: entry.path.to_string(),
                expected: element.kind.as_str().to_string(),
                reported: entry.node_kind.as_str().to_string(),
            });
        }
        Ok(Some(element.id.clone()))
    }

    fn apply_delete(&mut self, entry: &DiffEntry, report: &mut StepReport) -> Result<Option<Effect>> {
        let Some(id) = self.locate(entry, report)? else {
            return Ok(None);
        };

        for removed in self.dom.delete_subtree(&id)? {
            if let Some(style) = self.style.as_deref_mut() {
                style.delete_block_by_element(&removed);
            }
            if let Some(scripts) = self.scripts.as_deref_mut() {
                scripts.delete_block_by_element(&removed);
            }
        }
        report.deleted.push(id.clone());
        Ok(Some(Effect::new(id, NodeType::Markup, "delete")))
    }

    fn apply_create(
        &mut self,
        entry: &DiffEntry,
        fetcher: &dyn ResourceFetcher,
        report: &mut StepReport,
    ) -> Result<Option<Effect>> {
        let Some(raw) = &entry.node else {
            self.log.warn(&format!("Create at {} carries no node", entry.path));
            report.skipped += 1;
            return Ok(None);
        };

        let id = match self.dom.create_at(&entry.path, raw) {
            Ok(id) => id,
            Err(e @ ExtractionError::Desync { .. }) => return Err(e),
            Err(e) => {
                self.log.warn(&format!("create {}: {}", entry.path, e));
                report.skipped += 1;
                return Ok(None);
            }
        };

        let Some(element) = self.dom.get(&id) else {
            return Err(ExtractionError::Consistency(format!("Created element {} is not stored", id)));
        };
        if let Some(style) = self.style.as_deref_mut() {
            style.extract_element(element, self.dom.url(), fetcher);
        }
        if let Some(scripts) = self.scripts.as_deref_mut() {
            scripts.extract_element(element, fetcher, true);
        }

        let mut attributes: Vec<String> = element
            .attributes
            .iter()
            .map(|(k, v)| format!("{}::{}", k, v))
            .collect();
        attributes.sort();

        report.created.push(id.clone());
        Ok(Some(Effect::new(id, NodeType::Markup, "create").with_changes(attributes)))
    }

    fn apply_change(&mut self, entry: &DiffEntry, report: &mut StepReport) -> Result<Option<Effect>> {
        let Some(raw) = &entry.node else {
            report.skipped += 1;
            return Ok(None);
        };
        if raw.kind == NodeKind::ShadowRoot {
            return Ok(None);
        }
        let Some(id) = self.locate(entry, report)? else {
            return Ok(None);
        };

        let change = self.dom.apply_attributes(&id, &raw.attributes)?;
        if change.is_empty() {
            return Ok(None);
        }
        if let Some(style) = self.style.as_deref_mut() {
            match &change.style {
                Some(InlineStyleChange::Updated(text)) => {
                    style.update_inline_block(&id, text, self.dom.url());
                }
                Some(InlineStyleChange::Removed) => {
                    style.delete_inline_block(&id);
                }
                None => {}
            }
        }

        report.changed.push(id.clone());
        Ok(Some(Effect::new(id, NodeType::Markup, "change").with_changes(change.deltas)))
    }
}
