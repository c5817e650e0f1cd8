//! Page extraction session.
//!
//! [`PageExtractor`] owns a [`BrowserDriver`] and runs the per-frame pipeline: snapshot the
//! markup, collect style and script blocks, merge the load-time network capture, replay the
//! page's scripts through the [`MutationTracker`], bind network requests and selectors, then
//! recurse into child frames. The frame tree is assembled into a [`Graph`] at the end.

use crate::browser::BrowserDriver;
use crate::dom::{NodePath, extract_dom};
use crate::error::{ExtractionError, Result};
use crate::events::{SharedLog, facade};
use crate::fetch::ResourceFetcher;
use crate::frame::{FrameArena, FrameId};
use crate::graph::{Graph, GraphAssembler};
use crate::network::NetworkCorrelator;
use crate::options::ExtractionOptions;
use crate::script::{DEFAULT_MAX_STEPS, DEFAULT_SETTLE_INTERVAL, MutationTracker, ScriptExtractor, StepReport};
use crate::style::StyleExtractor;
use std::time::Duration;

/// Default wait for the initial load
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Result of one extraction: the frame stores and the graph assembled from them
pub struct PageModel {
    pub frames: FrameArena,
    pub graph: Graph,
    /// Replay reports of every frame, in extraction order
    pub steps: Vec<StepReport>,
}

pub struct PageExtractor<D: BrowserDriver> {
    driver: D,
    fetcher: Box<dyn ResourceFetcher>,
    url: Option<String>,
    wait: Duration,
    settle: Duration,
    max_steps: usize,
    options: ExtractionOptions,
    opened: bool,
    log: SharedLog,
}

impl<D: BrowserDriver> PageExtractor<D> {
    pub fn new(driver: D, fetcher: impl ResourceFetcher + 'static) -> Self {
        Self {
            driver,
            fetcher: Box::new(fetcher),
            url: None,
            wait: DEFAULT_WAIT,
            settle: DEFAULT_SETTLE_INTERVAL,
            max_steps: DEFAULT_MAX_STEPS,
            options: ExtractionOptions::default(),
            opened: false,
            log: facade(),
        }
    }

    /// Report diagnostics to `log` instead of the `log` facade
    pub fn with_log(mut self, log: SharedLog) -> Self {
        self.log = log;
        self
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
        self.opened = false;
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Seconds to wait for the initial load; zero skips the wait
    pub fn set_wait_time(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ExtractionError::Configuration(format!(
                "Wait time must be a non-negative number of seconds, got {}",
                seconds
            )));
        }
        self.wait = Duration::from_secs_f64(seconds);
        Ok(())
    }

    pub fn wait_time(&self) -> Duration {
        self.wait
    }

    /// Select the layers to extract. Fails once the document is open.
    pub fn set_options(&mut self, options: ExtractionOptions) -> Result<()> {
        if self.opened {
            return Err(ExtractionError::Configuration(
                "Extraction options cannot change after the document is open".to_string(),
            ));
        }
        options.validate()?;
        self.options = options;
        Ok(())
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Wait after each replayed script
    pub fn settle_interval(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn max_script_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Navigate to the configured URL with the page's scripts held back
    pub fn open(&mut self) -> Result<()> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| ExtractionError::Configuration("No URL set".to_string()))?;
        self.options.validate()?;

        if self.options.script {
            self.driver.set_script_execution(false)?;
        }
        if self.options.network {
            self.driver.reset_network_log()?;
        }
        self.driver.navigate(&url)?;

        if !self.wait.is_zero() && !self.driver.wait_for_load(self.wait)? {
            self.log.warn(&format!(
                "{} did not finish loading within {:?}, extracting what is there",
                url, self.wait
            ));
        }
        if self.options.script {
            self.driver.set_script_execution(true)?;
        }

        self.opened = true;
        self.log.info(&format!("Opened {}", url));
        Ok(())
    }

    /// Extract every enabled layer of the open document and its frames
    pub fn extract(&mut self) -> Result<PageModel> {
        if !self.opened {
            self.open()?;
        }
        let url = match self.driver.current_url() {
            Ok(url) if !url.is_empty() => url,
            _ => self.url.clone().unwrap_or_default(),
        };

        let mut frames = FrameArena::new();
        let root = frames.add_root(url)?;
        let mut steps = Vec::new();
        self.extract_frame(&mut frames, root, &mut steps)?;

        let graph = GraphAssembler::new(self.log.clone()).assemble(&frames);
        self.log.info(&format!(
            "Extracted {} frames into {} nodes and {} edges",
            frames.len(),
            graph.node_count(),
            graph.edge_count()
        ));
        Ok(PageModel { frames, graph, steps })
    }

    /// Run the single-frame pipeline on the active frame, then recurse into its child frames
    fn extract_frame(&mut self, frames: &mut FrameArena, id: FrameId, steps: &mut Vec<StepReport>) -> Result<()> {
        let options = self.options;
        let log = self.log.clone();
        let context = frames
            .get_mut(id)
            .ok_or_else(|| ExtractionError::Consistency(format!("No frame {}", id)))?;
        let url = context.url.clone();
        log.info(&format!("Extracting {} ({})", url, id));

        if options.script {
            self.driver.install_script_queue()?;
        }
        if options.markup || options.script {
            self.driver.install_observer()?;
        }

        if options.markup {
            context.dom = Some(extract_dom(&mut self.driver, &url, options.shadow_dom, log.clone())?);
        }
        if options.style {
            let mut style = StyleExtractor::new(log.clone());
            if let Some(dom) = &context.dom {
                style.extract_all(dom, self.fetcher.as_ref());
            }
            context.style = Some(style);
        }
        if options.script {
            let mut script = ScriptExtractor::new(url.clone(), log.clone());
            if let Some(dom) = &context.dom {
                script.extract_all(dom, self.fetcher.as_ref());
            }
            context.script = Some(script);
        }
        if options.network {
            let mut network = NetworkCorrelator::new(log.clone());
            network.process_capture(&self.driver.capture_network_log()?);
            context.network = Some(network);
        }
        correct_content(context);

        if options.script {
            let mut tracker = MutationTracker::new(log.clone())
                .with_settle_interval(self.settle)
                .with_max_steps(self.max_steps);
            steps.extend(tracker.run(&mut self.driver, context, self.fetcher.as_ref())?);
            correct_content(context);
        }

        if let Some(network) = context.network.as_mut() {
            network.element_matching(context.dom.as_ref(), context.style.as_ref(), context.script.as_ref());
        }
        if let (Some(style), Some(dom)) = (context.style.as_mut(), context.dom.as_ref()) {
            style.match_css_selector(&mut self.driver, dom);
        }

        if !options.frames {
            return Ok(());
        }

        // Paths come from the final tree; frames removed by scripts have none.
        let hosted: Vec<(NodePath, String, String, Option<String>)> = match &context.dom {
            Some(dom) => dom
                .frame_elements()
                .into_iter()
                .filter_map(|(host, frame_ref)| {
                    let path = dom.path_of(host)?;
                    let src = dom.get(host).and_then(|e| e.get_attribute("src").cloned());
                    Some((path, host.to_string(), frame_ref.to_string(), src))
                })
                .collect(),
            None => Vec::new(),
        };

        for (path, host, frame_ref, src) in hosted {
            if let Err(e) = self.driver.enter_frame(&path) {
                log.warn(&format!("Skipping frame at {}: {}", path, e));
                continue;
            }
            let frame_url = match self.driver.current_url() {
                Ok(url) if !url.is_empty() && url != "about:blank" => url,
                _ => src.unwrap_or_else(|| "about:blank".to_string()),
            };

            let result = match frames.add_child(id, frame_url, host, frame_ref) {
                Ok(child) => self.extract_frame(frames, child, steps),
                Err(e) => Err(e),
            };
            self.driver.leave_frame()?;

            match result {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => log.warn(&format!("Frame at {} not extracted: {}", path, e)),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn correct_content(context: &mut crate::frame::FrameContext) {
    if let Some(network) = &context.network {
        network.content_correction(context.style.as_mut(), context.script.as_mut());
    }
}
