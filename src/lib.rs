//! # page-graph
//!
//! Extracts a causally-linked model of a live, script-mutating page over the Chrome DevTools
//! Protocol (CDP): its markup, style blocks and rules, scripts, and network traffic, tied together
//! in one typed node/edge graph per frame.
//!
//! ## Features
//!
//! - **Layer extraction**: element records with classification, style blocks parsed into rules,
//!   script blocks in run order, and captured requests deduplicated by (URL, method)
//! - **Script replay**: the page's scripts are held back during load and replayed one at a time;
//!   every structural change after a script is attributed to it
//! - **Network correlation**: requests are bound to the elements, rules and scripts that cause them,
//!   as realized (captured) or potential (only referenced)
//! - **Frames**: child frames are extracted recursively into views linked to their host element
//!
//! ## Usage
//!
//! ```rust,no_run
//! use page_graph::{ChromeSession, ExtractionOptions, HttpFetcher, LaunchOptions, PageExtractor};
//!
//! # fn main() -> page_graph::Result<()> {
//! let session = ChromeSession::launch(LaunchOptions::default())?;
//! let mut extractor = PageExtractor::new(session, HttpFetcher::new()?);
//! extractor.set_url("https://example.com");
//! extractor.set_options(ExtractionOptions::default().with_shadow_dom(true))?;
//!
//! let model = extractor.extract()?;
//! let view = model.graph.root_view().expect("root view");
//! println!("{} nodes, {} edges", view.node_count(), view.edge_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`browser`]: the browser collaborator contract and its Chrome implementation
//! - [`dom`]: element records, positional paths and the markup extractor
//! - [`style`]: style blocks, rule parsing and selector matching
//! - [`script`]: script blocks and the script-stepping mutation tracker
//! - [`network`]: request records and correlation
//! - [`frame`]: the frame arena
//! - [`graph`]: typed nodes, edges, views and their assembly
//! - [`extraction`]: the extraction session tying the pipeline together

pub mod browser;
pub mod dom;
pub mod error;
pub mod events;
pub mod extraction;
pub mod fetch;
pub mod frame;
pub mod graph;
pub mod network;
pub mod options;
pub mod resolve;
pub mod script;
pub mod style;

pub use browser::{BrowserDriver, ChromeSession, ConnectionOptions, LaunchOptions};
pub use dom::{DomSnapshotExtractor, Element, NodePath};
pub use error::{ExtractionError, Result};
pub use events::{EventLog, LogFacade, MemoryLog, SharedLog};
pub use extraction::{PageExtractor, PageModel};
pub use fetch::{HttpFetcher, ResourceFetcher};
pub use frame::{FrameArena, FrameContext, FrameId};
pub use graph::{Edge, EdgeKind, Graph, GraphAssembler, Node, NodeKind, NodeRef, NodeType, View};
pub use network::{NetworkCorrelator, NetworkRequest};
pub use options::ExtractionOptions;
pub use script::{MutationTracker, ScriptBlock, ScriptExtractor};
pub use style::{StyleBlock, StyleExtractor, StyleRule};
