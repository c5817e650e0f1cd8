//! Style layer extraction
//!
//! This module collects inline, internal and external style blocks and splits them into rules.
//! It includes:
//! - StyleBlock / StyleRule: the block and rule records
//! - parser: top-level rule splitting and `url(...)` link extraction
//! - SelectorIndex: selector text to rule ids
//! - StyleExtractor: the per-frame style store, content correction and selector matching

pub mod block;
pub mod extractor;
pub mod parser;
pub mod selector_index;

pub use block::{RuleKind, StyleBlock, StyleOrigin, StyleRule};
pub use extractor::StyleExtractor;
pub use parser::{ParsedRule, extract_links, parse_rules};
pub use selector_index::SelectorIndex;
