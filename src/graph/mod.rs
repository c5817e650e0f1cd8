//! Typed node/edge graph
//!
//! This module assembles the four layer stores of every frame into one graph view per frame.
//! It includes:
//! - Node / NodeKind: one tagged record per markup, style, script, network or frame node
//! - Edge / EdgeKind: typed, annotated connections between nodes
//! - View / Graph: the per-frame node and edge tables, their queries and the repair pass
//! - GraphAssembler: builds views from a frame arena

pub mod assembler;
pub mod edge;
pub mod node;
pub mod view;

pub use assembler::GraphAssembler;
pub use edge::{Edge, EdgeKind};
pub use node::{Node, NodeKind, NodeRef, NodeType};
pub use view::{Graph, View};
