//! Build graph data model
//!
//! A build is a sequence of named stages, each an ordered list of steps
//! sharing one filesystem lineage. Later stages may reference artifacts
//! produced by earlier stages. The graph is acyclic by construction:
//! validation rejects forward and unknown stage references before any
//! step executes.

pub mod manifest;
pub mod stage;
pub mod step;

pub use manifest::Buildfile;
pub use stage::{BuildGraph, Stage};
pub use step::{CacheMount, InputSource, OutputKind, Step};
