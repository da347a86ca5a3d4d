//! Strata - Content-addressed build cache engine
//!
//! Plans staged builds as a step graph, executes steps with a pluggable
//! executor, and caches each step's output layer keyed by the content
//! identity of its command and inputs.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod identity;
pub mod planner;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod tree;

pub use error::{StrataError, StrataResult};
pub use graph::{BuildGraph, Buildfile, Stage, Step};
pub use identity::StepIdentity;
pub use planner::{Planner, PlatformBuild};
pub use platform::Platform;
pub use scheduler::Scheduler;
pub use tree::{FileEntry, FileTree};
