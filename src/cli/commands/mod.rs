//! CLI command implementations

pub mod build;
pub mod cache;

pub use build::execute as build;
pub use cache::execute as cache;
