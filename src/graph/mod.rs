//! Dependency graph module.
//!
//! Turns declared nodes into a validated DAG with a deterministic
//! topological order.

mod builder;

pub use builder::DependencyGraph;
