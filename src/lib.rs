// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackform
//!
//! A declarative infrastructure stack planner: resources are declared with
//! typed properties and references to each other's outputs, and stackform
//! works out the order, the minimal set of changes, and applies them.
//!
//! ## Overview
//!
//! - Declare resources in `stackform.yaml`, wiring them with `{ ref, output }`
//! - Build a dependency graph and reject cycles, duplicates and dangling refs
//! - Diff the declaration against recorded state into an ordered plan
//! - Apply the plan with bounded concurrency, saving state even on failure
//!
//! ## Architecture
//!
//! 1. **Declaration**: [`model`] nodes parsed by [`config`]
//! 2. **Ordering**: [`graph`] builds a deterministic topological order
//! 3. **Planning**: [`planner`] diffs against [`state`] and emits change entries
//! 4. **Execution**: the plan executor drives a [`provider`] under the state lock
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation and hashing
//! - [`model`]: Resource nodes, property values and replace-on registry
//! - [`graph`]: Dependency graph builder
//! - [`planner`]: Diff computation, plans and the executor
//! - [`provider`]: Resource provider trait, HTTP and in-memory providers
//! - [`state`]: State storage backends (local, S3) and locking
//! - [`deployer`]: End-to-end plan and apply for one stack
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: web
//!   environment: prod
//!
//! resources:
//!   - id: vpc
//!     type: ec2:vpc
//!     properties:
//!       cidr_block: 10.0.0.0/16
//!   - id: sg
//!     type: ec2:security-group
//!     properties:
//!       vpc_id: { ref: vpc }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployer;
pub mod error;
pub mod graph;
pub mod model;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use deployer::{DeployResult, Deployer};
pub use error::{Result, StackformError};
pub use graph::DependencyGraph;
pub use model::{OutputRef, PropertyValue, ResourceNode, ResourceTypeRegistry};
pub use planner::{ChangeAction, ChangeEntry, DiffEngine, Plan, PlanExecutor};
pub use provider::{HttpProvider, MemoryProvider, ResourceProvider};
pub use state::{LocalStateStore, S3StateStore, StateSnapshot, StateStore};
