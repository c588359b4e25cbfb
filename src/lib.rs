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

//! # Terraplane
//!
//! A declarative, idempotent infrastructure reconciliation engine.
//!
//! ## Overview
//!
//! Terraplane converges real infrastructure to a declared configuration:
//!
//! - Declare typed resources and their relationships in a YAML stack file
//! - Plan the minimal set of create, update, replace, and destroy actions
//! - Apply plans concurrently, bounded by dependency order
//! - Track applied resources, their identities, and run history in a state file
//!
//! ## Architecture
//!
//! The engine is a pipeline from declaration to converged reality:
//!
//! 1. **Registry**: Declared resources, indexed by `kind.name` address
//! 2. **Graph**: Reference and `depends_on` edges, cycle-checked and topologically ordered
//! 3. **Diff**: Declared attributes compared against recorded state
//! 4. **Plan**: Ordered actions with explicit dependency edges
//! 5. **Executor**: Concurrent application through a pluggable provider
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, the attribute value model, validation
//! - [`registry`]: Declared resource identity and lookup
//! - [`graph`]: Dependency resolution and ordering
//! - [`state`]: State storage, locking, and run history
//! - [`provider`]: The resource provider capability
//! - [`planner`]: Diff computation, plan assembly, execution
//! - [`reconciler`]: Run orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: web-stack
//!   environment: prod
//!
//! resources:
//!   - kind: network
//!     name: main
//!     attributes:
//!       cidr_block: 10.0.0.0/16
//!
//!   - kind: subnet
//!     name: public
//!     attributes:
//!       network_id: ${network.main.id}
//!       cidr_block: 10.0.1.0/24
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig, Value};
pub use error::{Result, TerraplaneError};
pub use graph::DependencyGraph;
pub use planner::{DiffEngine, ExecutionPlan, PlanExecutor};
pub use provider::{MemoryProvider, Provider};
pub use reconciler::{DriftReport, Reconciler};
pub use registry::{Resource, ResourceId, ResourceRegistry};
pub use state::{LocalStateStore, StateFile, StateStore};
