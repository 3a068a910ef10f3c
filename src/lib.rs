// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![cfg_attr(not(test), deny(missing_docs))] // All public items must be documented
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

//! # tagsync
//!
//! A declarative, idempotent tag reconciliation engine for cloud resources.
//!
//! ## Overview
//!
//! tagsync keeps the tags on remote resources in line with the tags declared
//! for them:
//!
//! - Declare resources and their tags in a YAML configuration file
//! - Compute the minimal set of removals and upserts per resource
//! - Never touch keys the provider reserves for itself (`aws:` and friends)
//! - Apply the changes through a pluggable remote tagging backend
//!
//! ## Architecture
//!
//! 1. **Declared tags**: defaults plus per-resource tags from `tagsync.yaml`
//! 2. **Observed tags**: listed from the backend
//! 3. **Reconciler**: diffs the two, filters reserved keys, removes then upserts
//!
//! ## Modules
//!
//! - [`tags`]: Tag sets, the differ and the system tag policy
//! - [`context`]: Per-operation context carrying declared and observed tags
//! - [`client`]: Remote tagging backends (local file, HTTP, S3)
//! - [`reconciler`]: Tag reconciliation engine
//! - [`planner`]: Multi-resource planning and execution
//! - [`config`]: Configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! backend:
//!   type: local
//!
//! default_tags:
//!   owner: platform
//!
//! resources:
//!   - identifier: arn:aws:directconnect:us-east-1:123456789012:dxcon/dxcon-fg5678gh
//!     service: directconnect
//!     tags:
//!       env: prod
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod tags;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use client::{HttpTagClient, LocalTagStore, RemoteTagClient, S3BucketTagClient};
pub use config::{ConfigParser, ConfigValidator, TagSyncConfig};
pub use context::ReconciliationContext;
pub use error::{Result, TagSyncError};
pub use planner::{ExecutionResult, PlanExecutor, TagPlan};
pub use reconciler::Reconciler;
pub use tags::{diff, SystemTagPolicy, TagDiff, TagSet};
