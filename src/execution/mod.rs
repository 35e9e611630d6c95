//! Step Execution Module
//!
//! The lifecycle hooks that move a step's task attempts onto Armada, and a
//! local driver that exercises them.
//!
//! # Architecture
//!
//! - [`cache`]: Per-run, at-most-once package upload cache
//! - [`invocation`]: Rewrites a local step command into the remote one
//! - [`lifecycle`]: Hook dispatcher and per-attempt state machine
//! - [`engine`]: Runs a step's task attempts over worker threads

pub mod cache;
pub mod engine;
pub mod invocation;
pub mod lifecycle;

pub use cache::{PackageArtifact, PackageCache, PackageReference};
pub use engine::{Engine, PlannedAttempt};
pub use invocation::{InvocationBuilder, InvocationSpec};
pub use lifecycle::{LifecycleHookDispatcher, LifecycleState, TaskLifecycle};
