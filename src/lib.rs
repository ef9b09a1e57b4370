//! runbox — sandboxed code execution dispatcher.
//!
//! Takes untrusted user-submitted source code, runs it against one or
//! more test inputs through an isolated execution backend, enforces
//! throughput and timing limits, classifies results, and streams
//! progress incrementally to the caller.
//!
//! The pieces, leaf-first:
//!
//! - [`sandbox`] — one execution against the backend, with retry on
//!   throttling
//! - [`governor`] — global admission control pacing all backend calls
//! - [`compare`] — pass/fail grading with numeric tolerance
//! - [`assets`] — per-test file-override resolution
//! - [`runner`] — drives a whole run and emits lifecycle events
//!
//! Question storage, authentication and transport framing live with
//! the caller; this crate only defines the data contracts it needs
//! from them.

pub mod assets;
pub mod compare;
pub mod config;
pub mod governor;
pub mod retry;
pub mod runner;
pub mod sandbox;

pub use config::Config;
pub use runner::stream::{EvaluationStream, RunEvent};
pub use runner::{DispatchError, Evaluator, TestCase, TestOutcome};
pub use sandbox::{ExecutionRequest, ExecutionResult, ExitClassification, FileAssets};
