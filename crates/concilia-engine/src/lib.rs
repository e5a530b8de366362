//! The Concilia reconciliation pipeline.
//!
//! Five ordered steps over two bases: normalize nulls on A, neutralize
//! estorno pairs on A, normalize nulls on B, suppress cancelled rows on B,
//! then match A against B per composite key. The orchestrator runs them
//! linearly against a [`PipelineContext`]; ordering is a correctness
//! requirement, not a convenience.

pub mod classify;
pub mod context;
pub mod error;
pub mod groups;
pub mod orchestrator;
pub mod steps;

pub use context::{NoopReporter, PipelineContext, StageReporter};
pub use error::PipelineError;
pub use groups::MatcherSettings;
pub use orchestrator::{Pipeline, PipelineStep};
