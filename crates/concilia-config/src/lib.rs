//! Configuration shapes shared across the Concilia workspace.
//!
//! Holds the base/config/job data model, the ordered key-set parser and the
//! configuration validator. Persistence lives in `concilia-store`; this crate
//! is plain data.

pub mod labels;
pub mod schema;
pub mod validation;

pub use labels::{grupo, status};
pub use schema::{
    Base, BaseTipo, ConfigCancelamento, ConfigConciliacao, ConfigEstorno, Job, JobRequest,
    JobStatus, KeySet,
};
pub use validation::{validate_base_override, validate_conciliacao, ValidationError};
