//! Job descriptions, staging, and the in-process job ledger
//!
//! A job is described by a JobSpec, staged into its own remote work directory, and recorded in
//! the JobLedger once the scheduler has accepted it. Status is never stored, only derived.

pub mod spec;
pub mod status;
pub mod stage;
pub mod ledger;
