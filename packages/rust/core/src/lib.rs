//! Target bookkeeping and write-back for Harvestline collectors.
//!
//! This crate ties the lookup tables, the status state machine and the
//! grouping engine together with the batch writer into one collection run
//! (see [`orchestrator::Collector`]).

pub mod batch;
pub mod orchestrator;
pub mod plan;
pub mod query;
pub mod report;
pub mod resolver;
pub mod status;
pub mod writer;

use harvestline_shared::Result;

/// Turn a storage failure into `T::default()` after logging it.
///
/// Everything that is not a storage failure propagates unchanged.
pub(crate) fn fail_soft<T: Default>(operation: &'static str, result: Result<T>) -> Result<T> {
    match result {
        Err(e) if e.is_transient() => {
            tracing::error!(operation, error = %e, "storage failure, returning empty result");
            Ok(T::default())
        }
        other => other,
    }
}
