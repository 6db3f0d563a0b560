//! Metric names for the composer, recorded through the `metrics` crate facade.
//!
//! Nothing here installs a recorder: until the embedding application does,
//! every macro call is a cheap no-op.
//!
//! ```rust,ignore
//! use composer_metrics::{counter, labels, process};
//!
//! counter!(process::RESTARTS_TOTAL, labels::SERVER => "calc").increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::{counter, gauge, histogram};
