//! Build a canonical daily dataset of surface variables from ERA5 point series.
//!
//! Sources (sub-daily and daily fields, already extracted at a fixed set of
//! locations) are renamed to canonical names, each canonical variable is resolved
//! through its ordered candidate strategies, the results are stamped with standard
//! attributes and assembled into one dataset. See [`pipeline::run`].
pub mod error;
pub mod field;
pub mod units;
pub mod thermo;
pub mod resample;
pub mod sources;
pub mod descriptors;
pub mod resolve;
pub mod metadata;
pub mod assemble;
pub mod config;
pub mod pipeline;
pub mod checksums;
pub mod logging;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;
