pub mod builder;
pub mod diff;

pub use builder::{build_deltas, DeltaStats};
pub use diff::{apply_delta, compute_delta, verify_chain, Delta};
