pub mod controller;
pub mod sanity;

pub use controller::{EpochController, EpochReport};
pub use sanity::{SanityReport, Violation};
