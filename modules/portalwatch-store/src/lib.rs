pub mod models;
pub mod store;

pub use models::{
    CandidateRow, RecordRow, SiteInsertOutcome, SiteRow, StreamRow, StreamUpsertOutcome, UpsertOutcome,
    SYNTHETIC_ROOT_PARENT, SYNTHETIC_ROOT_URL,
};
pub use store::{EpochTxn, Store};
