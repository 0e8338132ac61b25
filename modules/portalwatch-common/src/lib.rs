pub mod canon;
pub mod config;
pub mod error;
pub mod types;

pub use canon::{canonicalize, content_hash, decode_from_storage, encode_for_storage, is_canonical};
pub use config::Config;
pub use error::CrawlError;
pub use types::{RecordType, VersionedTable};
