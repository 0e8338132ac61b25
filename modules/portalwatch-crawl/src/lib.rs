pub mod deprecate;
pub mod episode_loader;
pub mod indexer;
pub mod metadata_loader;

pub use deprecate::{deprecate_streams, deprecate_table};
pub use episode_loader::{EpisodeLoadStats, EpisodeStreamLoader};
pub use indexer::{IndexStats, SiteIndexer};
pub use metadata_loader::{MetadataLoadStats, MetadataLoader};
