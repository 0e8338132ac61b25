use thiserror::Error;

/// Error taxonomy for the crawler (§7). Transport failures are not
/// represented here — they are data (`FetchOutcome`), not errors, so a
/// failed fetch never has to be converted to/from this type.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store invariant violated: {0}")]
    Invariant(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
